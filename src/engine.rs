use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use config_model::ControlAction;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::download::{Downloader, remove_if_exists};
use crate::error::{Error, Result};
use crate::events::{FetchCommand, ImageJob, ImageRecord, TimerCommand};
use crate::notify::Notifier;
use crate::platform::wallpaper::WallpaperSetter;
use crate::playlist::Playlist;
use crate::queue::FixedQueue;
use crate::tasks::{fetcher, timer};

/// Runtime knobs of the rotation engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_images: usize,
    /// `floor(max_images * old_images_threshold)`.
    pub threshold: usize,
    pub cache_dir: PathBuf,
    pub saved_dir: PathBuf,
    pub default_image: Option<PathBuf>,
    pub image_switch_interval: Option<Duration>,
    pub enabled_on_startup: bool,
    pub paused_on_startup: bool,
}

/// Point-in-time view of the engine, for logs and the control socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub len: usize,
    pub position: usize,
    pub queued: usize,
    pub enabled: bool,
    pub paused: bool,
    pub exited: bool,
    pub current_wallpaper: Option<PathBuf>,
    pub current_hash: Option<String>,
}

struct EngineState {
    playlist: Playlist<ImageRecord>,
    queue: FixedQueue<ImageJob>,
    enabled: bool,
    paused: bool,
    exited: bool,
    /// Last path handed to the OS.
    current_wallpaper: Option<PathBuf>,
}

/// State and collaborators shared between the public handle and the tasks.
pub(crate) struct EngineCore {
    settings: EngineSettings,
    state: Mutex<EngineState>,
    setter: Arc<dyn WallpaperSetter>,
    notifier: Arc<dyn Notifier>,
    fetch_tx: UnboundedSender<FetchCommand>,
    timer_tx: UnboundedSender<TimerCommand>,
}

/// Rotates the desktop wallpaper through the local image cache and keeps the
/// cache topped up in the background.
pub struct WallpaperChanger {
    core: Arc<EngineCore>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WallpaperChanger {
    /// Builds the engine from a loaded catalog, applies the current image and
    /// spawns the fetch and timer tasks. Must run inside a tokio runtime.
    ///
    /// `shutdown` is cancelled when an `exit` action is dispatched; the owner
    /// is expected to follow up with [`WallpaperChanger::exit`].
    pub fn start<D>(
        settings: EngineSettings,
        catalog: Catalog,
        downloader: D,
        setter: Arc<dyn WallpaperSetter>,
        notifier: Arc<dyn Notifier>,
        shutdown: CancellationToken,
    ) -> Self
    where
        D: Downloader + 'static,
    {
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let state = EngineState {
            playlist: catalog.playlist,
            queue: catalog.queue,
            enabled: settings.enabled_on_startup,
            paused: settings.paused_on_startup,
            exited: false,
            current_wallpaper: None,
        };
        let core = Arc::new(EngineCore {
            settings,
            state: Mutex::new(state),
            setter,
            notifier,
            fetch_tx,
            timer_tx,
        });
        let cancel = CancellationToken::new();

        let initial = {
            let mut state = core.state.lock();
            core.select_wallpaper(&mut state)
        };
        core.apply(initial);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn({
            let core = Arc::clone(&core);
            let cancel = cancel.clone();
            async move {
                if let Err(err) = fetcher::run(core, downloader, fetch_rx, cancel).await {
                    error!(error = %err, "fetch task failed");
                }
            }
        }));
        if let Some(interval) = core.settings.image_switch_interval {
            tasks.push(tokio::spawn({
                let core = Arc::clone(&core);
                let cancel = cancel.clone();
                async move {
                    let tick = move || core.advance();
                    if let Err(err) = timer::run(interval, timer_rx, cancel, tick).await {
                        error!(error = %err, "timer task failed");
                    }
                }
            }));
            let state = core.state.lock();
            if state.enabled && !state.paused {
                core.timer(TimerCommand::Resume(Instant::now()));
            }
        }
        core.wake_fetcher();

        Self {
            core,
            cancel,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.core.settings
    }

    pub fn status(&self) -> EngineStatus {
        self.core.status()
    }

    /// Advances to the next image on behalf of a user trigger: restarts the
    /// auto-advance interval and shows a toast.
    pub fn next(&self) {
        let core = &self.core;
        {
            let state = core.state.lock();
            if !state.enabled {
                return;
            }
            if state.playlist.is_empty() {
                drop(state);
                core.warn_no_images();
                return;
            }
        }
        core.timer(TimerCommand::Reset(Instant::now()));
        core.advance();
        core.notifier.toast("Next wallpaper");
    }

    /// Steps back one image. Never wraps from the first image to the last.
    pub fn prev(&self) {
        let core = &self.core;
        let mut state = core.state.lock();
        if !state.enabled {
            return;
        }
        if state.playlist.is_empty() {
            drop(state);
            core.warn_no_images();
            return;
        }
        core.timer(TimerCommand::Reset(Instant::now()));
        if state.playlist.position() > 0 {
            debug!("switching to previous image");
            state.playlist.move_prev();
            let target = core.select_wallpaper(&mut state);
            drop(state);
            core.apply(target);
            core.notifier.toast("Previous wallpaper");
        } else {
            drop(state);
            warn!("no previous wallpaper");
            core.notifier.toast("No previous wallpaper");
        }
    }

    pub fn pause(&self) {
        let core = &self.core;
        {
            let mut state = core.state.lock();
            if !state.enabled {
                return;
            }
            state.paused = true;
        }
        info!("pausing wallpaper changer");
        core.timer(TimerCommand::Suspend);
        core.notifier.toast("Paused");
    }

    pub fn unpause(&self) {
        let core = &self.core;
        {
            let mut state = core.state.lock();
            if !state.enabled {
                return;
            }
            state.paused = false;
        }
        info!("unpausing wallpaper changer");
        core.timer(TimerCommand::Resume(Instant::now()));
        core.notifier.toast("Unpaused");
    }

    pub fn toggle_pause(&self) {
        let (enabled, paused) = {
            let state = self.core.state.lock();
            (state.enabled, state.paused)
        };
        if !enabled {
            return;
        }
        if paused {
            self.unpause();
        } else {
            self.pause();
        }
    }

    pub fn enable(&self) {
        let core = &self.core;
        let mut state = core.state.lock();
        if state.exited {
            debug!("ignoring enable after exit");
            return;
        }
        info!("enabling wallpaper changer");
        state.enabled = true;
        if !state.paused {
            core.timer(TimerCommand::Resume(Instant::now()));
        }
        let target = core.select_wallpaper(&mut state);
        drop(state);
        core.apply(target);
        core.notifier.toast("Enabled");
    }

    pub fn disable(&self) {
        let core = &self.core;
        let mut state = core.state.lock();
        info!("disabling wallpaper changer");
        state.enabled = false;
        core.timer(TimerCommand::Suspend);
        let target = core.select_wallpaper(&mut state);
        drop(state);
        core.apply(target);
        core.notifier.toast("Disabled");
    }

    pub fn toggle_enable(&self) {
        let enabled = self.core.state.lock().enabled;
        if enabled {
            self.disable();
        } else {
            self.enable();
        }
    }

    /// Copies the current image into the saved directory.
    pub fn save(&self) {
        let Some((source, saved)) = self.current_paths() else {
            return;
        };
        if !source.exists() {
            self.core.report_missing(&source, "Source image");
            return;
        }
        let result = saved
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::copy(&source, &saved).map(|_| ()));
        self.core.report_file_action(result, "Wallpaper saved", "Failed to save");
    }

    /// Removes the current image from the saved directory.
    pub fn delete(&self) {
        let Some((_, saved)) = self.current_paths() else {
            return;
        };
        if !saved.exists() {
            self.core.report_missing(&saved, "Saved image");
            return;
        }
        let result = fs::remove_file(&saved);
        self.core.report_file_action(result, "Wallpaper deleted", "Failed to delete");
    }

    pub fn toggle_save(&self) {
        let Some((_, saved)) = self.current_paths() else {
            return;
        };
        if saved.exists() {
            self.delete();
        } else {
            self.save();
        }
    }

    /// Runs a named action. `Exit` only requests shutdown; the owner of the
    /// engine finishes it with [`WallpaperChanger::exit`].
    pub fn dispatch(&self, action: ControlAction) {
        debug!(%action, "dispatching action");
        match action {
            ControlAction::Next => self.next(),
            ControlAction::Prev => self.prev(),
            ControlAction::Pause => self.pause(),
            ControlAction::Unpause => self.unpause(),
            ControlAction::TogglePause => self.toggle_pause(),
            ControlAction::Enable => self.enable(),
            ControlAction::Disable => self.disable(),
            ControlAction::ToggleEnable => self.toggle_enable(),
            ControlAction::Save => self.save(),
            ControlAction::Delete => self.delete(),
            ControlAction::ToggleSave => self.toggle_save(),
            ControlAction::Exit => self.shutdown.cancel(),
        }
    }

    /// Disables the engine for good, shows the default image if one is
    /// configured and waits for the background tasks to stop.
    pub async fn exit(&self) {
        let core = &self.core;
        {
            let mut state = core.state.lock();
            state.enabled = false;
            state.exited = true;
            let target = core.select_wallpaper(&mut state);
            drop(state);
            core.apply(target);
        }
        core.timer(TimerCommand::Suspend);
        self.shutdown.cancel();
        self.cancel.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        info!("wallpaper changer stopped");
    }

    /// Source path of the current image and its would-be saved copy.
    fn current_paths(&self) -> Option<(PathBuf, PathBuf)> {
        let core = &self.core;
        let state = core.state.lock();
        if !state.enabled {
            return None;
        }
        let Some(current) = state.playlist.current() else {
            drop(state);
            core.warn_no_images();
            return None;
        };
        let source = current.path.clone();
        drop(state);
        let file_name = source.file_name()?;
        let saved = core.settings.saved_dir.join(file_name);
        Some((source, saved))
    }
}

impl EngineCore {
    pub(crate) fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn status(&self) -> EngineStatus {
        let state = self.state.lock();
        EngineStatus {
            len: state.playlist.len(),
            position: state.playlist.position(),
            queued: state.queue.len(),
            enabled: state.enabled,
            paused: state.paused,
            exited: state.exited,
            current_wallpaper: state.current_wallpaper.clone(),
            current_hash: state.playlist.current().map(|r| r.hash.clone()),
        }
    }

    /// Moves to the next image and applies it. Shared by the timer and
    /// [`WallpaperChanger::next`].
    pub(crate) fn advance(&self) {
        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }
        if state.playlist.is_empty() {
            drop(state);
            self.warn_no_images();
            return;
        }
        state.playlist.move_next();
        let evicted = match self.evict_overflow(&mut state) {
            Ok(evicted) => evicted,
            Err(err) => {
                error!(error = %err, "failed to evict old images");
                Vec::new()
            }
        };
        debug!(position = state.playlist.position(), "switching to next image");
        let target = self.select_wallpaper(&mut state);
        drop(state);
        self.delete_evicted(evicted);
        self.apply(target);
        self.wake_fetcher();
    }

    /// How many downloads the cache needs right now, bounded by the number
    /// of pending jobs. Zero means idle.
    pub(crate) fn fetch_budget(&self) -> usize {
        let state = self.state.lock();
        let len = state.playlist.len();
        let position = state.playlist.position();
        let max = self.settings.max_images;
        let threshold = self.settings.threshold;
        let wanted = if len < max {
            debug!(len, max, "not enough images, filling batch");
            max - len
        } else if position > threshold {
            debug!(position, threshold, "cursor past threshold, rotating images");
            position - threshold
        } else {
            0
        };
        wanted.min(state.queue.len())
    }

    pub(crate) fn take_job(&self) -> Result<ImageJob> {
        self.state.lock().queue.dequeue()
    }

    pub(crate) fn requeue(&self, job: ImageJob) -> Result<()> {
        self.state.lock().queue.enqueue(job)
    }

    /// Appends a freshly downloaded image and evicts from the head while the
    /// cache is over capacity. When enabled, the image under the cursor is
    /// applied if it is not already on screen, which covers the first image
    /// ever downloaded.
    pub(crate) fn admit(&self, record: ImageRecord) -> Result<()> {
        let mut state = self.state.lock();
        state.playlist.push_back(record);
        let evicted = self.evict_overflow(&mut state)?;
        let target = if state.enabled {
            self.select_wallpaper(&mut state)
        } else {
            None
        };
        drop(state);

        self.delete_evicted(evicted);
        self.apply(target);
        Ok(())
    }

    /// Pops head images while the playlist exceeds `max_images`, re-queueing
    /// their jobs. Stops at the cursor: the image on screen is never evicted,
    /// so the playlist may stay over capacity until the cursor moves on.
    fn evict_overflow(&self, state: &mut EngineState) -> Result<Vec<PathBuf>> {
        let mut evicted = Vec::new();
        while state.playlist.len() > self.settings.max_images && state.playlist.position() > 0 {
            if state.queue.is_full() {
                return Err(Error::QueueFull(state.queue.capacity()));
            }
            let old = state.playlist.pop_front()?;
            state.queue.enqueue(old.job())?;
            evicted.push(old.path);
        }
        if state.playlist.len() > self.settings.max_images {
            debug!(
                len = state.playlist.len(),
                "cursor is at the oldest image, deferring eviction"
            );
        }
        Ok(evicted)
    }

    fn delete_evicted(&self, evicted: Vec<PathBuf>) {
        for path in evicted {
            match remove_if_exists(&path) {
                Ok(()) => debug!(path = %path.display(), "removed old image"),
                Err(err) => warn!(path = %path.display(), error = %err, "failed to remove image"),
            }
        }
    }

    /// Picks what should be on screen and records it as applied. `None`
    /// when nothing needs to change.
    fn select_wallpaper(&self, state: &mut EngineState) -> Option<PathBuf> {
        let target = if state.enabled {
            state.playlist.current().map(|r| r.path.clone())
        } else {
            self.settings.default_image.clone()
        }?;
        if state.current_wallpaper.as_ref() == Some(&target) {
            return None;
        }
        state.current_wallpaper = Some(target.clone());
        Some(target)
    }

    fn apply(&self, target: Option<PathBuf>) {
        let Some(path) = target else { return };
        info!(path = %path.display(), "setting wallpaper");
        if let Err(err) = self.setter.apply(&path) {
            warn!(path = %path.display(), error = %err, "failed to set wallpaper");
            self.notifier.toast("Failed to set wallpaper");
        }
    }

    fn warn_no_images(&self) {
        warn!("no downloaded images");
        self.notifier.toast("No downloaded images");
    }

    fn report_missing(&self, path: &Path, what: &str) {
        let message = format!("{what} not found");
        warn!(path = %path.display(), "{message}");
        self.notifier.toast(&message);
    }

    fn report_file_action(&self, result: std::io::Result<()>, success: &str, failure: &str) {
        match result {
            Ok(()) => {
                info!("{success}");
                self.notifier.toast(success);
            }
            Err(err) => {
                let message = format!("{failure}: {err}");
                warn!("{message}");
                self.notifier.toast(&message);
            }
        }
    }

    fn wake_fetcher(&self) {
        let _ = self.fetch_tx.send(FetchCommand::Wake);
    }

    fn timer(&self, command: TimerCommand) {
        let _ = self.timer_tx.send(command);
    }
}

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use rust_wallpaper_changer::api::{MetadataSource, PageRequest, Post};
use rust_wallpaper_changer::download::Downloader;
use rust_wallpaper_changer::engine::{EngineSettings, EngineStatus, WallpaperChanger};
use rust_wallpaper_changer::error::Error;
use rust_wallpaper_changer::notify::Notifier;
use rust_wallpaper_changer::platform::wallpaper::WallpaperSetter;

/// A tiny valid PNG.
pub fn png_bytes() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbImage::new(1, 1)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn contains(&self, message: &str) -> bool {
        self.messages.lock().iter().any(|m| m == message)
    }

    pub fn last(&self) -> Option<String> {
        self.messages.lock().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, _duration: Option<Duration>) {
        self.messages.lock().push(message.to_string());
    }
}

#[derive(Default)]
pub struct RecordingSetter {
    pub applied: Mutex<Vec<PathBuf>>,
}

impl RecordingSetter {
    pub fn applied(&self) -> Vec<PathBuf> {
        self.applied.lock().clone()
    }
}

impl WallpaperSetter for RecordingSetter {
    fn apply(&self, path: &Path) -> Result<()> {
        self.applied.lock().push(path.to_path_buf());
        Ok(())
    }
}

/// Writes a PNG for every URL except those listed in `broken`, which get a
/// body that is not an image.
#[derive(Clone, Default)]
pub struct FakeDownloader {
    pub broken: Arc<Mutex<HashSet<String>>>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeDownloader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Downloader for FakeDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = if self.broken.lock().contains(url) {
            b"<html>gone</html>".to_vec()
        } else {
            png_bytes()
        };
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }
}

/// Holds every download until a permit is added to `gate`.
#[derive(Clone)]
pub struct GatedDownloader {
    pub gate: Arc<Semaphore>,
    pub calls: Arc<AtomicUsize>,
}

impl Default for GatedDownloader {
    fn default() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl GatedDownloader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }
}

impl Downloader for GatedDownloader {
    async fn download(&self, _url: &str, dest: &Path) -> Result<u64, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::write(dest, b"partial")?;
        let permit = self.gate.acquire().await;
        drop(permit);
        let body = png_bytes();
        std::fs::write(dest, &body)?;
        Ok(body.len() as u64)
    }
}

/// Fails or succeeds per call following `script` (`true` = success); calls
/// past the end succeed. Records when each call started. Never touches the
/// blocking pool, so it is safe under a paused clock.
#[derive(Clone, Default)]
pub struct ScriptedDownloader {
    pub script: Arc<Mutex<VecDeque<bool>>>,
    pub started: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedDownloader {
    pub fn new(script: &[bool]) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.iter().copied().collect())),
            started: Arc::default(),
        }
    }

    pub fn started(&self) -> Vec<Instant> {
        self.started.lock().clone()
    }
}

impl Downloader for ScriptedDownloader {
    async fn download(&self, _url: &str, dest: &Path) -> Result<u64, Error> {
        self.started.lock().push(Instant::now());
        let succeed = self.script.lock().pop_front().unwrap_or(true);
        if !succeed {
            return Err(Error::HttpStatus(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        }
        let body = png_bytes();
        std::fs::write(dest, &body)?;
        Ok(body.len() as u64)
    }
}

/// Serves canned pages per `(query, rating tag, page)`; anything else is an
/// empty page. Queries listed in `failing` error on every page.
#[derive(Default)]
pub struct FakeSource {
    pub pages: BTreeMap<(String, String, u32), Vec<Post>>,
    pub failing: HashSet<String>,
    pub requests: Mutex<Vec<PageRequest>>,
}

impl FakeSource {
    pub fn with_page(mut self, query: &str, rating: &str, page: u32, hashes: &[&str]) -> Self {
        let posts = hashes.iter().map(|h| post(h)).collect();
        self.pages
            .insert((query.to_string(), rating.to_string(), page), posts);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

pub fn post(hash: &str) -> Post {
    Post {
        md5: Some(hash.to_string()),
        file_url: Some(format!("https://img.test/{hash}.png")),
        file_size: Some(1000),
    }
}

impl MetadataSource for FakeSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Post>, Error> {
        self.requests.lock().push(request.clone());
        if self.failing.contains(&request.query) {
            return Err(Error::HttpStatus(reqwest::StatusCode::BAD_GATEWAY));
        }
        let key = (
            request.query.clone(),
            request.rating.as_tag().to_string(),
            request.page,
        );
        Ok(self.pages.get(&key).cloned().unwrap_or_default())
    }
}

pub fn settings(root: &Path, max_images: usize, threshold: usize) -> EngineSettings {
    EngineSettings {
        max_images,
        threshold,
        cache_dir: root.join("cache"),
        saved_dir: root.join("saved"),
        default_image: None,
        image_switch_interval: None,
        enabled_on_startup: true,
        paused_on_startup: false,
    }
}

/// Polls `status` until `done` holds or two seconds pass.
pub async fn wait_for<F>(changer: &WallpaperChanger, mut done: F) -> EngineStatus
where
    F: FnMut(&EngineStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = changer.status();
        if done(&status) || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

/// How long a toast stays up unless the caller asks otherwise.
pub const DEFAULT_TOAST: Duration = Duration::from_secs(2);

const APP_NAME: &str = "Wallpaper changer";

/// Short user-facing status messages. `None` duration means "until replaced".
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, duration: Option<Duration>);

    fn toast(&self, message: &str) {
        self.notify(message, Some(DEFAULT_TOAST));
    }
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn notify(&self, message: &str, duration: Option<Duration>) {
        (**self).notify(message, duration)
    }
}

/// Emits toasts as log events under the `toast` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, duration: Option<Duration>) {
        info!(target: "toast", ?duration, "{message}");
    }
}

/// Swallows every toast; used when toasts are turned off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, message: &str, _duration: Option<Duration>) {
        debug!(target: "toast", suppressed = true, "{message}");
    }
}

/// Desktop notifications through `notify-send`, falling back to the log when
/// the tool is missing or fails.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self {
            program: "notify-send".to_string(),
        }
    }
}

impl DesktopNotifier {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(message: &str, duration: Option<Duration>) -> Vec<String> {
        let mut args = vec!["--app-name".to_string(), APP_NAME.to_string()];
        if let Some(duration) = duration {
            args.push("--expire-time".to_string());
            args.push(duration.as_millis().to_string());
        }
        args.push(APP_NAME.to_string());
        args.push(message.to_string());
        args
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, message: &str, duration: Option<Duration>) {
        let program = self.program.clone();
        let args = Self::args(message, duration);
        let message = message.to_string();
        // notify-send can block on a slow notification daemon.
        std::thread::spawn(move || match Command::new(&program).args(&args).status() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                warn!(program = %program, code = ?status.code(), "notification command failed");
                LogNotifier.notify(&message, duration);
            }
            Err(err) => {
                warn!(program = %program, error = %err, "failed to spawn notification command");
                LogNotifier.notify(&message, duration);
            }
        });
    }
}

/// Picks the notifier for the current settings.
pub fn from_settings(show_toasts: bool, desktop: bool) -> Arc<dyn Notifier> {
    match (show_toasts, desktop) {
        (false, _) => Arc::new(NullNotifier),
        (true, true) => Arc::new(DesktopNotifier::default()),
        (true, false) => Arc::new(LogNotifier),
    }
}

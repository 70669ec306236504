use std::path::PathBuf;

use tokio::time::Instant;

/// A downloaded image living in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub hash: String,
    pub path: PathBuf,
    pub url: String,
}

impl ImageRecord {
    pub fn job(&self) -> ImageJob {
        ImageJob {
            hash: self.hash.clone(),
            url: self.url.clone(),
        }
    }
}

/// A known image that is not on disk yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub hash: String,
    pub url: String,
}

/// Sent to the fetch task whenever the playlist may need replenishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchCommand {
    Wake,
}

/// Drives the auto-advance timer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Arm the timer, counting the interval from `at`.
    Resume(Instant),
    /// Disarm without firing.
    Suspend,
    /// Move the reference time without changing whether the timer is armed.
    Reset(Instant),
}

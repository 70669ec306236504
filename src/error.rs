use thiserror::Error;

/// Library error type for cache, queue and download operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Pop from a playlist with no entries.
    #[error("pop from empty playlist")]
    EmptyPlaylist,

    /// Enqueue on a download queue already holding `capacity` jobs.
    #[error("download queue is full (capacity {0})")]
    QueueFull(usize),

    /// Dequeue from a download queue with no pending jobs.
    #[error("download queue is empty")]
    QueueEmpty,

    /// The image host answered with a non-success status.
    #[error("unexpected HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    /// Fewer (or more) bytes arrived than the response declared.
    #[error("incomplete download: {written}/{expected} bytes")]
    Incomplete { expected: u64, written: u64 },

    /// The downloaded body is not a recognisable image format.
    #[error("downloaded file is not an image")]
    NotAnImage,

    /// Transport-level HTTP failure (connect, timeout, body read).
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

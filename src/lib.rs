pub mod api;
pub mod catalog;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod events;
pub mod notify;
pub mod playlist;
pub mod queue;
pub mod snapshot;
pub mod platform {
    pub mod instance;
    pub mod wallpaper;
}
pub mod tasks {
    #[cfg(unix)]
    pub mod control;
    pub mod fetcher;
    pub mod timer;
}

pub use engine::{EngineSettings, EngineStatus, WallpaperChanger};
pub use error::{Error, Result};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use tracing::{info, warn};

use crate::catalog::CatalogOptions;
use crate::engine::EngineSettings;
use crate::platform::wallpaper::PATH_PLACEHOLDER;

pub use config_model::{ControlAction, HotkeyBindings, Rating, SearchOptions};

pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";
pub const CONTROL_SOCKET_NAME: &str = "wallpaper-changer.sock";

/// Written to disk the first time the daemon starts without a config file.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Wallpaper changer configuration.

# Rotate wallpapers as soon as the daemon starts.
enabled-on-startup: true
# Start with auto-advance paused.
paused-on-startup: false
# Show short notifications for actions.
show-toasts: true
# Use desktop notifications (notify-send) instead of log lines for toasts.
desktop-notifications: true

search:
  queries: ["*"]
  # s = safe, q = questionable, e = explicit
  ratings: [s]
  # min-score: 50
  # Skip images larger than this many bytes.
  # max-image-size: 10000000
  max-pages: 10
  page-limit: 100
  api-url: https://konachan.com/post.json

# Images kept on disk at once.
max-images: 20
# Fraction of max-images already seen before old images are rotated out.
old-images-threshold: 0.2
# Set to null to turn auto-advance off.
image-switch-interval: 5m
# Set to null to never refetch image info.
cache-refresh-interval: 7d
download-timeout: 30s

wallpapers-path: ./wallpapers
metadata-cache-path: ./cache.json
# Shown while disabled and on exit.
# default-image: /usr/share/backgrounds/default.png
# Shell command; {path} is replaced by the quoted image path.
# wallpaper-command: feh --bg-fill {path}

hotkeys:
  next: <ctrl>+<alt>+i
  prev: <ctrl>+<alt>+u
  pause: <ctrl>+<alt>+p
  unpause: <ctrl>+<alt>+p
  enable: <ctrl>+<alt>+e
  disable: <ctrl>+<alt>+e
  save: <ctrl>+<alt>+s
  delete: <ctrl>+<alt>+s
  exit: <ctrl>+<shift>+<alt>+e
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    pub enabled_on_startup: bool,
    pub paused_on_startup: bool,
    pub show_toasts: bool,
    /// Route toasts to `notify-send` rather than the log.
    pub desktop_notifications: bool,
    /// Remote metadata search.
    pub search: SearchOptions,
    /// Hard cap on images kept in the cache directory.
    pub max_images: usize,
    /// Fraction of `max_images` the cursor may run ahead before the oldest
    /// images are replaced.
    pub old_images_threshold: f64,
    /// Auto-advance period; `None` disables auto-advance.
    #[serde(with = "humantime_serde")]
    pub image_switch_interval: Option<Duration>,
    /// Maximum age of the metadata snapshot; `None` never expires it.
    #[serde(with = "humantime_serde")]
    pub cache_refresh_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,
    /// Holds `cache/` (managed) and `saved/` (user copies).
    pub wallpapers_path: PathBuf,
    pub metadata_cache_path: PathBuf,
    pub default_image: Option<PathBuf>,
    pub wallpaper_command: Option<String>,
    /// Unix domain socket accepting runtime control commands.
    #[serde(default = "Configuration::default_control_socket_path")]
    pub control_socket_path: PathBuf,
    /// Optional deterministic seed for the pending download order.
    pub startup_shuffle_seed: Option<u64>,
    pub hotkeys: HotkeyBindings,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            enabled_on_startup: true,
            paused_on_startup: false,
            show_toasts: true,
            desktop_notifications: true,
            search: SearchOptions::default(),
            max_images: 20,
            old_images_threshold: 0.2,
            image_switch_interval: Some(Duration::from_secs(5 * 60)),
            cache_refresh_interval: Some(Duration::from_secs(7 * 24 * 60 * 60)),
            download_timeout: Duration::from_secs(30),
            wallpapers_path: PathBuf::from("./wallpapers"),
            metadata_cache_path: PathBuf::from("./cache.json"),
            default_image: None,
            wallpaper_command: None,
            control_socket_path: Self::default_control_socket_path(),
            startup_shuffle_seed: None,
            hotkeys: HotkeyBindings::default(),
        }
    }
}

impl Configuration {
    fn default_control_socket_path() -> PathBuf {
        std::env::temp_dir().join(CONTROL_SOCKET_NAME)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&s).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(s)?)
    }

    /// Reads `path`, or writes the commented default template there and
    /// returns the defaults when the file does not exist yet.
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::from_yaml_file(path);
        }
        warn!(path = %path.display(), "config file not found, writing default config");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, DEFAULT_CONFIG_TEMPLATE)
            .with_context(|| format!("failed to write default config to {}", path.display()))?;
        info!(path = %path.display(), "default config written");
        Self::from_yaml_str(DEFAULT_CONFIG_TEMPLATE)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(self.max_images > 0, "max-images must be greater than zero");
        ensure!(
            self.old_images_threshold > 0.0 && self.old_images_threshold < 1.0,
            "old-images-threshold must be between 0 and 1"
        );
        if let Some(interval) = self.image_switch_interval {
            ensure!(
                !interval.is_zero(),
                "image-switch-interval must be positive when set"
            );
        }
        ensure!(
            !self.download_timeout.is_zero(),
            "download-timeout must be positive"
        );
        if let Some(command) = &self.wallpaper_command {
            ensure!(
                command.contains(PATH_PLACEHOLDER),
                "wallpaper-command must contain {PATH_PLACEHOLDER}"
            );
        }
        ensure!(
            !self.control_socket_path.as_os_str().is_empty(),
            "control-socket-path must not be empty"
        );
        ensure!(
            self.control_socket_path.file_name().is_some(),
            "control-socket-path must include a socket file name"
        );
        self.search
            .validate()
            .context("invalid search configuration")?;
        self.hotkeys
            .validate()
            .context("invalid hotkeys configuration")?;
        Ok(self)
    }

    /// Makes every relative path absolute against `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let absolute = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        self.wallpapers_path = absolute(self.wallpapers_path);
        self.metadata_cache_path = absolute(self.metadata_cache_path);
        self.control_socket_path = absolute(self.control_socket_path);
        self.default_image = self.default_image.map(absolute);
        self
    }

    /// Number of images the cursor may pass before old ones are rotated out.
    pub fn threshold(&self) -> usize {
        (self.max_images as f64 * self.old_images_threshold).floor() as usize
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.wallpapers_path.join("cache")
    }

    pub fn saved_dir(&self) -> PathBuf {
        self.wallpapers_path.join("saved")
    }

    pub fn catalog_options(&self) -> CatalogOptions {
        CatalogOptions {
            search: self.search.clone(),
            refresh_interval: self.cache_refresh_interval,
            snapshot_path: self.metadata_cache_path.clone(),
            cache_dir: self.cache_dir(),
            max_images: self.max_images,
            threshold: self.threshold(),
            shuffle_seed: self.startup_shuffle_seed,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_images: self.max_images,
            threshold: self.threshold(),
            cache_dir: self.cache_dir(),
            saved_dir: self.saved_dir(),
            default_image: self.default_image.clone(),
            image_switch_interval: self.image_switch_interval,
            enabled_on_startup: self.enabled_on_startup,
            paused_on_startup: self.paused_on_startup,
        }
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Persisted result of the last remote metadata fetch.
///
/// `hash` is the search fingerprint the data was fetched with and `data` maps
/// content hash to download URL. `timestamp` is seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl MetadataSnapshot {
    pub fn new(
        fingerprint: impl Into<String>,
        data: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            hash: fingerprint.into(),
            data,
            timestamp: Some(now.timestamp()),
        }
    }

    /// Reads the snapshot at `path`. A missing or malformed file yields
    /// `None` so the caller falls back to a remote fetch.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "no image info cache found");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => {
                debug!(path = %path.display(), "loaded image info cache");
                Some(snapshot)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "image info cache is unreadable");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_vec_pretty(self)?;
        fs::write(path, encoded)?;
        debug!(path = %path.display(), entries = self.data.len(), "saved image info cache");
        Ok(())
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// Whether the data can stand in for a remote fetch: same fingerprint,
    /// and either no refresh interval or still inside it. Without a recorded
    /// timestamp the snapshot counts as expired whenever an interval is set.
    pub fn is_reusable(
        &self,
        fingerprint: &str,
        refresh_interval: Option<Duration>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.hash != fingerprint {
            return false;
        }
        let Some(interval) = refresh_interval else {
            return true;
        };
        let Some(fetched) = self.fetched_at() else {
            return false;
        };
        match chrono::Duration::from_std(interval) {
            Ok(interval) => now <= fetched + interval,
            // Interval too large to represent: treat as never expiring.
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(now: DateTime<Utc>) -> MetadataSnapshot {
        let data = BTreeMap::from([("abc".to_string(), "https://x/abc.png".to_string())]);
        MetadataSnapshot::new("f00d", data, now)
    }

    #[test]
    fn fresh_matching_snapshot_is_reusable() {
        let now = Utc::now();
        let snap = sample(now - chrono::Duration::hours(1));
        assert!(snap.is_reusable("f00d", Some(Duration::from_secs(24 * 3600)), now));
        assert!(snap.is_reusable("f00d", None, now));
    }

    #[test]
    fn fingerprint_mismatch_is_not_reusable() {
        let now = Utc::now();
        assert!(!sample(now).is_reusable("beef", None, now));
    }

    #[test]
    fn expired_or_untimed_snapshot_is_not_reusable() {
        let now = Utc::now();
        let old = sample(now - chrono::Duration::days(8));
        assert!(!old.is_reusable("f00d", Some(Duration::from_secs(7 * 24 * 3600)), now));

        let untimed = MetadataSnapshot {
            timestamp: None,
            ..sample(now)
        };
        assert!(!untimed.is_reusable("f00d", Some(Duration::from_secs(60)), now));
        assert!(untimed.is_reusable("f00d", None, now));
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let snap = sample(Utc::now());
        snap.save(&path).unwrap();
        assert_eq!(MetadataSnapshot::load(&path), Some(snap));
    }

    #[test]
    fn missing_or_corrupt_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        assert!(MetadataSnapshot::load(&path).is_none());
        fs::write(&path, b"{not json").unwrap();
        assert!(MetadataSnapshot::load(&path).is_none());
    }
}

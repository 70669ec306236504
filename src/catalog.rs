use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Utc;
use config_model::SearchOptions;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::api::{MetadataSource, fetch_all_image_infos};
use crate::download::remove_if_exists;
use crate::events::{ImageJob, ImageRecord};
use crate::notify::Notifier;
use crate::playlist::Playlist;
use crate::queue::FixedQueue;
use crate::snapshot::MetadataSnapshot;

/// Inputs for rebuilding the cache state at startup.
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub search: SearchOptions,
    pub refresh_interval: Option<Duration>,
    pub snapshot_path: PathBuf,
    pub cache_dir: PathBuf,
    pub max_images: usize,
    pub threshold: usize,
    pub shuffle_seed: Option<u64>,
}

/// Startup cache state: what is on disk and what is still to be fetched.
#[derive(Debug)]
pub struct Catalog {
    pub playlist: Playlist<ImageRecord>,
    pub queue: FixedQueue<ImageJob>,
    /// Number of images known from metadata; equals the queue capacity.
    pub total: usize,
    /// `true` when metadata came from the remote API instead of the snapshot.
    pub fetched_remotely: bool,
}

/// Loads metadata (snapshot or remote), reconciles the cache directory
/// against it and builds the playlist and pending queue.
#[instrument(skip_all, fields(cache = %options.cache_dir.display()))]
pub async fn load<S>(
    options: &CatalogOptions,
    source: &S,
    notifier: &dyn Notifier,
) -> Result<Catalog>
where
    S: MetadataSource,
{
    let fingerprint = options.search.fingerprint();
    let now = Utc::now();
    let reusable = MetadataSnapshot::load(&options.snapshot_path)
        .filter(|snap| snap.is_reusable(&fingerprint, options.refresh_interval, now));

    let (infos, fetched_remotely) = match reusable {
        Some(snapshot) => {
            info!(entries = snapshot.data.len(), "using cached image info");
            notifier.toast("Wallpaper changer started");
            (snapshot.data, false)
        }
        None => {
            info!("fetching new image info");
            notifier.notify("Fetching new image info...", None);
            let infos = fetch_all_image_infos(source, &options.search).await;
            let snapshot = MetadataSnapshot::new(fingerprint, infos, Utc::now());
            if let Err(err) = snapshot.save(&options.snapshot_path) {
                warn!(
                    path = %options.snapshot_path.display(),
                    error = %err,
                    "failed to persist image info cache"
                );
            }
            notifier.toast("All image info fetched");
            (snapshot.data, true)
        }
    };

    fs::create_dir_all(&options.cache_dir).with_context(|| {
        format!(
            "failed to create cache directory {}",
            options.cache_dir.display()
        )
    })?;
    let catalog = assemble(options, infos, fetched_remotely)?;
    info!(
        total = catalog.total,
        cached = catalog.playlist.len(),
        queued = catalog.queue.len(),
        position = catalog.playlist.position(),
        "image cache loaded"
    );
    Ok(catalog)
}

fn assemble(
    options: &CatalogOptions,
    mut infos: BTreeMap<String, String>,
    fetched_remotely: bool,
) -> Result<Catalog> {
    let total = infos.len();
    let mut kept: Vec<(ImageRecord, SystemTime)> = Vec::new();

    for entry in WalkDir::new(&options.cache_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path().to_path_buf();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let url = if kept.len() < options.max_images {
            infos.remove(&stem)
        } else {
            None
        };
        match url {
            Some(url) => {
                let created_at = file_created_at(&path);
                kept.push((
                    ImageRecord {
                        hash: stem,
                        path,
                        url,
                    },
                    created_at,
                ));
            }
            None => {
                debug!(path = %path.display(), "removing stale cached file");
                if let Err(err) = remove_if_exists(&path) {
                    warn!(path = %path.display(), error = %err, "failed to remove cached file");
                }
            }
        }
    }

    kept.sort_by_key(|(_, created_at)| *created_at);
    let mut playlist: Playlist<ImageRecord> =
        kept.into_iter().map(|(record, _)| record).collect();
    let moves = playlist.len().saturating_sub(1).min(options.threshold + 1);
    for _ in 0..moves {
        playlist.move_next();
    }

    let mut pending: Vec<ImageJob> = infos
        .into_iter()
        .map(|(hash, url)| ImageJob { hash, url })
        .collect();
    let mut rng = match options.shuffle_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    pending.shuffle(&mut rng);
    let queue = FixedQueue::from_items(pending, total)?;

    Ok(Catalog {
        playlist,
        queue,
        total,
        fetched_remotely,
    })
}

fn file_created_at(path: &Path) -> SystemTime {
    match fs::metadata(path) {
        Ok(meta) => meta
            .created()
            .or_else(|_| meta.modified())
            .unwrap_or_else(|_| SystemTime::now()),
        Err(_) => SystemTime::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(cache_dir: &Path, max_images: usize, threshold: usize) -> CatalogOptions {
        CatalogOptions {
            search: SearchOptions::default(),
            refresh_interval: None,
            snapshot_path: cache_dir.join("cache.json"),
            cache_dir: cache_dir.to_path_buf(),
            max_images,
            threshold,
            shuffle_seed: Some(7),
        }
    }

    fn infos(hashes: &[&str]) -> BTreeMap<String, String> {
        hashes
            .iter()
            .map(|h| (h.to_string(), format!("https://img/{h}.png")))
            .collect()
    }

    #[test]
    fn unknown_and_surplus_files_are_deleted() {
        let dir = tempdir().unwrap();
        for name in ["a.png", "b.png", "c.png", "stray.jpg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let known = infos(&["a", "b", "c", "d"]);
        let catalog = assemble(&options(dir.path(), 2, 0), known, false).unwrap();

        assert_eq!(catalog.playlist.len(), 2);
        assert!(!dir.path().join("stray.jpg").exists());
        let on_disk = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(on_disk, 2);
        assert_eq!(catalog.total, 4);
        assert_eq!(catalog.queue.capacity(), 4);
        assert_eq!(catalog.queue.len(), 2);
    }

    #[test]
    fn cursor_starts_past_threshold() {
        let dir = tempdir().unwrap();
        for name in ["a.png", "b.png", "c.png", "d.png", "e.png"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let known = infos(&["a", "b", "c", "d", "e"]);
        let catalog = assemble(&options(dir.path(), 5, 1), known, false).unwrap();
        assert_eq!(catalog.playlist.position(), 2);

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"x").unwrap();
        let catalog = assemble(&options(dir.path(), 5, 1), infos(&["a"]), false).unwrap();
        assert_eq!(catalog.playlist.position(), 0);
    }

    #[test]
    fn seeded_shuffle_is_deterministic() {
        let dir = tempdir().unwrap();
        let hashes: Vec<String> = (0..20).map(|i| format!("h{i:02}")).collect();
        let refs: Vec<&str> = hashes.iter().map(String::as_str).collect();
        let drain = |mut queue: FixedQueue<ImageJob>| {
            std::iter::from_fn(move || queue.dequeue().ok().map(|job| job.hash))
                .collect::<Vec<_>>()
        };
        let first = assemble(&options(dir.path(), 3, 0), infos(&refs), false).unwrap();
        let second = assemble(&options(dir.path(), 3, 0), infos(&refs), false).unwrap();
        assert_eq!(drain(first.queue), drain(second.queue));
    }
}

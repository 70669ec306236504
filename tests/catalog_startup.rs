mod common;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use common::{FakeSource, RecordingNotifier};
use config_model::SearchOptions;
use rust_wallpaper_changer::catalog::{self, CatalogOptions};
use rust_wallpaper_changer::snapshot::MetadataSnapshot;
use tempfile::tempdir;

fn options(root: &Path) -> CatalogOptions {
    CatalogOptions {
        search: SearchOptions::default(),
        refresh_interval: Some(Duration::from_secs(3600)),
        snapshot_path: root.join("cache.json"),
        cache_dir: root.join("images"),
        max_images: 3,
        threshold: 0,
        shuffle_seed: Some(1),
    }
}

fn data(hashes: &[&str]) -> BTreeMap<String, String> {
    hashes
        .iter()
        .map(|h| (h.to_string(), format!("https://img.test/{h}.png")))
        .collect()
}

fn remote() -> FakeSource {
    FakeSource::default().with_page("*", "s", 1, &["r1", "r2", "r3", "r4"])
}

#[tokio::test]
async fn fresh_matching_snapshot_skips_remote_fetch() {
    let dir = tempdir().unwrap();
    let options = options(dir.path());
    MetadataSnapshot::new(options.search.fingerprint(), data(&["a", "b"]), Utc::now())
        .save(&options.snapshot_path)
        .unwrap();
    let source = remote();
    let notifier = RecordingNotifier::default();

    let catalog = catalog::load(&options, &source, &notifier).await.unwrap();

    assert_eq!(source.request_count(), 0);
    assert!(!catalog.fetched_remotely);
    assert_eq!(catalog.total, 2);
    assert_eq!(catalog.queue.len(), 2);
    assert!(catalog.playlist.is_empty());
    assert!(notifier.contains("Wallpaper changer started"));
    assert!(options.cache_dir.is_dir());
}

#[tokio::test]
async fn fingerprint_mismatch_refetches_and_rewrites_snapshot() {
    let dir = tempdir().unwrap();
    let options = options(dir.path());
    MetadataSnapshot::new("stale-filters", data(&["a"]), Utc::now())
        .save(&options.snapshot_path)
        .unwrap();
    let source = remote();
    let notifier = RecordingNotifier::default();

    let catalog = catalog::load(&options, &source, &notifier).await.unwrap();

    assert!(source.request_count() > 0);
    assert!(catalog.fetched_remotely);
    assert_eq!(catalog.total, 4);
    assert!(notifier.contains("Fetching new image info..."));
    assert!(notifier.contains("All image info fetched"));

    let saved = MetadataSnapshot::load(&options.snapshot_path).unwrap();
    assert_eq!(saved.hash, options.search.fingerprint());
    assert_eq!(saved.data, data(&["r1", "r2", "r3", "r4"]));
    assert!(saved.timestamp.is_some());
}

#[tokio::test]
async fn expired_or_corrupt_snapshot_triggers_fetch() {
    let dir = tempdir().unwrap();
    let options = options(dir.path());
    let two_hours_ago = Utc::now() - chrono::Duration::hours(2);
    MetadataSnapshot::new(options.search.fingerprint(), data(&["a"]), two_hours_ago)
        .save(&options.snapshot_path)
        .unwrap();
    let source = remote();

    let catalog = catalog::load(&options, &source, &RecordingNotifier::default())
        .await
        .unwrap();
    assert!(catalog.fetched_remotely);
    assert_eq!(catalog.total, 4);

    std::fs::write(&options.snapshot_path, b"{ not json").unwrap();
    let source = remote();
    let catalog = catalog::load(&options, &source, &RecordingNotifier::default())
        .await
        .unwrap();
    assert!(catalog.fetched_remotely);
    assert!(source.request_count() > 0);
}

#[tokio::test]
async fn no_refresh_interval_keeps_old_snapshot() {
    let dir = tempdir().unwrap();
    let mut options = options(dir.path());
    options.refresh_interval = None;
    let long_ago = Utc::now() - chrono::Duration::days(400);
    MetadataSnapshot::new(options.search.fingerprint(), data(&["a"]), long_ago)
        .save(&options.snapshot_path)
        .unwrap();
    let source = remote();

    let catalog = catalog::load(&options, &source, &RecordingNotifier::default())
        .await
        .unwrap();

    assert_eq!(source.request_count(), 0);
    assert_eq!(catalog.total, 1);
}

#[tokio::test]
async fn cache_directory_is_reconciled_with_metadata() {
    let dir = tempdir().unwrap();
    let options = options(dir.path());
    std::fs::create_dir_all(&options.cache_dir).unwrap();
    for name in ["a.png", "b.jpg", "orphan.png"] {
        std::fs::write(options.cache_dir.join(name), b"img").unwrap();
    }
    MetadataSnapshot::new(
        options.search.fingerprint(),
        data(&["a", "b", "c", "d", "e"]),
        Utc::now(),
    )
    .save(&options.snapshot_path)
    .unwrap();

    let catalog = catalog::load(&options, &FakeSource::default(), &RecordingNotifier::default())
        .await
        .unwrap();

    assert!(!options.cache_dir.join("orphan.png").exists());
    assert_eq!(catalog.playlist.len(), 2);
    let cached: Vec<&str> = catalog.playlist.iter().map(|r| r.hash.as_str()).collect();
    assert!(cached.contains(&"a") && cached.contains(&"b"));
    assert_eq!(catalog.total, 5);
    assert_eq!(catalog.queue.capacity(), 5);
    assert_eq!(catalog.queue.len(), 3);
    // threshold 0: cursor moves min(len - 1, 1) steps.
    assert_eq!(catalog.playlist.position(), 1);
}

//! Tests for StorageBackend
//!
//! These tests verify:
//! - Automatic compaction once the WAL limit is passed
//! - Global FIFO order across compressed and WAL segments
//! - Forced compaction, cursors and in-place removal
//! - Restore vs. discard on reopen

use std::fs;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use popout::storage::{ReadOutcome, SegmentKind, StorageBackend};
use popout::{QueueConfig, QueueError, SyncStrategy};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

fn config(path: &Path, name: &str, wal_max_count: usize, compressed_max_size: u64) -> QueueConfig {
    QueueConfig::builder()
        .name(name)
        .folder(path)
        .wal_max_count(wal_max_count)
        .compressed_max_size(compressed_max_size)
        .sync_strategy(SyncStrategy::EveryWrite)
        .build()
}

fn poll_string(backend: &mut StorageBackend) -> Option<String> {
    let mut buf = BytesMut::new();
    match backend.poll_to(&mut buf).unwrap() {
        ReadOutcome::Read(_) => Some(String::from_utf8(buf.to_vec()).unwrap()),
        ReadOutcome::Exhausted => None,
    }
}

fn file_sizes(path: &Path) -> u64 {
    fs::read_dir(path)
        .unwrap()
        .map(|entry| entry.unwrap().metadata().unwrap().len())
        .sum()
}

// =============================================================================
// Write Path Tests
// =============================================================================

#[test]
fn test_compaction_on_wal_limit() {
    let (_temp, path) = setup();
    let mut backend = StorageBackend::open(&config(&path, "popa", 1, 29)).unwrap();

    backend.write(b"p").unwrap();
    assert!(path.join("popa-0.wal").exists());

    backend.write(b"o").unwrap();
    assert!(path.join("popa-0.compressed").exists());
    assert!(!path.join("popa-0.wal").exists());
    assert!(!path.join("popa-1.wal").exists());
    assert_eq!(fs::metadata(path.join("popa-0.compressed")).unwrap().len(), 29);

    backend.write(b"pa").unwrap();
    assert!(path.join("popa-2.wal").exists());

    // Reads accumulate into one buffer
    let mut buf = BytesMut::new();
    backend.poll_to(&mut buf).unwrap();
    assert_eq!(&buf[..], b"p");

    backend.poll_to(&mut buf).unwrap();
    assert_eq!(&buf[..], b"po");
    assert!(!path.join("popa-0.compressed").exists());

    backend.poll_to(&mut buf).unwrap();
    assert_eq!(&buf[..], b"popa");
    assert!(!path.join("popa-2.wal").exists());

    assert_eq!(backend.poll_to(&mut buf).unwrap(), ReadOutcome::Exhausted);
}

#[test]
fn test_disk_size_matches_files() {
    let (_temp, path) = setup();
    let mut backend = StorageBackend::open(&config(&path, "q", 1, 29)).unwrap();

    for item in ["p", "o", "pa"] {
        backend.write(item.as_bytes()).unwrap();
    }

    assert_eq!(backend.disk_size().unwrap(), 31);
    assert_eq!(backend.disk_size().unwrap(), file_sizes(&path));
}

#[test]
fn test_forced_compress_splits_by_budget() {
    let (_temp, path) = setup();
    let mut backend = StorageBackend::open(&config(&path, "q", usize::MAX, 29)).unwrap();

    for item in ["a", "b", "c", "d", "e"] {
        backend.write(item.as_bytes()).unwrap();
    }
    backend.compress().unwrap();

    assert!(backend.wal().is_empty());
    assert_eq!(backend.compressed().len(), 3);

    let polled: Vec<String> = std::iter::from_fn(|| poll_string(&mut backend)).collect();
    assert_eq!(polled, vec!["a", "b", "c", "d", "e"]);
}

#[test]
fn test_compress_with_empty_wal() {
    let (_temp, path) = setup();
    let mut backend = StorageBackend::open(&config(&path, "q", 10, 0)).unwrap();

    backend.compress().unwrap();

    assert!(backend.compressed().is_empty());
    assert!(backend.segments().unwrap().is_empty());
}

// =============================================================================
// Read Path Tests
// =============================================================================

#[test]
fn test_peek_does_not_consume() {
    let (_temp, path) = setup();
    let mut backend = StorageBackend::open(&config(&path, "q", 10, 0)).unwrap();
    backend.write(b"first").unwrap();

    let mut buf = BytesMut::new();
    assert_eq!(backend.peek_to(&mut buf).unwrap(), ReadOutcome::Read(5));
    buf.clear();
    assert_eq!(backend.peek_to(&mut buf).unwrap(), ReadOutcome::Read(5));
    assert_eq!(&buf[..], b"first");

    assert_eq!(poll_string(&mut backend).as_deref(), Some("first"));
    assert!(poll_string(&mut backend).is_none());
}

#[test]
fn test_cursor_and_remove() {
    let (_temp, path) = setup();
    let mut backend = StorageBackend::open(&config(&path, "q", 1, 0)).unwrap();
    for item in ["a", "b", "c"] {
        backend.write(item.as_bytes()).unwrap();
    }

    let mut cursor = backend.cursor();
    let mut slices = Vec::new();
    while let Some(slice) = cursor.next_slice().unwrap() {
        slices.push(slice);
    }

    let kinds: Vec<SegmentKind> = slices.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![SegmentKind::Compressed, SegmentKind::Compressed, SegmentKind::Wal]
    );

    let mut buf = BytesMut::new();
    backend.read_slice(&slices[1], &mut buf).unwrap();
    assert_eq!(&buf[..], b"b");

    backend.remove(&slices[1]).unwrap();
    assert!(matches!(
        backend.remove(&slices[1]),
        Err(QueueError::Unsupported(_))
    ));

    assert_eq!(poll_string(&mut backend).as_deref(), Some("a"));
    assert_eq!(poll_string(&mut backend).as_deref(), Some("c"));
    assert!(poll_string(&mut backend).is_none());
}

#[test]
fn test_remove_wal_slice_twice() {
    let (_temp, path) = setup();
    let mut backend = StorageBackend::open(&config(&path, "q", 10, 0)).unwrap();
    backend.write(b"x").unwrap();

    let slice = backend.peek_slice().unwrap().unwrap();
    backend.remove(&slice).unwrap();

    assert!(matches!(backend.remove(&slice), Err(QueueError::Unsupported(_))));
    assert!(backend.peek_slice().unwrap().is_none());
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_restore_from_disk() {
    let (_temp, path) = setup();
    {
        let mut backend = StorageBackend::open(&config(&path, "q", 1, 0)).unwrap();
        for item in ["a", "b", "c"] {
            backend.write(item.as_bytes()).unwrap();
        }
        poll_string(&mut backend);
    }

    let mut backend = StorageBackend::open(&config(&path, "q", 1, 0)).unwrap();
    assert_eq!(poll_string(&mut backend).as_deref(), Some("b"));
    assert_eq!(poll_string(&mut backend).as_deref(), Some("c"));
    assert!(poll_string(&mut backend).is_none());
}

#[test]
fn test_discard_on_reopen() {
    let (_temp, path) = setup();
    {
        let mut backend = StorageBackend::open(&config(&path, "q", 1, 0)).unwrap();
        for item in ["a", "b", "c"] {
            backend.write(item.as_bytes()).unwrap();
        }
    }

    let mut config = config(&path, "q", 1, 0);
    config.restore_from_disk = false;
    let mut backend = StorageBackend::open(&config).unwrap();

    assert!(backend.segments().unwrap().is_empty());
    assert!(poll_string(&mut backend).is_none());
    assert_eq!(file_sizes(&path), 0);
}

#[test]
fn test_segments_listing() {
    let (_temp, path) = setup();
    let mut backend = StorageBackend::open(&config(&path, "q", 1, 0)).unwrap();
    for item in ["a", "b", "c"] {
        backend.write(item.as_bytes()).unwrap();
    }

    let segments = backend.segments().unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].kind, SegmentKind::Compressed);
    assert_eq!(segments[0].size, 10 + 10 + 9);
    assert_eq!(segments[1].kind, SegmentKind::Wal);
    assert_eq!(segments[1].path, path.join("q-2.wal"));
}

//! Tests for SyncedQueue
//!
//! These tests verify:
//! - FIFO order through compaction
//! - Record layout of a single item
//! - Restore on reopen
//! - Cursor iteration with in-place removal
//! - Undecodable records under each corruption policy
//! - Concurrent producers

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use popout::{Bincode, CorruptionPolicy, QueueConfig, SyncStrategy, SyncedQueue};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

fn config(path: &Path, wal_max_count: usize) -> QueueConfig {
    QueueConfig::builder()
        .name("q")
        .folder(path)
        .wal_max_count(wal_max_count)
        .sync_strategy(SyncStrategy::EveryWrite)
        .build()
}

fn drain<T: popout::Codec + Send>(queue: &SyncedQueue<T>) -> Vec<T> {
    std::iter::from_fn(|| queue.poll().unwrap()).collect()
}

// =============================================================================
// Basic Operation Tests
// =============================================================================

#[test]
fn test_offer_poll_fifo() {
    let (_temp, path) = setup();
    let queue = SyncedQueue::<String>::open(config(&path, 10)).unwrap();

    for item in ["first", "second", "third"] {
        assert!(queue.offer(item.to_string()).unwrap());
    }

    assert_eq!(queue.len(), 3);
    assert_eq!(queue.peek().unwrap().as_deref(), Some("first"));
    assert_eq!(queue.len(), 3);
    assert_eq!(drain(&queue), vec!["first", "second", "third"]);
    assert!(queue.is_empty());
    assert!(queue.poll().unwrap().is_none());
}

#[test]
fn test_record_layout() {
    let (_temp, path) = setup();
    let queue = SyncedQueue::<u16>::open(config(&path, 10)).unwrap();

    queue.offer(0x0102).unwrap();

    assert_eq!(fs::read(path.join("q-0.wal")).unwrap(), vec![0, 0, 0, 2, 1, 2]);
    assert_eq!(queue.disk_size().unwrap(), 6);
}

#[test]
fn test_fifo_across_compaction() {
    let (_temp, path) = setup();
    let queue = SyncedQueue::<u32>::open(config(&path, 2)).unwrap();

    for i in 0..20 {
        queue.offer(i).unwrap();
    }
    assert!(queue.with_backend(|backend| backend.compressed().len()) > 0);

    assert_eq!(queue.len(), 20);
    assert_eq!(drain(&queue), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_compress_keeps_order() {
    let (_temp, path) = setup();
    let queue = SyncedQueue::<u32>::open(config(&path, 100)).unwrap();
    for i in 0..10 {
        queue.offer(i).unwrap();
    }

    queue.compress().unwrap();
    assert!(queue.with_backend(|backend| backend.wal().is_empty()));

    queue.offer(10).unwrap();
    assert_eq!(drain(&queue), (0..=10).collect::<Vec<_>>());
}

#[test]
fn test_clear() {
    let (_temp, path) = setup();
    let queue = SyncedQueue::<u32>::open(config(&path, 2)).unwrap();
    for i in 0..5 {
        queue.offer(i).unwrap();
    }

    queue.clear().unwrap();

    assert!(queue.is_empty());
    assert_eq!(queue.disk_size().unwrap(), 0);
    assert!(queue.poll().unwrap().is_none());
}

#[test]
fn test_serde_items() {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Job {
        id: u64,
        name: String,
    }

    let (_temp, path) = setup();
    let queue = SyncedQueue::<Bincode<Job>>::open(config(&path, 10)).unwrap();
    let job = Job {
        id: 42,
        name: "resize".to_string(),
    };

    queue.offer(Bincode(job.clone())).unwrap();

    assert_eq!(queue.poll().unwrap(), Some(Bincode(job)));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_restore_on_reopen() {
    let (_temp, path) = setup();
    {
        let queue = SyncedQueue::<u32>::open(config(&path, 3)).unwrap();
        for i in 0..10 {
            queue.offer(i).unwrap();
        }
        queue.poll().unwrap();
        queue.close().unwrap();
    }

    let queue = SyncedQueue::<u32>::open(config(&path, 3)).unwrap();
    assert_eq!(queue.len(), 9);
    assert_eq!(drain(&queue), (1..10).collect::<Vec<_>>());
}

#[test]
fn test_discard_on_reopen() {
    let (_temp, path) = setup();
    {
        let queue = SyncedQueue::<u32>::open(config(&path, 3)).unwrap();
        for i in 0..10 {
            queue.offer(i).unwrap();
        }
    }

    let mut config = config(&path, 3);
    config.restore_from_disk = false;
    let queue = SyncedQueue::<u32>::open(config).unwrap();

    assert!(queue.is_empty());
    assert_eq!(queue.disk_size().unwrap(), 0);
}

// =============================================================================
// Cursor Tests
// =============================================================================

#[test]
fn test_cursor_remove() {
    let (_temp, path) = setup();
    let queue = SyncedQueue::<String>::open(config(&path, 1)).unwrap();
    for item in ["a", "b", "c"] {
        queue.offer(item.to_string()).unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor = queue.cursor();
    while let Some(entry) = cursor.next() {
        let (slice, item) = entry.unwrap();
        if item == "b" {
            cursor.remove(&slice).unwrap();
        }
        seen.push(item);
    }
    drop(cursor);

    assert_eq!(seen, vec!["a", "b", "c"]);
    assert_eq!(queue.len(), 2);
    assert_eq!(drain(&queue), vec!["a", "c"]);
}

#[test]
fn test_cursor_survives_reopen() {
    let (_temp, path) = setup();
    {
        let queue = SyncedQueue::<u32>::open(config(&path, 2)).unwrap();
        for i in 0..6 {
            queue.offer(i).unwrap();
        }
        let mut cursor = queue.cursor();
        while let Some(entry) = cursor.next() {
            let (slice, item) = entry.unwrap();
            if item % 2 == 1 {
                cursor.remove(&slice).unwrap();
            }
        }
    }

    let queue = SyncedQueue::<u32>::open(config(&path, 2)).unwrap();
    assert_eq!(queue.len(), 3);
    assert_eq!(drain(&queue), vec![0, 2, 4]);
}

// =============================================================================
// Corruption Tests
// =============================================================================

/// A record claiming 9 bytes that holds only 1
fn write_bad_record(path: &Path) {
    fs::write(path.join("q-0.wal"), [0u8, 0, 0, 9, 1]).unwrap();
}

#[test]
fn test_undecodable_item_is_discarded() {
    let (_temp, path) = setup();
    write_bad_record(&path);

    let queue = SyncedQueue::<u16>::open(config(&path, 10)).unwrap();
    queue.offer(7).unwrap();
    assert_eq!(queue.len(), 2);

    assert_eq!(queue.poll().unwrap(), Some(7));
    assert!(queue.is_empty());
    assert!(!path.join("q-0.wal").exists());
}

#[test]
fn test_undecodable_item_with_fail_policy() {
    let (_temp, path) = setup();
    write_bad_record(&path);

    let mut config = config(&path, 10);
    config.corruption_policy = CorruptionPolicy::Fail;
    let queue = SyncedQueue::<u16>::open(config).unwrap();
    queue.offer(7).unwrap();

    assert!(queue.peek().unwrap_err().is_corruption());
    assert!(queue.poll().unwrap_err().is_corruption());
    assert!(path.join("q-0.wal").exists());
    assert_eq!(queue.len(), 2);
}

// =============================================================================
// Write Failure Tests
// =============================================================================

/// Swap the compressed folder for a plain file so compaction cannot create segments
fn block_folder(folder: &Path) {
    fs::remove_dir_all(folder).unwrap();
    fs::write(folder, b"").unwrap();
}

fn unblock_folder(folder: &Path) {
    fs::remove_file(folder).unwrap();
    fs::create_dir(folder).unwrap();
}

#[test]
fn test_failed_compaction_still_counts_written_item() {
    let (_temp, path) = setup();
    let compressed = path.join("compressed");
    let config = QueueConfig::builder()
        .name("q")
        .folder(&path)
        .compressed_folder(&compressed)
        .wal_max_count(1)
        .build();
    let queue = SyncedQueue::<u32>::open(config).unwrap();

    queue.offer(1).unwrap();
    block_folder(&compressed);

    // The WAL write lands before compaction fails
    assert!(queue.offer(2).is_err());
    assert_eq!(queue.len(), 2);

    unblock_folder(&compressed);
    assert_eq!(drain(&queue), vec![1, 2]);
    assert!(queue.is_empty());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_producers() {
    let (_temp, path) = setup();
    let mut config = config(&path, 8);
    config.sync_strategy = SyncStrategy::OsManaged;
    let queue = Arc::new(SyncedQueue::<u32>::open(config).unwrap());

    std::thread::scope(|scope| {
        for producer in 0..4u32 {
            let queue = Arc::clone(&queue);
            scope.spawn(move || {
                for i in 0..50 {
                    queue.offer(producer * 1000 + i).unwrap();
                }
            });
        }
    });

    assert_eq!(queue.len(), 200);
    let items = drain(&queue);
    assert_eq!(items.len(), 200);

    // Each producer's items keep their relative order
    for producer in 0..4u32 {
        let own: Vec<u32> = items
            .iter()
            .copied()
            .filter(|item| item / 1000 == producer)
            .collect();
        assert_eq!(own, (0..50).map(|i| producer * 1000 + i).collect::<Vec<_>>());
    }
}

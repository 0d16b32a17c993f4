//! Tests for WalSegments
//!
//! These tests verify:
//! - One file per write, content stored verbatim
//! - Peek/poll order and deletion on poll
//! - Limit detection
//! - Empty (never written) segments under each corruption policy

use std::fs;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use popout::config::{CorruptionPolicy, SyncStrategy};
use popout::storage::{ReadOutcome, SegmentKind, WalSegments};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_wal(path: &Path, max_count: usize, policy: CorruptionPolicy) -> WalSegments {
    WalSegments::open(path, "q", max_count, SyncStrategy::EveryWrite, policy).unwrap()
}

fn setup() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

// =============================================================================
// Write Tests
// =============================================================================

#[test]
fn test_write_creates_one_file_per_call() {
    let (_temp, path) = setup();
    let mut wal = open_wal(&path, 10, CorruptionPolicy::Discard);

    let first = wal.write(b"hello").unwrap();
    let second = wal.write(b"world!").unwrap();

    assert_eq!(first, path.join("q-0.wal"));
    assert_eq!(second, path.join("q-1.wal"));
    assert_eq!(fs::read(&first).unwrap(), b"hello");
    assert_eq!(wal.len(), 2);
    assert_eq!(wal.disk_size().unwrap(), 11);
}

#[test]
fn test_limit_exceeded_after_max_count() {
    let (_temp, path) = setup();
    let mut wal = open_wal(&path, 2, CorruptionPolicy::Discard);

    wal.write(b"a").unwrap();
    wal.write(b"b").unwrap();
    assert!(!wal.is_limit_exceeded());

    wal.write(b"c").unwrap();
    assert!(wal.is_limit_exceeded());
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_peek_keeps_and_poll_deletes() {
    let (_temp, path) = setup();
    let mut wal = open_wal(&path, 10, CorruptionPolicy::Discard);
    wal.write(b"one").unwrap();
    wal.write(b"two").unwrap();

    let mut buf = BytesMut::new();
    assert_eq!(wal.peek_to(&mut buf).unwrap(), ReadOutcome::Read(3));
    assert_eq!(&buf[..], b"one");
    assert!(path.join("q-0.wal").exists());

    buf.clear();
    assert_eq!(wal.poll_to(&mut buf).unwrap(), ReadOutcome::Read(3));
    assert_eq!(&buf[..], b"one");
    assert!(!path.join("q-0.wal").exists());

    // Reads append to the buffer
    assert_eq!(wal.poll_to(&mut buf).unwrap(), ReadOutcome::Read(3));
    assert_eq!(&buf[..], b"onetwo");

    assert_eq!(wal.poll_to(&mut buf).unwrap(), ReadOutcome::Exhausted);
}

#[test]
fn test_peek_slice_covers_whole_file() {
    let (_temp, path) = setup();
    let mut wal = open_wal(&path, 10, CorruptionPolicy::Discard);
    wal.write(b"abcd").unwrap();

    let slice = wal.peek_slice().unwrap().unwrap();
    assert_eq!(slice.path, path.join("q-0.wal"));
    assert_eq!(slice.offset, 0);
    assert_eq!(slice.len, 4);
    assert_eq!(slice.kind, SegmentKind::Wal);
}

#[test]
fn test_restores_existing_segments() {
    let (_temp, path) = setup();
    {
        let mut wal = open_wal(&path, 10, CorruptionPolicy::Discard);
        wal.write(b"a").unwrap();
        wal.write(b"b").unwrap();
    }

    let mut wal = open_wal(&path, 10, CorruptionPolicy::Discard);
    assert_eq!(wal.len(), 2);
    assert_eq!(wal.write(b"c").unwrap(), path.join("q-2.wal"));

    let mut buf = BytesMut::new();
    while wal.poll_to(&mut buf).unwrap() != ReadOutcome::Exhausted {}
    assert_eq!(&buf[..], b"abc");
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_empty_segment_is_discarded() {
    let (_temp, path) = setup();
    fs::write(path.join("q-0.wal"), b"").unwrap();
    fs::write(path.join("q-1.wal"), b"ok").unwrap();

    let mut wal = open_wal(&path, 10, CorruptionPolicy::Discard);
    let mut buf = BytesMut::new();

    assert_eq!(wal.peek_to(&mut buf).unwrap(), ReadOutcome::Read(2));
    assert_eq!(&buf[..], b"ok");
    assert!(!path.join("q-0.wal").exists());
}

#[test]
fn test_empty_segment_fails_with_fail_policy() {
    let (_temp, path) = setup();
    fs::write(path.join("q-0.wal"), b"").unwrap();

    let mut wal = open_wal(&path, 10, CorruptionPolicy::Fail);
    let err = wal.poll_to(&mut BytesMut::new()).unwrap_err();

    assert!(err.is_corruption());
    assert!(path.join("q-0.wal").exists());
}

//! Tests for FilesManager
//!
//! These tests verify:
//! - Discovery of existing files ordered by numeric index
//! - Index allocation that never reuses an existing file
//! - Removal and clearing

use std::fs;
use std::path::{Path, PathBuf};

use popout::storage::FilesManager;
use popout::QueueError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_folder() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

fn touch(folder: &Path, name: &str) {
    fs::write(folder.join(name), b"x").unwrap();
}

fn names(manager: &FilesManager) -> Vec<String> {
    manager
        .files()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_empty_folder() {
    let (_temp, path) = setup_temp_folder();
    let manager = FilesManager::open(&path, "q-", ".wal").unwrap();

    assert!(manager.is_empty());
    assert_eq!(manager.next_index(), 0);
    assert!(manager.peek().is_none());
}

#[test]
fn test_open_creates_folder() {
    let (_temp, path) = setup_temp_folder();
    let nested = path.join("a").join("b");

    FilesManager::open(&nested, "q-", ".wal").unwrap();

    assert!(nested.is_dir());
}

#[test]
fn test_open_orders_by_numeric_index() {
    let (_temp, path) = setup_temp_folder();
    for name in ["q-2.wal", "q-10.wal", "q-1.wal", "q-x.wal", "other-3.wal", "q-4.compressed"] {
        touch(&path, name);
    }

    let manager = FilesManager::open(&path, "q-", ".wal").unwrap();

    assert_eq!(names(&manager), vec!["q-1.wal", "q-2.wal", "q-10.wal"]);
    assert_eq!(manager.next_index(), 11);
}

// =============================================================================
// Create Tests
// =============================================================================

#[test]
fn test_create_next_file_increments() {
    let (_temp, path) = setup_temp_folder();
    let mut manager = FilesManager::open(&path, "q-", ".wal").unwrap();

    let first = manager.create_next_file().unwrap();
    let second = manager.create_next_file().unwrap();

    assert_eq!(first, path.join("q-0.wal"));
    assert_eq!(second, path.join("q-1.wal"));
    assert!(first.exists());
    assert_eq!(fs::metadata(&first).unwrap().len(), 0);
    assert_eq!(manager.len(), 2);
}

#[test]
fn test_create_next_file_skips_existing() {
    let (_temp, path) = setup_temp_folder();
    let mut manager = FilesManager::open(&path, "q-", ".wal").unwrap();

    // Appears after the scan
    touch(&path, "q-0.wal");

    let created = manager.create_next_file().unwrap();
    assert_eq!(created, path.join("q-1.wal"));
    assert_eq!(fs::read(path.join("q-0.wal")).unwrap(), b"x");
}

// =============================================================================
// Peek/Poll/Remove Tests
// =============================================================================

#[test]
fn test_peek_and_poll_oldest() {
    let (_temp, path) = setup_temp_folder();
    let mut manager = FilesManager::open(&path, "q-", ".wal").unwrap();
    let first = manager.create_next_file().unwrap();
    let second = manager.create_next_file().unwrap();

    assert_eq!(manager.peek(), Some(first.as_path()));
    assert_eq!(manager.poll(), Some(first.clone()));
    assert_eq!(manager.peek(), Some(second.as_path()));

    // Polling only untracks
    assert!(first.exists());
}

#[test]
fn test_remove_deletes_and_untracks() {
    let (_temp, path) = setup_temp_folder();
    let mut manager = FilesManager::open(&path, "q-", ".wal").unwrap();
    let first = manager.create_next_file().unwrap();
    let second = manager.create_next_file().unwrap();

    manager.remove(&[first.clone()]).unwrap();

    assert!(!first.exists());
    assert_eq!(manager.len(), 1);
    assert_eq!(manager.peek(), Some(second.as_path()));
}

#[test]
fn test_remove_missing_file_is_not_an_error() {
    let (_temp, path) = setup_temp_folder();
    let mut manager = FilesManager::open(&path, "q-", ".wal").unwrap();
    let first = manager.create_next_file().unwrap();
    fs::remove_file(&first).unwrap();

    manager.remove(&[first, path.join("q-99.wal")]).unwrap();
    assert!(manager.is_empty());
}

#[test]
fn test_clear_resets_index() {
    let (_temp, path) = setup_temp_folder();
    let mut manager = FilesManager::open(&path, "q-", ".wal").unwrap();
    for _ in 0..3 {
        manager.create_next_file().unwrap();
    }

    manager.clear().unwrap();

    assert!(manager.is_empty());
    assert_eq!(manager.next_index(), 0);
    assert!(!path.join("q-2.wal").exists());
    assert_eq!(manager.create_next_file().unwrap(), path.join("q-0.wal"));
}

// =============================================================================
// Index Tests
// =============================================================================

#[test]
fn test_index_of() {
    let (_temp, path) = setup_temp_folder();
    let manager = FilesManager::open(&path, "q-", ".wal").unwrap();

    assert_eq!(manager.index_of(&path.join("q-17.wal")).unwrap(), 17);
    assert_eq!(manager.path_for(17), path.join("q-17.wal"));

    let err = manager.index_of(&path.join("q-17.txt")).unwrap_err();
    assert!(matches!(err, QueueError::InvalidName(_)));
}

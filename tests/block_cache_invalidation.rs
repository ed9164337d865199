//! Block Cache Coherence Tests
//!
//! Tests for:
//! - Writes overlapping a cached block evict it
//! - A block cached while partially filled is refreshed after a flush
//! - Reads never return stale bytes

use revstore::storage::{AppendLogFile, RECORD_HEADER_SIZE};
use revstore::LogFileConfig;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

const HEADER: [u8; RECORD_HEADER_SIZE] = [0; RECORD_HEADER_SIZE];
const BLOCK: u64 = 16;

fn open_with_cache(dir: &TempDir, capacity: usize) -> AppendLogFile {
    let config = LogFileConfig::default()
        .with_buffer_capacity(64)
        .with_block_size(BLOCK)
        .with_block_cache(true, capacity)
        .with_sync_on_flush(false);
    AppendLogFile::open_with_config(dir.path().join("revisions.log"), &config).unwrap()
}

// =============================================================================
// Invalidation
// =============================================================================

/// An append covering a cached block makes the next read a miss.
#[test]
fn test_overlapping_append_evicts_block() {
    let temp_dir = TempDir::new().unwrap();
    let log = open_with_cache(&temp_dir, 8);

    log.append(&HEADER, &[1u8; 10]).unwrap();
    log.flush().unwrap();

    assert_eq!(log.read(0, 10).unwrap(), vec![1u8; 10]);
    assert!(log.is_block_cached(0).unwrap());
    assert_eq!(log.metrics().snapshot().cache_misses, 1);

    log.append(&HEADER, &[2u8; 10]).unwrap();
    assert!(!log.is_block_cached(0).unwrap());
    assert!(log.metrics().snapshot().cache_invalidations >= 1);

    let bytes = log.read(0, 20).unwrap();
    assert_eq!(&bytes[..10], &[1u8; 10]);
    assert_eq!(&bytes[10..], &[2u8; 10]);
    assert_eq!(log.metrics().snapshot().cache_misses, 2);
}

/// A short tail block cached before a flush is reloaded afterwards.
#[test]
fn test_partial_block_refreshed_after_flush() {
    let temp_dir = TempDir::new().unwrap();
    let log = open_with_cache(&temp_dir, 8);

    log.append(&HEADER, &[1u8; 10]).unwrap();
    log.flush().unwrap();
    log.append(&HEADER, &[2u8; 10]).unwrap();

    // Block 0 is cached holding only the 10 durable bytes
    log.read(0, 20).unwrap();
    assert!(log.is_block_cached(0).unwrap());

    log.flush().unwrap();
    assert!(!log.is_block_cached(0).unwrap());

    let bytes = log.read(0, 20).unwrap();
    assert_eq!(&bytes[..10], &[1u8; 10]);
    assert_eq!(&bytes[10..], &[2u8; 10]);
    assert!(log.is_block_cached(0).unwrap());
    assert!(log.is_block_cached(1).unwrap());
}

/// Untouched blocks stay cached across appends elsewhere.
#[test]
fn test_disjoint_append_keeps_block() {
    let temp_dir = TempDir::new().unwrap();
    let log = open_with_cache(&temp_dir, 8);

    log.append(&HEADER, &[1u8; 32]).unwrap();
    log.flush().unwrap();
    log.read(0, 16).unwrap();
    assert!(log.is_block_cached(0).unwrap());

    log.append(&HEADER, &[2u8; 8]).unwrap();
    assert!(log.is_block_cached(0).unwrap());

    log.read(0, 16).unwrap();
    assert_eq!(log.metrics().snapshot().cache_hits, 1);
}

// =============================================================================
// Capacity
// =============================================================================

/// The least recently used block is evicted at capacity.
#[test]
fn test_lru_eviction() {
    let temp_dir = TempDir::new().unwrap();
    let log = open_with_cache(&temp_dir, 2);

    log.append(&HEADER, &[3u8; 48]).unwrap();
    log.flush().unwrap();

    log.read(0, 1).unwrap();
    log.read(16, 1).unwrap();
    log.read(0, 1).unwrap(); // block 0 now most recent
    log.read(32, 1).unwrap(); // evicts block 1

    assert!(log.is_block_cached(0).unwrap());
    assert!(!log.is_block_cached(1).unwrap());
    assert!(log.is_block_cached(2).unwrap());
    assert_eq!(log.cached_blocks().unwrap(), 2);
    assert_eq!(log.metrics().snapshot().cache_evictions, 1);
}

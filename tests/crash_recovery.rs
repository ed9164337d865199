//! Crash Point Recovery Tests
//!
//! Each test re-runs this test binary as a child process with
//! `REVSTORE_CRASH_POINT` set. The child aborts inside `flush`, and the
//! parent reopens the log to check what survived.
//!
//! - Crash after data write: the batch is discarded
//! - Crash after superblock write: the batch is durable

use revstore::crash_point::{points, CRASH_POINT_ENV};
use revstore::storage::{AppendLogFile, RECORD_HEADER_SIZE};
use revstore::LogFileConfig;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

const CHILD_DIR_ENV: &str = "REVSTORE_CRASH_TEST_DIR";
const HEADER: [u8; RECORD_HEADER_SIZE] = [0x11; RECORD_HEADER_SIZE];

fn test_config() -> LogFileConfig {
    LogFileConfig::default().with_buffer_capacity(1024)
}

/// Runs `crash_child_workload` in a subprocess that aborts at `point`.
fn run_child(point: &str, dir: &Path) -> bool {
    let exe = std::env::current_exe().expect("test binary path");
    let status = Command::new(exe)
        .args(["crash_child_workload", "--exact", "--nocapture", "--test-threads=1"])
        .env(CRASH_POINT_ENV, point)
        .env(CHILD_DIR_ENV, dir)
        .status()
        .expect("Failed to spawn child");
    !status.success()
}

/// Workload executed in the child; a no-op in a normal test run.
#[test]
fn crash_child_workload() {
    let dir = match std::env::var(CHILD_DIR_ENV) {
        Ok(dir) => dir,
        Err(_) => return,
    };
    let log =
        AppendLogFile::open_with_config(Path::new(&dir).join("revisions.log"), &test_config())
            .unwrap();
    log.append(&HEADER, b"batch one").unwrap();
    log.flush().unwrap();
    unreachable!("crash point should have aborted the process");
}

// =============================================================================
// Crash Scenarios
// =============================================================================

#[test]
fn test_crash_after_data_write_discards_batch() {
    let temp_dir = TempDir::new().unwrap();
    assert!(run_child(points::LOG_AFTER_DATA_WRITE, temp_dir.path()));

    let log =
        AppendLogFile::open_with_config(temp_dir.path().join("revisions.log"), &test_config())
            .unwrap();
    assert_eq!(log.size().unwrap(), 0);
    assert_eq!(
        std::fs::metadata(log.path()).unwrap().len(),
        log.superblock_size()
    );
}

#[test]
fn test_crash_after_superblock_write_keeps_batch() {
    let temp_dir = TempDir::new().unwrap();
    assert!(run_child(points::LOG_AFTER_SUPERBLOCK_WRITE, temp_dir.path()));

    let log =
        AppendLogFile::open_with_config(temp_dir.path().join("revisions.log"), &test_config())
            .unwrap();
    assert_eq!(log.size().unwrap(), 9);
    assert_eq!(log.read(0, 9).unwrap(), b"batch one".to_vec());
    assert_eq!(log.header().unwrap(), HEADER.to_vec());
}

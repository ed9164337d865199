//! Crash point injection for durability testing
//!
//! When `REVSTORE_CRASH_POINT` names a crash point, reaching it terminates
//! the process via `std::process::abort()`: no cleanup, no unwinding, no
//! buffered data flushed. A harness runs the workload in a subprocess,
//! lets it die at the point, then reopens the file and checks recovery.
//!
//! ```bash
//! REVSTORE_CRASH_POINT=log_after_data_write ./my-workload
//! ```

use std::sync::OnceLock;

use crate::observability::Logger;

/// Name of the environment variable selecting the crash point
pub const CRASH_POINT_ENV: &str = "REVSTORE_CRASH_POINT";

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var(CRASH_POINT_ENV).ok())
        .as_deref()
}

/// Returns true if `REVSTORE_CRASH_POINT` equals the given name.
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Abort the process if the named crash point is enabled.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        Logger::fatal("CRASH_POINT_TRIGGERED", &[("point", name)]);
        std::process::abort();
    }
}

/// All defined crash point names
pub mod points {
    /// Flush wrote (and synced) the pending data but not the superblock
    pub const LOG_AFTER_DATA_WRITE: &str = "log_after_data_write";
    /// Flush wrote (and synced) the superblock
    pub const LOG_AFTER_SUPERBLOCK_WRITE: &str = "log_after_superblock_write";

    pub fn all() -> &'static [&'static str] {
        &[LOG_AFTER_DATA_WRITE, LOG_AFTER_SUPERBLOCK_WRITE]
    }
}

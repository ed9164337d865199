//! revstore - An append-only revision log for document stores
//!
//! Documents and their revisions are encoded as key and value records and
//! appended to a single log file. The file is written through an in-memory
//! buffer and read back through a block cache.

pub mod compression;
pub mod config;
pub mod crash_point;
pub mod observability;
pub mod storage;

pub use compression::{Compressor, Lz4Compressor};
pub use config::LogFileConfig;
pub use storage::{AppendLogFile, StorageError, StorageErrorCode, StorageResult};

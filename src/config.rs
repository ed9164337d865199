//! Append log file configuration
//!
//! Loaded from a JSON file or built in code. Every field has a default, so
//! a config file only needs to name what it overrides.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::{StorageError, StorageResult, RECORD_HEADER_SIZE};

/// Default block size used for cache addressing (64 MiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// Default maximum number of cached blocks
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100_000;

/// Default pending buffer capacity (512 MiB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 512 * 1024 * 1024;

/// Largest header a superblock may carry
pub const MAX_HEADER_SIZE: usize = 4096;

/// Configuration for one `AppendLogFile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFileConfig {
    /// Partition size of the data region for cache addressing
    #[serde(default = "default_block_size")]
    pub block_size: u64,

    /// Whether durable blocks are cached in memory
    #[serde(default = "default_block_cache_enabled")]
    pub block_cache_enabled: bool,

    /// Maximum number of cached blocks
    #[serde(default = "default_block_cache_capacity")]
    pub block_cache_capacity: usize,

    /// Bytes of appended payload held in memory before a flush
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Fixed size of every write batch header
    #[serde(default = "default_header_size")]
    pub header_size: usize,

    /// fsync after the data write and after the superblock write
    #[serde(default = "default_sync_on_flush")]
    pub sync_on_flush: bool,
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}
fn default_block_cache_enabled() -> bool {
    true
}
fn default_block_cache_capacity() -> usize {
    DEFAULT_BLOCK_CACHE_CAPACITY
}
fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}
fn default_header_size() -> usize {
    RECORD_HEADER_SIZE
}
fn default_sync_on_flush() -> bool {
    true
}

impl Default for LogFileConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            block_cache_enabled: default_block_cache_enabled(),
            block_cache_capacity: default_block_cache_capacity(),
            buffer_capacity: default_buffer_capacity(),
            header_size: default_header_size(),
            sync_on_flush: default_sync_on_flush(),
        }
    }
}

impl LogFileConfig {
    /// Load configuration from a JSON file and validate it
    pub fn load(path: &Path) -> StorageResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StorageError::invalid_config(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON text and validate it
    pub fn from_json(content: &str) -> StorageResult<Self> {
        let config: LogFileConfig = serde_json::from_str(content)
            .map_err(|e| StorageError::invalid_config(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.block_size == 0 {
            return Err(StorageError::invalid_config("block_size must be > 0"));
        }
        if self.buffer_capacity == 0 {
            return Err(StorageError::invalid_config("buffer_capacity must be > 0"));
        }
        if self.block_cache_enabled && self.block_cache_capacity == 0 {
            return Err(StorageError::invalid_config(
                "block_cache_capacity must be > 0 when the block cache is enabled",
            ));
        }
        if self.header_size == 0 || self.header_size > MAX_HEADER_SIZE {
            return Err(StorageError::invalid_config(format!(
                "header_size must be in 1..={}, got {}",
                MAX_HEADER_SIZE, self.header_size
            )));
        }
        Ok(())
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_block_cache(mut self, enabled: bool, capacity: usize) -> Self {
        self.block_cache_enabled = enabled;
        self.block_cache_capacity = capacity;
        self
    }

    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    pub fn with_header_size(mut self, header_size: usize) -> Self {
        self.header_size = header_size;
        self
    }

    pub fn with_sync_on_flush(mut self, sync_on_flush: bool) -> Self {
        self.sync_on_flush = sync_on_flush;
        self
    }
}

//! Buffered append-only log file
//!
//! ```text
//! [0, superblock_size)        two superblock slots, alternately rewritten
//! [superblock_size, EOF)      data region, grows only by appending
//! ```
//!
//! Appended payloads are staged in a pending buffer and written to disk in
//! batches: when the next payload would overflow the buffer, on `flush()`,
//! and on `close()`. A flush writes the data first, then the superblock
//! describing it, so a crash at any point leaves a file whose superblock
//! only describes bytes that are present.
//!
//! Offsets handed out by `append` are logical: they address the data region
//! and span both durable and pending bytes. Logical offset 0 is the first
//! byte after the superblock.
//!
//! # Locking
//!
//! One `RwLock` guards the file handle, pending buffer, pending header, and
//! durable length together. `append`, `flush` and `close` take it
//! exclusively; `size`, `read` and the other queries take it shared. The
//! block cache has its own inner mutex so shared readers can populate it.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::buffer::ByteBuffer;
use super::cache::{BlockBytes, BlockCache};
use super::errors::{StorageError, StorageResult};
use super::superblock::Superblock;
use crate::config::LogFileConfig;
use crate::crash_point::{maybe_crash, points};
use crate::observability::{LogMetrics, Logger};

/// Pending buffer allocation at open; it grows on demand up to capacity.
const INITIAL_PENDING_CAPACITY: usize = 64 * 1024;

/// Mutable state guarded by the buffer lock.
struct LogState {
    file: File,
    pending: ByteBuffer,
    pending_header: Vec<u8>,
    /// Data-region bytes durable on disk
    disk_len: u64,
    /// Generation of the newest superblock on disk
    generation: u64,
    cache: Option<BlockCache>,
    /// Set after an I/O failure during flush
    failed: bool,
}

impl LogState {
    fn logical_size(&self) -> u64 {
        self.disk_len + self.pending.len() as u64
    }
}

/// Append-only log file with write buffering and a block read cache.
pub struct AppendLogFile {
    path: PathBuf,
    config: LogFileConfig,
    superblock_size: u64,
    metrics: LogMetrics,
    state: RwLock<Option<LogState>>,
}

impl AppendLogFile {
    /// Opens or creates the log file at `path`.
    ///
    /// Uses the default header size; see [`AppendLogFile::open_with_config`].
    pub fn open(
        path: impl AsRef<Path>,
        block_size: u64,
        cache_enabled: bool,
        cache_capacity: usize,
        buffer_capacity: usize,
    ) -> StorageResult<Self> {
        let config = LogFileConfig::default()
            .with_block_size(block_size)
            .with_block_cache(cache_enabled, cache_capacity)
            .with_buffer_capacity(buffer_capacity);
        Self::open_with_config(path, &config)
    }

    /// Opens or creates the log file at `path`.
    ///
    /// A new file gets an empty superblock. An existing file is validated
    /// against its superblock: data bytes beyond what the superblock
    /// describes are truncated away, missing data is corruption.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the config fails validation or the file was
    ///   written with a different header size
    /// - `DataCorruption` if the superblock is damaged or describes data
    ///   that is not on disk
    /// - `IoFailure` on any file system error
    pub fn open_with_config(path: impl AsRef<Path>, config: &LogFileConfig) -> StorageResult<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let path_str = path.display().to_string();
        let superblock_size = Superblock::region_size_for(config.header_size) as u64;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                StorageError::io_error(format!("Failed to open log file: {}", path_str), e)
            })?;

        let file_len = file
            .metadata()
            .map_err(|e| StorageError::io_error("Failed to read log file metadata", e))?
            .len();

        let superblock = if file_len == 0 {
            let superblock = Superblock::empty(config.header_size);
            write_at(&mut file, 0, &Superblock::encode_initial_region(config.header_size))
                .and_then(|_| file.sync_all())
                .map_err(|e| StorageError::io_error("Failed to initialise superblock", e))?;
            Logger::info("LOG_FILE_CREATED", &[("path", path_str.as_str())]);
            superblock
        } else {
            Self::recover(&mut file, &path_str, file_len, superblock_size, config)?
        };

        let cache = if config.block_cache_enabled {
            Some(BlockCache::new(config.block_cache_capacity))
        } else {
            None
        };

        Logger::info(
            "LOG_FILE_OPENED",
            &[
                ("data_len", superblock.data_len.to_string().as_str()),
                ("path", path_str.as_str()),
            ],
        );

        let state = LogState {
            file,
            pending: ByteBuffer::with_capacity(config.buffer_capacity.min(INITIAL_PENDING_CAPACITY)),
            pending_header: superblock.header,
            disk_len: superblock.data_len,
            generation: superblock.generation,
            cache,
            failed: false,
        };

        Ok(Self {
            path,
            config: config.clone(),
            superblock_size,
            metrics: LogMetrics::new(),
            state: RwLock::new(Some(state)),
        })
    }

    /// Validates an existing file against its superblock.
    fn recover(
        file: &mut File,
        path_str: &str,
        file_len: u64,
        superblock_size: u64,
        config: &LogFileConfig,
    ) -> StorageResult<Superblock> {
        let superblock = Superblock::read_from(file, config.header_size)?;

        let physical_data_len = file_len.saturating_sub(superblock_size);
        if physical_data_len < superblock.data_len {
            return Err(StorageError::corruption_at_offset(
                superblock_size + physical_data_len,
                format!(
                    "Superblock describes {} data bytes, file holds {}",
                    superblock.data_len, physical_data_len
                ),
            ));
        }

        if physical_data_len > superblock.data_len {
            // Crash between the data write and the superblock write
            file.set_len(superblock_size + superblock.data_len)
                .and_then(|_| file.sync_all())
                .map_err(|e| StorageError::io_error("Failed to truncate undescribed tail", e))?;
            Logger::warn(
                "LOG_TAIL_TRUNCATED",
                &[
                    ("bytes", (physical_data_len - superblock.data_len).to_string().as_str()),
                    ("path", path_str),
                ],
            );
        }

        Ok(superblock)
    }

    fn read_state(&self) -> StorageResult<RwLockReadGuard<'_, Option<LogState>>> {
        self.state.read().map_err(|_| StorageError::lock_poisoned())
    }

    fn write_state(&self) -> StorageResult<RwLockWriteGuard<'_, Option<LogState>>> {
        self.state.write().map_err(|_| StorageError::lock_poisoned())
    }

    /// Logical size: durable data bytes plus pending bytes.
    pub fn size(&self) -> StorageResult<u64> {
        let guard = self.read_state()?;
        let state = guard.as_ref().ok_or_else(StorageError::closed)?;
        Ok(state.logical_size())
    }

    /// Data-region bytes already on disk.
    pub fn durable_size(&self) -> StorageResult<u64> {
        let guard = self.read_state()?;
        let state = guard.as_ref().ok_or_else(StorageError::closed)?;
        Ok(state.disk_len)
    }

    /// Bytes waiting in the pending buffer.
    pub fn pending_len(&self) -> StorageResult<usize> {
        let guard = self.read_state()?;
        let state = guard.as_ref().ok_or_else(StorageError::closed)?;
        Ok(state.pending.len())
    }

    /// Copy of the header of the most recent append (or of the superblock
    /// the file was opened with).
    pub fn header(&self) -> StorageResult<Vec<u8>> {
        let guard = self.read_state()?;
        let state = guard.as_ref().ok_or_else(StorageError::closed)?;
        Ok(state.pending_header.clone())
    }

    /// Appends one (header, payload) pair and returns the logical offset at
    /// which `payload` begins.
    ///
    /// The payload is staged in the pending buffer; if it does not fit next
    /// to what is already pending, the buffer is flushed first. The header
    /// replaces the pending header and lands in the superblock on the next
    /// flush.
    ///
    /// # Errors
    ///
    /// - `PayloadTooLarge` if `payload` exceeds the buffer capacity
    /// - `OutOfRange` if `header` is not exactly `header_size` bytes
    /// - `IoFailure` if the overflow flush fails; the instance is unusable
    ///   for writes afterwards
    pub fn append(&self, header: &[u8], payload: &[u8]) -> StorageResult<u64> {
        if payload.len() > self.config.buffer_capacity {
            return Err(StorageError::payload_too_large(
                payload.len(),
                self.config.buffer_capacity,
            ));
        }
        if header.len() != self.config.header_size {
            return Err(StorageError::out_of_range(format!(
                "Header must be {} bytes, got {}",
                self.config.header_size,
                header.len()
            )));
        }

        let mut guard = self.write_state()?;
        let state = guard.as_mut().ok_or_else(StorageError::closed)?;
        if state.failed {
            return Err(Self::unusable());
        }

        if state.pending.len() + payload.len() > self.config.buffer_capacity {
            self.flush_state(state)?;
        }

        let write_pos = state.logical_size();
        state.pending.append(payload);
        state.pending_header.clear();
        state.pending_header.extend_from_slice(header);

        if let Some(cache) = &state.cache {
            let removed =
                cache.invalidate_range(write_pos, payload.len() as u64, self.config.block_size)?;
            self.metrics.add_cache_invalidations(removed);
        }

        self.metrics.record_append(payload.len() as u64);
        Ok(write_pos)
    }

    /// Writes the pending buffer and superblock to disk.
    pub fn flush(&self) -> StorageResult<()> {
        let mut guard = self.write_state()?;
        let state = guard.as_mut().ok_or_else(StorageError::closed)?;
        if state.failed {
            return Err(Self::unusable());
        }
        self.flush_state(state)
    }

    fn unusable() -> StorageError {
        StorageError::io_error(
            "Log file is unusable after an earlier I/O failure; reopen it",
            io::Error::new(io::ErrorKind::Other, "earlier flush failed"),
        )
    }

    /// Data first, then the superblock that describes it.
    fn flush_state(&self, state: &mut LogState) -> StorageResult<()> {
        let flushed = state.pending.len() as u64;
        let new_disk_len = state.disk_len + flushed;
        let data_pos = self.superblock_size + state.disk_len;
        let next = Superblock::new(
            state.pending_header.clone(),
            new_disk_len,
            state.generation + 1,
        );
        let slot_pos = next.slot_offset();
        let superblock = next.encode();
        let sync = self.config.sync_on_flush;

        let result = (|| -> io::Result<()> {
            if flushed > 0 {
                write_at(&mut state.file, data_pos, state.pending.as_slice())?;
                if sync {
                    state.file.sync_data()?;
                }
            }
            maybe_crash(points::LOG_AFTER_DATA_WRITE);

            write_at(&mut state.file, slot_pos, &superblock)?;
            if sync {
                state.file.sync_data()?;
            }
            maybe_crash(points::LOG_AFTER_SUPERBLOCK_WRITE);
            Ok(())
        })();

        if let Err(e) = result {
            state.failed = true;
            let path = self.path.display().to_string();
            Logger::error(
                "LOG_IO_FAILURE",
                &[("error", e.to_string().as_str()), ("path", path.as_str())],
            );
            return Err(StorageError::io_error("Failed to flush pending buffer", e)
                .with_details(format!("data_offset: {}", data_pos)));
        }

        // A block cached while the data region ended inside it is now short
        if let Some(cache) = &state.cache {
            let removed = cache.invalidate_range(state.disk_len, flushed, self.config.block_size)?;
            self.metrics.add_cache_invalidations(removed);
        }

        state.disk_len = new_disk_len;
        state.generation += 1;
        state.pending.clear();
        self.metrics.record_flush(flushed);

        Logger::trace(
            "LOG_BUFFER_FLUSHED",
            &[
                ("bytes", flushed.to_string().as_str()),
                ("data_len", new_disk_len.to_string().as_str()),
            ],
        );
        Ok(())
    }

    /// Reads `len` bytes starting at logical `offset`.
    ///
    /// Durable bytes come from the block cache (populated on miss) or a
    /// positional read; bytes past the durable end come from the pending
    /// buffer.
    pub fn read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let guard = self.read_state()?;
        let state = guard.as_ref().ok_or_else(StorageError::closed)?;

        let logical_size = state.logical_size();
        let end = offset
            .checked_add(len as u64)
            .filter(|end| *end <= logical_size)
            .ok_or_else(|| {
                StorageError::out_of_range(format!(
                    "Read of {} bytes at {} past logical size {}",
                    len, offset, logical_size
                ))
            })?;

        let mut out = Vec::with_capacity(len);
        if offset < end && offset < state.disk_len {
            let durable_end = end.min(state.disk_len);
            self.read_durable(state, offset, durable_end, &mut out)?;
        }
        if end > state.disk_len {
            let start = (offset.max(state.disk_len) - state.disk_len) as usize;
            let stop = (end - state.disk_len) as usize;
            out.extend_from_slice(&state.pending.as_slice()[start..stop]);
        }

        self.metrics.increment_reads();
        Ok(out)
    }

    fn read_durable(
        &self,
        state: &LogState,
        start: u64,
        end: u64,
        out: &mut Vec<u8>,
    ) -> StorageResult<()> {
        let cache = match &state.cache {
            Some(cache) => cache,
            None => {
                let mut buf = vec![0u8; (end - start) as usize];
                read_exact_at(&state.file, &mut buf, self.superblock_size + start).map_err(
                    |e| {
                        StorageError::io_error("Failed to read log file", e)
                            .with_details(format!("logical_offset: {}", start))
                    },
                )?;
                out.extend_from_slice(&buf);
                return Ok(());
            }
        };

        let block_size = self.config.block_size;
        let first = start / block_size;
        let last = (end - 1) / block_size;
        for block_index in first..=last {
            let block = self.load_block(state, cache, block_index)?;
            let block_start = block_index * block_size;
            let from = (start.max(block_start) - block_start) as usize;
            let to = (end.min(block_start + block.len() as u64) - block_start) as usize;
            out.extend_from_slice(&block[from..to]);
        }
        Ok(())
    }

    fn load_block(
        &self,
        state: &LogState,
        cache: &BlockCache,
        block_index: u64,
    ) -> StorageResult<BlockBytes> {
        if let Some(block) = cache.get(block_index)? {
            self.metrics.increment_cache_hits();
            return Ok(block);
        }
        self.metrics.increment_cache_misses();

        let block_start = block_index * self.config.block_size;
        let block_end = (block_start + self.config.block_size).min(state.disk_len);
        let mut buf = vec![0u8; (block_end - block_start) as usize];
        read_exact_at(&state.file, &mut buf, self.superblock_size + block_start).map_err(|e| {
            StorageError::io_error("Failed to read block", e)
                .with_details(format!("block_index: {}", block_index))
        })?;

        let block: BlockBytes = Arc::from(buf);
        let evicted = cache.put(block_index, Arc::clone(&block))?;
        for _ in 0..evicted {
            self.metrics.increment_cache_evictions();
        }
        Ok(block)
    }

    /// Flushes pending data, writes the final superblock, releases the
    /// file handle and drops the cache.
    ///
    /// Calling `close` again, or any other operation afterwards, fails with
    /// `Closed`. The handle is released even when the final flush fails.
    ///
    /// # Errors
    ///
    /// - `IoFailure` if the final flush fails, or if an earlier I/O failure
    ///   left pending bytes that are now discarded; reopening recovers from
    ///   the last valid superblock
    pub fn close(&self) -> StorageResult<()> {
        let mut guard = self.write_state()?;
        let mut state = guard.take().ok_or_else(StorageError::closed)?;

        let result = if state.failed {
            let discarded = state.pending.len().to_string();
            Logger::error(
                "LOG_FILE_CLOSED",
                &[
                    ("discarded_bytes", discarded.as_str()),
                    ("path", self.path.display().to_string().as_str()),
                ],
            );
            Err(Self::unusable().with_details(format!("discarded_bytes: {}", discarded)))
        } else {
            self.flush_state(&mut state)
        };

        if let Some(cache) = state.cache.take() {
            cache.clear()?;
        }
        state.pending.clear();
        state.pending_header.clear();
        drop(state);

        if result.is_ok() {
            Logger::info(
                "LOG_FILE_CLOSED",
                &[("path", self.path.display().to_string().as_str())],
            );
        }
        result
    }

    pub fn is_closed(&self) -> StorageResult<bool> {
        Ok(self.read_state()?.is_none())
    }

    /// Number of blocks currently cached (0 when caching is disabled).
    pub fn cached_blocks(&self) -> StorageResult<usize> {
        let guard = self.read_state()?;
        let state = guard.as_ref().ok_or_else(StorageError::closed)?;
        match &state.cache {
            Some(cache) => cache.len(),
            None => Ok(0),
        }
    }

    /// Whether the block with this index is cached.
    pub fn is_block_cached(&self, block_index: u64) -> StorageResult<bool> {
        let guard = self.read_state()?;
        let state = guard.as_ref().ok_or_else(StorageError::closed)?;
        match &state.cache {
            Some(cache) => cache.contains(block_index),
            None => Ok(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &LogFileConfig {
        &self.config
    }

    pub fn block_size(&self) -> u64 {
        self.config.block_size
    }

    pub fn is_block_cache_enabled(&self) -> bool {
        self.config.block_cache_enabled
    }

    pub fn buffer_capacity(&self) -> usize {
        self.config.buffer_capacity
    }

    /// Bytes reserved at the start of the file for the superblock.
    pub fn superblock_size(&self) -> u64 {
        self.superblock_size
    }

    pub fn metrics(&self) -> &LogMetrics {
        &self.metrics
    }
}

fn write_at(file: &mut File, pos: u64, bytes: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(pos))?;
    file.write_all(bytes)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, pos)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut pos: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, pos) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut std::mem::take(&mut buf)[n..];
                pos += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageErrorCode;
    use tempfile::TempDir;

    const HEADER: [u8; 22] = [8u8; 22];

    fn small_config() -> LogFileConfig {
        LogFileConfig::default()
            .with_buffer_capacity(64)
            .with_block_size(16)
            .with_block_cache(true, 8)
            .with_header_size(HEADER.len())
            .with_sync_on_flush(false)
    }

    fn open_small(dir: &TempDir) -> AppendLogFile {
        AppendLogFile::open_with_config(dir.path().join("data.log"), &small_config()).unwrap()
    }

    #[test]
    fn test_new_file_has_empty_superblock() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);

        assert_eq!(log.size().unwrap(), 0);
        let on_disk = std::fs::metadata(log.path()).unwrap().len();
        assert_eq!(on_disk, log.superblock_size());
        assert_eq!(log.header().unwrap(), vec![0u8; 22]);
    }

    #[test]
    fn test_append_returns_running_offset() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);

        assert_eq!(log.append(&HEADER, b"abc").unwrap(), 0);
        assert_eq!(log.append(&HEADER, b"defgh").unwrap(), 3);
        assert_eq!(log.size().unwrap(), 8);
        assert_eq!(log.pending_len().unwrap(), 8);
        assert_eq!(log.durable_size().unwrap(), 0);
    }

    #[test]
    fn test_overflow_flushes_before_buffering() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);

        log.append(&HEADER, &[1u8; 40]).unwrap();
        log.append(&HEADER, &[2u8; 24]).unwrap();
        assert_eq!(log.durable_size().unwrap(), 0);

        let offset = log.append(&HEADER, &[3u8; 1]).unwrap();
        assert_eq!(offset, 64);
        assert_eq!(log.durable_size().unwrap(), 64);
        assert_eq!(log.pending_len().unwrap(), 1);
        assert_eq!(log.metrics().snapshot().flushes, 1);
    }

    #[test]
    fn test_header_size_enforced() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);

        let err = log.append(&[0u8; 3], b"x").unwrap_err();
        assert_eq!(err.code(), StorageErrorCode::OutOfRange);
        assert_eq!(log.size().unwrap(), 0);
    }

    #[test]
    fn test_read_spans_disk_and_pending() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);

        log.append(&HEADER, &[1u8; 60]).unwrap();
        log.append(&HEADER, &[2u8; 10]).unwrap(); // flushes the first 60

        let bytes = log.read(55, 10).unwrap();
        assert_eq!(&bytes[..5], &[1u8; 5]);
        assert_eq!(&bytes[5..], &[2u8; 5]);
    }

    #[test]
    fn test_read_past_end_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);
        log.append(&HEADER, b"abc").unwrap();

        assert_eq!(log.read(1, 2).unwrap(), b"bc".to_vec());
        assert_eq!(log.read(3, 0).unwrap(), Vec::<u8>::new());
        assert_eq!(
            log.read(2, 2).unwrap_err().code(),
            StorageErrorCode::OutOfRange
        );
        assert_eq!(
            log.read(u64::MAX, 2).unwrap_err().code(),
            StorageErrorCode::OutOfRange
        );
    }

    #[test]
    fn test_durable_read_populates_cache() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);

        let payload: Vec<u8> = (0..40).collect();
        log.append(&HEADER, &payload).unwrap();
        log.flush().unwrap();

        assert_eq!(log.read(10, 20).unwrap(), payload[10..30].to_vec());
        // Block size 16: bytes 10..30 live in blocks 0 and 1
        assert!(log.is_block_cached(0).unwrap());
        assert!(log.is_block_cached(1).unwrap());
        assert!(!log.is_block_cached(2).unwrap());

        log.read(16, 4).unwrap();
        let snapshot = log.metrics().snapshot();
        assert_eq!(snapshot.cache_misses, 2);
        assert_eq!(snapshot.cache_hits, 1);
    }

    #[test]
    fn test_partial_tail_block_refreshed_after_flush() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);

        log.append(&HEADER, &[1u8; 20]).unwrap();
        log.flush().unwrap();
        // Block 1 cached with only 4 bytes
        log.read(16, 4).unwrap();
        assert!(log.is_block_cached(1).unwrap());

        log.append(&HEADER, &[2u8; 8]).unwrap();
        assert!(!log.is_block_cached(1).unwrap());
        log.read(16, 4).unwrap();
        log.flush().unwrap();

        let bytes = log.read(16, 12).unwrap();
        assert_eq!(&bytes[..4], &[1u8; 4]);
        assert_eq!(&bytes[4..], &[2u8; 8]);
    }

    #[test]
    fn test_cache_disabled_reads_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let config = small_config().with_block_cache(false, 0);
        let log = AppendLogFile::open_with_config(temp_dir.path().join("data.log"), &config)
            .unwrap();

        log.append(&HEADER, b"durable").unwrap();
        log.flush().unwrap();

        assert_eq!(log.read(0, 7).unwrap(), b"durable".to_vec());
        assert_eq!(log.cached_blocks().unwrap(), 0);
        assert!(!log.is_block_cache_enabled());
    }

    #[test]
    fn test_close_then_operations_fail() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);
        log.append(&HEADER, b"abc").unwrap();

        log.close().unwrap();
        assert!(log.is_closed().unwrap());

        assert_eq!(log.close().unwrap_err().code(), StorageErrorCode::Closed);
        assert_eq!(log.size().unwrap_err().code(), StorageErrorCode::Closed);
        assert_eq!(
            log.append(&HEADER, b"d").unwrap_err().code(),
            StorageErrorCode::Closed
        );
        assert_eq!(log.read(0, 1).unwrap_err().code(), StorageErrorCode::Closed);
    }

    /// Swaps the file handle for a read-only one so the next write fails.
    fn break_file_handle(log: &AppendLogFile) {
        let read_only = File::open(log.path()).unwrap();
        let mut guard = log.state.write().unwrap();
        guard.as_mut().unwrap().file = read_only;
    }

    #[test]
    fn test_io_failure_makes_log_unusable() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);

        assert_eq!(log.append(&HEADER, &[1u8; 40]).unwrap(), 0);
        break_file_handle(&log);

        // Overflow flush hits the broken handle
        let err = log.append(&HEADER, &[2u8; 30]).unwrap_err();
        assert_eq!(err.code(), StorageErrorCode::IoFailure);
        assert!(err.is_fatal());
        assert_eq!(log.size().unwrap(), 40);

        let err = log.append(&HEADER, b"x").unwrap_err();
        assert_eq!(err.code(), StorageErrorCode::IoFailure);
        assert!(err.message().contains("unusable"));

        let err = log.flush().unwrap_err();
        assert_eq!(err.code(), StorageErrorCode::IoFailure);
        assert!(err.message().contains("unusable"));

        let err = log.close().unwrap_err();
        assert_eq!(err.code(), StorageErrorCode::IoFailure);
        assert_eq!(err.details(), Some("discarded_bytes: 40"));
        assert!(log.is_closed().unwrap());

        let log = open_small(&temp_dir);
        assert_eq!(log.size().unwrap(), 0);
    }

    #[test]
    fn test_close_reports_final_flush_failure() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);

        log.append(&HEADER, b"staged").unwrap();
        break_file_handle(&log);

        let err = log.close().unwrap_err();
        assert_eq!(err.code(), StorageErrorCode::IoFailure);
        assert!(log.is_closed().unwrap());
        assert_eq!(log.close().unwrap_err().code(), StorageErrorCode::Closed);
    }

    #[test]
    fn test_flushes_alternate_superblock_slots() {
        let temp_dir = TempDir::new().unwrap();
        let log = open_small(&temp_dir);
        let slot_size = Superblock::slot_size_for(HEADER.len());

        log.append(&HEADER, b"one").unwrap();
        log.flush().unwrap();
        log.append(&HEADER, b"two").unwrap();
        log.flush().unwrap();
        log.close().unwrap();

        let bytes = std::fs::read(temp_dir.path().join("data.log")).unwrap();
        let slot0 = Superblock::decode(&bytes[..slot_size], HEADER.len()).unwrap();
        let slot1 = Superblock::decode(&bytes[slot_size..2 * slot_size], HEADER.len()).unwrap();

        // Created as generation 0, then flushes 1, 2 and the close flush 3
        assert_eq!(slot1.generation, 3);
        assert_eq!(slot1.data_len, 6);
        assert_eq!(slot0.generation, 2);
        assert_eq!(slot0.data_len, 6);
    }

    #[test]
    fn test_reopen_restores_size_and_header() {
        let temp_dir = TempDir::new().unwrap();
        let mut header = HEADER;
        header[0] = 42;
        {
            let log = open_small(&temp_dir);
            log.append(&HEADER, &[7u8; 30]).unwrap();
            log.append(&header, &[9u8; 5]).unwrap();
            log.close().unwrap();
        }

        let log = open_small(&temp_dir);
        assert_eq!(log.size().unwrap(), 35);
        assert_eq!(log.durable_size().unwrap(), 35);
        assert_eq!(log.header().unwrap(), header.to_vec());
        assert_eq!(log.read(30, 5).unwrap(), vec![9u8; 5]);

        assert_eq!(log.append(&HEADER, b"more").unwrap(), 35);
    }

    #[test]
    fn test_reopen_with_other_header_size_rejected() {
        let temp_dir = TempDir::new().unwrap();
        open_small(&temp_dir).close().unwrap();

        let config = small_config().with_header_size(8);
        let err = AppendLogFile::open_with_config(temp_dir.path().join("data.log"), &config)
            .err()
            .unwrap();
        assert_eq!(err.code(), StorageErrorCode::InvalidConfig);
    }

    #[test]
    fn test_open_with_invalid_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let err = AppendLogFile::open(temp_dir.path().join("data.log"), 0, true, 10, 4096)
            .err()
            .unwrap();
        assert_eq!(err.code(), StorageErrorCode::InvalidConfig);
        assert!(!temp_dir.path().join("data.log").exists());
    }
}

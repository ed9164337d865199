//! Append-only log storage for revstore
//!
//! The log is a single file: a superblock describing the durable state
//! followed by the data region. All writes append; nothing is updated in
//! place.
//!
//! # Design Principles
//!
//! - Append-only (no in-place updates)
//! - Payloads buffered in memory and written in bulk on flush
//! - Superblock rewritten only after its data is on disk
//! - Checksums on the superblock and on every record
//! - Reads served from a block LRU cache, the file, or the pending buffer
//!
//! # Concurrency
//!
//! An `AppendLogFile` is shared by reference. Appends and flushes take the
//! write side of its lock; reads and size queries take the read side, so a
//! reader never observes a half-applied append.

mod buffer;
mod cache;
mod checksum;
mod errors;
mod log_file;
mod record;
mod superblock;

pub use buffer::{ByteBuffer, DEFAULT_BUFFER_CAPACITY};
pub use cache::{BlockBytes, BlockCache};
pub use checksum::{compute_checksum, verify_checksum};
pub use errors::{Severity, StorageError, StorageErrorCode, StorageResult};
pub use log_file::AppendLogFile;
pub use record::{
    decode_document, decode_key_record, decode_record_header, decode_value_record,
    encode_document, encode_key_record, encode_value_record, read_key_record, read_value_record,
    EncodedRecord, KeyRecord, RecordHeader, RecordKind, ValueRecord, FALSE_BYTE,
    RECORD_FORMAT_VERSION, RECORD_HEADER_SIZE, RECORD_MAGIC, TRUE_BYTE,
};
pub use superblock::{
    read_superblock, Superblock, SUPERBLOCK_MAGIC, SUPERBLOCK_OVERHEAD, SUPERBLOCK_SLOTS,
};

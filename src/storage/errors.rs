//! Storage error types
//!
//! Error codes:
//! - REV_STORAGE_PAYLOAD_TOO_LARGE (ERROR severity)
//! - REV_STORAGE_IO_ERROR (FATAL severity)
//! - REV_STORAGE_OUT_OF_RANGE (ERROR severity)
//! - REV_COMPRESSION_FAILED / REV_DECOMPRESSION_FAILED (ERROR severity)
//! - REV_DATA_CORRUPTION (FATAL severity)
//! - REV_STORAGE_CLOSED (ERROR severity)
//! - REV_INVALID_CONFIG (ERROR severity)
//! - REV_LOCK_POISONED (FATAL severity)
//!
//! A FATAL error means the `AppendLogFile` instance must not be written to
//! again; close it and reopen to recover from the last valid superblock.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::compression::CompressionError;

/// Severity levels for storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, instance remains usable
    Error,
    /// Instance must be treated as unusable
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Storage-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    /// A single payload exceeds the pending buffer capacity
    PayloadTooLarge,
    /// Underlying read/write/sync failure
    IoFailure,
    /// Invalid offset/length arguments
    OutOfRange,
    /// Injected compressor failed to compress
    CompressionFailure,
    /// Injected compressor failed to decompress
    DecompressionFailure,
    /// On-disk bytes fail validation
    DataCorruption,
    /// Operation on a closed log file
    Closed,
    /// Configuration rejected
    InvalidConfig,
    /// A thread panicked while holding the buffer lock
    LockPoisoned,
}

impl StorageErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorCode::PayloadTooLarge => "REV_STORAGE_PAYLOAD_TOO_LARGE",
            StorageErrorCode::IoFailure => "REV_STORAGE_IO_ERROR",
            StorageErrorCode::OutOfRange => "REV_STORAGE_OUT_OF_RANGE",
            StorageErrorCode::CompressionFailure => "REV_COMPRESSION_FAILED",
            StorageErrorCode::DecompressionFailure => "REV_DECOMPRESSION_FAILED",
            StorageErrorCode::DataCorruption => "REV_DATA_CORRUPTION",
            StorageErrorCode::Closed => "REV_STORAGE_CLOSED",
            StorageErrorCode::InvalidConfig => "REV_INVALID_CONFIG",
            StorageErrorCode::LockPoisoned => "REV_LOCK_POISONED",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            StorageErrorCode::IoFailure
            | StorageErrorCode::DataCorruption
            | StorageErrorCode::LockPoisoned => Severity::Fatal,
            StorageErrorCode::PayloadTooLarge
            | StorageErrorCode::OutOfRange
            | StorageErrorCode::CompressionFailure
            | StorageErrorCode::DecompressionFailure
            | StorageErrorCode::Closed
            | StorageErrorCode::InvalidConfig => Severity::Error,
        }
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Storage error type with context
#[derive(Debug)]
pub struct StorageError {
    code: StorageErrorCode,
    message: String,
    details: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl StorageError {
    fn new(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach context such as the logical offset being accessed
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// A payload larger than the pending buffer
    pub fn payload_too_large(payload_len: usize, buffer_capacity: usize) -> Self {
        Self::new(
            StorageErrorCode::PayloadTooLarge,
            "Payload is bigger than the pending buffer capacity",
        )
        .with_details(format!(
            "payload_len: {}, buffer_capacity: {}",
            payload_len, buffer_capacity
        ))
    }

    /// An underlying I/O failure
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(StorageErrorCode::IoFailure, message).with_source(source)
    }

    /// An invalid offset/length combination
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(StorageErrorCode::OutOfRange, message)
    }

    /// Compressor failure, propagated with the original error as source
    pub fn compression_failed(source: CompressionError) -> Self {
        Self::new(StorageErrorCode::CompressionFailure, "Compressor failed").with_source(source)
    }

    /// Decompressor failure, propagated with the original error as source
    pub fn decompression_failed(source: CompressionError) -> Self {
        Self::new(StorageErrorCode::DecompressionFailure, "Decompressor failed")
            .with_source(source)
    }

    /// On-disk bytes that fail validation
    pub fn data_corruption(message: impl Into<String>) -> Self {
        Self::new(StorageErrorCode::DataCorruption, message)
    }

    /// Data corruption with byte offset context
    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self::data_corruption(reason).with_details(format!("byte_offset: {}", offset))
    }

    /// Operation attempted after `close()`
    pub fn closed() -> Self {
        Self::new(StorageErrorCode::Closed, "Log file is closed")
    }

    /// Configuration rejected during validation or open
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(StorageErrorCode::InvalidConfig, message)
    }

    /// Buffer lock poisoned by a panicking thread
    pub fn lock_poisoned() -> Self {
        Self::new(
            StorageErrorCode::LockPoisoned,
            "Buffer lock poisoned by a panicked writer",
        )
    }

    /// Returns the error code
    pub fn code(&self) -> StorageErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether this error leaves the instance unusable
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            StorageErrorCode::PayloadTooLarge.code(),
            "REV_STORAGE_PAYLOAD_TOO_LARGE"
        );
        assert_eq!(StorageErrorCode::IoFailure.code(), "REV_STORAGE_IO_ERROR");
        assert_eq!(StorageErrorCode::OutOfRange.code(), "REV_STORAGE_OUT_OF_RANGE");
        assert_eq!(StorageErrorCode::DataCorruption.code(), "REV_DATA_CORRUPTION");
    }

    #[test]
    fn test_io_failure_is_fatal() {
        let err = StorageError::io_error(
            "flush failed",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert!(err.is_fatal());
        assert!(err.source().is_some());
    }

    #[test]
    fn test_caller_errors_not_fatal() {
        assert!(!StorageError::payload_too_large(10, 5).is_fatal());
        assert!(!StorageError::out_of_range("bad slice").is_fatal());
        assert!(!StorageError::closed().is_fatal());
    }

    #[test]
    fn test_compression_source_is_preserved() {
        let err = StorageError::decompression_failed(CompressionError::Decompress("truncated frame".to_string()));
        assert_eq!(err.code(), StorageErrorCode::DecompressionFailure);
        let source = err.source().unwrap();
        assert!(source.to_string().contains("truncated frame"));
    }

    #[test]
    fn test_error_display_contains_required_fields() {
        let err = StorageError::corruption_at_offset(1024, "superblock checksum mismatch");
        let display = format!("{}", err);
        assert!(display.contains("REV_DATA_CORRUPTION"));
        assert!(display.contains("FATAL"));
        assert!(display.contains("superblock checksum mismatch"));
        assert!(display.contains("byte_offset: 1024"));
    }
}

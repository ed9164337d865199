//! # Compression Errors

use thiserror::Error;

/// Result type for compressor operations
pub type CompressionResult<T> = Result<T, CompressionError>;

/// Errors raised by a [`Compressor`](super::Compressor) implementation.
///
/// The storage layer wraps these without rewriting them, so the original
/// message stays reachable through `Error::source`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompressionError {
    #[error("compress: {0}")]
    Compress(String),

    #[error("decompress: {0}")]
    Decompress(String),
}

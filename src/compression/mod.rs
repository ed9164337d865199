//! Pluggable compression for value record payloads
//!
//! A compressor is an injected capability with two operations. The record
//! codec takes an `Option<&dyn Compressor>`; `None` is pass-through. New
//! algorithms are added by implementing the trait, nothing else changes.

mod errors;
mod lz4;

pub use errors::{CompressionError, CompressionResult};
pub use lz4::Lz4Compressor;

/// Two-operation compression capability.
///
/// `decompress(compress(x)) == x` must hold for every input.
pub trait Compressor: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> CompressionResult<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> CompressionResult<Vec<u8>>;
}

//! LZ4 block compression
//!
//! Output is the lz4_flex size-prepended block format: a u32 LE
//! uncompressed length followed by the compressed block.

use super::errors::{CompressionError, CompressionResult};
use super::Compressor;

/// LZ4 compressor for value record payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl Lz4Compressor {
    pub fn new() -> Self {
        Self
    }
}

impl Compressor for Lz4Compressor {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, data: &[u8]) -> CompressionResult<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> CompressionResult<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| CompressionError::Decompress(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let compressor = Lz4Compressor::new();
        let doc = br#"{"name":"alice","tags":["a","a","a","a","a","a","a","a"]}"#;

        let compressed = compressor.compress(doc).unwrap();
        assert_eq!(compressor.decompress(&compressed).unwrap(), doc.to_vec());
    }

    #[test]
    fn test_repetitive_input_shrinks() {
        let compressor = Lz4Compressor::new();
        let data = vec![b'x'; 4096];
        assert!(compressor.compress(&data).unwrap().len() < data.len());
    }

    #[test]
    fn test_empty_input() {
        let compressor = Lz4Compressor::new();
        let compressed = compressor.compress(&[]).unwrap();
        assert!(compressor.decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_fails_to_decompress() {
        let compressor = Lz4Compressor::new();
        // Claims 1 MiB of output but carries no block data
        let garbage = [0x00, 0x00, 0x10, 0x00, 0xFF];
        let err = compressor.decompress(&garbage).unwrap_err();
        assert!(matches!(err, CompressionError::Decompress(_)));
    }
}

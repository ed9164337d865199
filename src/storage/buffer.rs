//! Growable byte buffer used to assemble encoded records
//!
//! Appends are amortized O(1): when the backing storage is full it grows to
//! double its capacity, or to the exact required size if doubling is not
//! enough. `clear()` resets the length in O(1) and keeps the allocation.

use super::errors::{StorageError, StorageResult};

/// Initial capacity of [`ByteBuffer::new`]
pub const DEFAULT_BUFFER_CAPACITY: usize = 32;

/// Resizable byte sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    bytes: Vec<u8>,
    len: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity],
            len: 0,
        }
    }

    /// Append a single byte
    pub fn append_single(&mut self, byte: u8) {
        self.append(&[byte]);
    }

    /// Append all of `bytes`
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let new_len = self.len + bytes.len();
        self.reserve_exact_len(new_len);
        self.bytes[self.len..new_len].copy_from_slice(bytes);
        self.len = new_len;
    }

    /// Append `bytes[offset..offset + len]`.
    ///
    /// Fails with `OutOfRange` if the window does not lie inside `bytes`.
    pub fn append_slice(&mut self, bytes: &[u8], offset: usize, len: usize) -> StorageResult<()> {
        let end = offset.checked_add(len).ok_or_else(|| {
            StorageError::out_of_range(format!(
                "slice window overflows: offset {} + len {}",
                offset, len
            ))
        })?;
        if offset > bytes.len() || end > bytes.len() {
            return Err(StorageError::out_of_range(format!(
                "slice window {}..{} outside source of {} bytes",
                offset,
                end,
                bytes.len()
            )));
        }
        self.append(&bytes[offset..end]);
        Ok(())
    }

    fn reserve_exact_len(&mut self, required: usize) {
        if required <= self.bytes.len() {
            return;
        }
        let grown = (self.bytes.len() << 1).max(required);
        self.bytes.resize(grown, 0);
    }

    /// Reset the length to zero, keeping the allocation
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Copy the live bytes out
    pub fn to_owned_bytes(&self) -> Vec<u8> {
        self.bytes[..self.len].to_vec()
    }

    /// Borrow the live bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current size of the backing storage
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

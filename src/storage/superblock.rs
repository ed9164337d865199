//! Superblock: the fixed region at the start of every log file
//!
//! The region holds two slots of identical size. Each flush writes the next
//! generation into the slot the previous flush did not use, so a write torn
//! by a crash always leaves the older slot intact.
//!
//! ```text
//! +------------------+ 0
//! | Magic "RVSB"     | (u32 LE)
//! +------------------+ 4
//! | Header Length    | (u32 LE)
//! +------------------+ 8
//! | Generation       | (u64 LE) incremented on every flush
//! +------------------+ 16
//! | Data Length      | (u64 LE) durable data-region bytes described
//! +------------------+ 24
//! | Header           | (header_len bytes, owned by the caller)
//! +------------------+ 24 + header_len
//! | Checksum         | (u32 LE) over every preceding byte of the slot
//! +------------------+
//! ```
//!
//! Generation `g` lives in slot `g % 2`. On open the valid slot with the
//! higher generation wins. Every slot is written strictly after the data it
//! describes, so the data region holds at least `data_len` bytes; anything
//! beyond is from a flush whose slot never landed.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use super::checksum::{compute_checksum, verify_checksum};
use super::errors::{StorageError, StorageErrorCode, StorageResult};
use crate::config::MAX_HEADER_SIZE;

/// "RVSB" as little-endian bytes
pub const SUPERBLOCK_MAGIC: u32 = 0x4253_5652;

/// Bytes of framing around the header in one slot
pub const SUPERBLOCK_OVERHEAD: usize = 28;

/// Number of alternating slots in the superblock region
pub const SUPERBLOCK_SLOTS: usize = 2;

const PREFIX_SIZE: usize = 24;

/// Decoded superblock slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Header of the most recently flushed write batch
    pub header: Vec<u8>,
    /// Data-region bytes durable when this superblock was written
    pub data_len: u64,
    /// Flush counter; selects the slot and orders the two slots
    pub generation: u64,
}

impl Superblock {
    pub fn new(header: Vec<u8>, data_len: u64, generation: u64) -> Self {
        Self {
            header,
            data_len,
            generation,
        }
    }

    /// Superblock of a freshly created file: zeroed header, no data.
    pub fn empty(header_size: usize) -> Self {
        Self::new(vec![0u8; header_size], 0, 0)
    }

    /// On-disk size of one slot carrying a `header_size` header.
    pub fn slot_size_for(header_size: usize) -> usize {
        header_size + SUPERBLOCK_OVERHEAD
    }

    /// On-disk size of the whole superblock region.
    pub fn region_size_for(header_size: usize) -> usize {
        Self::slot_size_for(header_size) * SUPERBLOCK_SLOTS
    }

    /// Byte offset of the slot this superblock is written to.
    pub fn slot_offset(&self) -> u64 {
        (self.generation % SUPERBLOCK_SLOTS as u64) * self.encoded_len() as u64
    }

    pub fn encoded_len(&self) -> usize {
        Self::slot_size_for(self.header.len())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&SUPERBLOCK_MAGIC.to_le_bytes());
        buf.extend_from_slice(&(self.header.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.generation.to_le_bytes());
        buf.extend_from_slice(&self.data_len.to_le_bytes());
        buf.extend_from_slice(&self.header);
        let checksum = compute_checksum(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Bytes of a freshly created region: generation 0 in slot 0, slot 1
    /// zeroed.
    pub fn encode_initial_region(header_size: usize) -> Vec<u8> {
        let mut region = Self::empty(header_size).encode();
        region.resize(Self::region_size_for(header_size), 0);
        region
    }

    /// Decode and verify one slot, expecting a `header_size` header.
    pub fn decode(bytes: &[u8], header_size: usize) -> StorageResult<Self> {
        if bytes.len() < PREFIX_SIZE {
            return Err(StorageError::data_corruption(format!(
                "Superblock truncated: {} bytes",
                bytes.len()
            )));
        }
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != SUPERBLOCK_MAGIC {
            return Err(StorageError::data_corruption(format!(
                "Bad superblock magic: {:08x}",
                magic
            )));
        }
        let header_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        if header_len > MAX_HEADER_SIZE {
            return Err(StorageError::data_corruption(format!(
                "Superblock header length {} exceeds {}",
                header_len, MAX_HEADER_SIZE
            )));
        }

        if header_len != header_size {
            return Err(StorageError::invalid_config(format!(
                "Log file header size is {}, configured {}",
                header_len, header_size
            )));
        }

        let expected = Self::slot_size_for(header_len);
        if bytes.len() < expected {
            return Err(StorageError::data_corruption(format!(
                "Superblock truncated: {} of {} bytes",
                bytes.len(),
                expected
            )));
        }

        let checksum_offset = expected - 4;
        let stored = u32::from_le_bytes([
            bytes[checksum_offset],
            bytes[checksum_offset + 1],
            bytes[checksum_offset + 2],
            bytes[checksum_offset + 3],
        ]);
        if !verify_checksum(&bytes[..checksum_offset], stored) {
            return Err(StorageError::data_corruption("Superblock checksum mismatch"));
        }

        let mut generation = [0u8; 8];
        generation.copy_from_slice(&bytes[8..16]);
        let mut data_len = [0u8; 8];
        data_len.copy_from_slice(&bytes[16..24]);

        Ok(Self {
            header: bytes[PREFIX_SIZE..checksum_offset].to_vec(),
            data_len: u64::from_le_bytes(data_len),
            generation: u64::from_le_bytes(generation),
        })
    }

    /// Pick the newest valid slot out of a whole region.
    pub fn decode_region(region: &[u8], header_size: usize) -> StorageResult<Self> {
        let slot_size = Self::slot_size_for(header_size);
        let mut newest: Option<Self> = None;
        let mut failures = Vec::with_capacity(SUPERBLOCK_SLOTS);

        for (slot, bytes) in region.chunks(slot_size).take(SUPERBLOCK_SLOTS).enumerate() {
            match Self::decode(bytes, header_size) {
                Ok(sb) => {
                    if newest.as_ref().map_or(true, |n| sb.generation > n.generation) {
                        newest = Some(sb);
                    }
                }
                Err(e) if e.code() == StorageErrorCode::InvalidConfig => return Err(e),
                Err(e) => failures.push(format!("slot {}: {}", slot, e.message())),
            }
        }

        newest.ok_or_else(|| {
            StorageError::corruption_at_offset(0, "No valid superblock slot")
                .with_details(failures.join("; "))
        })
    }

    /// Read the newest valid superblock from the start of an open file.
    pub fn read_from(file: &mut File, header_size: usize) -> StorageResult<Self> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| StorageError::io_error("Failed to seek to superblock", e))?;

        let region_size = Self::region_size_for(header_size);
        let mut region = Vec::with_capacity(region_size);
        file.by_ref()
            .take(region_size as u64)
            .read_to_end(&mut region)
            .map_err(|e| StorageError::io_error("Failed to read superblock", e))?;

        // A short region may still reveal a header size mismatch in slot 0
        let superblock = Self::decode_region(&region, header_size)?;
        if region.len() < region_size {
            return Err(StorageError::corruption_at_offset(
                region.len() as u64,
                "Superblock region truncated",
            ));
        }
        Ok(superblock)
    }
}

/// Read the newest valid superblock of a log file at `path`.
pub fn read_superblock(path: &Path, header_size: usize) -> StorageResult<Superblock> {
    let mut file = File::open(path).map_err(|e| {
        StorageError::io_error(format!("Failed to open log file: {}", path.display()), e)
    })?;
    Superblock::read_from(&mut file, header_size)
}

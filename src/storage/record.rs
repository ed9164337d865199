//! Key and value record encoding
//!
//! Every record is appended as a (header, payload) pair. The header is
//! fixed-size and becomes the superblock on the next flush; the payload is
//! self-delimiting so it can be fetched back from its logical offset alone.
//!
//! Record header (`RECORD_HEADER_SIZE` bytes):
//!
//! ```text
//! +------------------+
//! | Magic            | (u16 LE, 0x5256)
//! | Format Version   | (u16 LE)
//! | Record Kind      | (u8: 1 = key, 2 = value)
//! | Exists Flag      | (u8: TRUE_BYTE / FALSE_BYTE)
//! | Revision         | (u32 LE)
//! | Payload Length   | (u32 LE)
//! | Payload Checksum | (u32 LE)
//! | Reserved         | (u32, zero)
//! +------------------+
//! ```
//!
//! Value payload: flag, revision (u32 LE), value length (u32 LE), value
//! bytes, checksum (u32 LE) over everything before it.
//!
//! Key payload: flag, revision (u32 LE), revision root pointer (u64 LE),
//! latest value pointer (u64 LE), key length (u32 LE), key bytes, checksum.
//!
//! A deleted value always carries a zero-length value. Absence of a
//! document is an empty value, never a missing field.

use super::buffer::ByteBuffer;
use super::checksum::compute_checksum;
use super::errors::{StorageError, StorageResult};
use super::log_file::AppendLogFile;
use crate::compression::Compressor;

/// Flag byte of a record whose document exists
pub const TRUE_BYTE: u8 = 0x01;
/// Flag byte of a deleted (tombstoned) record
pub const FALSE_BYTE: u8 = 0x00;

pub const RECORD_MAGIC: u16 = 0x5256;
pub const RECORD_FORMAT_VERSION: u16 = 1;
pub const RECORD_HEADER_SIZE: usize = 22;

const VALUE_PREFIX_SIZE: usize = 1 + 4 + 4;
const KEY_PREFIX_SIZE: usize = 1 + 4 + 8 + 8 + 4;
const CHECKSUM_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Key = 1,
    Value = 2,
}

impl RecordKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordKind::Key),
            2 => Some(RecordKind::Value),
            _ => None,
        }
    }
}

fn flag_byte(deleted: bool) -> u8 {
    if deleted {
        FALSE_BYTE
    } else {
        TRUE_BYTE
    }
}

fn parse_flag(byte: u8) -> StorageResult<bool> {
    match byte {
        TRUE_BYTE => Ok(false),
        FALSE_BYTE => Ok(true),
        other => Err(StorageError::data_corruption(format!(
            "Invalid record flag byte: {:#04x}",
            other
        ))),
    }
}

fn len_u32(len: usize, what: &str) -> StorageResult<u32> {
    u32::try_from(len).map_err(|_| {
        StorageError::out_of_range(format!("{} of {} bytes exceeds u32 length field", what, len))
    })
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Fixed-size header of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: RecordKind,
    pub deleted: bool,
    pub revision: u32,
    pub payload_len: u32,
    pub payload_checksum: u32,
}

impl RecordHeader {
    fn for_payload(
        kind: RecordKind,
        deleted: bool,
        revision: u32,
        payload: &[u8],
    ) -> StorageResult<Self> {
        Ok(Self {
            kind,
            deleted,
            revision,
            payload_len: len_u32(payload.len(), "Payload")?,
            payload_checksum: compute_checksum(payload),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::with_capacity(RECORD_HEADER_SIZE);
        buf.append(&RECORD_MAGIC.to_le_bytes());
        buf.append(&RECORD_FORMAT_VERSION.to_le_bytes());
        buf.append_single(self.kind as u8);
        buf.append_single(flag_byte(self.deleted));
        buf.append(&self.revision.to_le_bytes());
        buf.append(&self.payload_len.to_le_bytes());
        buf.append(&self.payload_checksum.to_le_bytes());
        buf.append(&[0u8; 4]);
        buf.to_owned_bytes()
    }

    /// Whether `payload` is the one this header describes.
    pub fn matches(&self, payload: &[u8]) -> bool {
        payload.len() == self.payload_len as usize
            && compute_checksum(payload) == self.payload_checksum
    }
}

/// Parse and validate a record header.
pub fn decode_record_header(bytes: &[u8]) -> StorageResult<RecordHeader> {
    if bytes.len() != RECORD_HEADER_SIZE {
        return Err(StorageError::data_corruption(format!(
            "Record header must be {} bytes, got {}",
            RECORD_HEADER_SIZE,
            bytes.len()
        )));
    }
    let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
    if magic != RECORD_MAGIC {
        return Err(StorageError::data_corruption(format!(
            "Bad record header magic: {:04x}",
            magic
        )));
    }
    let version = u16::from_le_bytes([bytes[2], bytes[3]]);
    if version != RECORD_FORMAT_VERSION {
        return Err(StorageError::data_corruption(format!(
            "Unsupported record format version {}",
            version
        )));
    }
    let kind = RecordKind::from_u8(bytes[4]).ok_or_else(|| {
        StorageError::data_corruption(format!("Unknown record kind {}", bytes[4]))
    })?;

    Ok(RecordHeader {
        kind,
        deleted: parse_flag(bytes[5])?,
        revision: read_u32(bytes, 6),
        payload_len: read_u32(bytes, 10),
        payload_checksum: read_u32(bytes, 14),
    })
}

/// An encoded record ready to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
}

impl EncodedRecord {
    /// Append to `log`, returning the payload's logical offset.
    pub fn append_to(&self, log: &AppendLogFile) -> StorageResult<u64> {
        log.append(&self.header, &self.payload)
    }
}

/// Current state of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub deleted: bool,
    pub key: Vec<u8>,
    pub revision: u32,
    /// Logical offset of the root of this key's revision history
    pub revision_root: u64,
    /// Logical offset of the key's latest value record
    pub latest_value: u64,
}

/// One revision of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRecord {
    pub deleted: bool,
    /// Uncompressed value bytes; empty for tombstones
    pub value: Vec<u8>,
    pub revision: u32,
}

fn seal(buf: &mut ByteBuffer) -> Vec<u8> {
    let checksum = compute_checksum(buf.as_slice());
    buf.append(&checksum.to_le_bytes());
    buf.to_owned_bytes()
}

fn verify_sealed(bytes: &[u8]) -> StorageResult<()> {
    let body_len = bytes.len() - CHECKSUM_SIZE;
    let stored = read_u32(bytes, body_len);
    let computed = compute_checksum(&bytes[..body_len]);
    if stored != computed {
        return Err(StorageError::data_corruption(format!(
            "Record checksum mismatch: computed {:08x}, stored {:08x}",
            computed, stored
        )));
    }
    Ok(())
}

pub fn encode_key_record(
    deleted: bool,
    key: &[u8],
    revision: u32,
    revision_root: u64,
    latest_value: u64,
) -> StorageResult<EncodedRecord> {
    let key_len = len_u32(key.len(), "Key")?;

    let mut buf = ByteBuffer::with_capacity(KEY_PREFIX_SIZE + key.len() + CHECKSUM_SIZE);
    buf.append_single(flag_byte(deleted));
    buf.append(&revision.to_le_bytes());
    buf.append(&revision_root.to_le_bytes());
    buf.append(&latest_value.to_le_bytes());
    buf.append(&key_len.to_le_bytes());
    buf.append(key);
    let payload = seal(&mut buf);

    let header = RecordHeader::for_payload(RecordKind::Key, deleted, revision, &payload)?;
    Ok(EncodedRecord {
        header: header.encode(),
        payload,
    })
}

/// Encode one document revision.
///
/// Live values pass through `compressor` when one is given. A tombstone
/// always encodes an empty value and never touches the compressor.
pub fn encode_value_record(
    deleted: bool,
    value: &[u8],
    revision: u32,
    compressor: Option<&dyn Compressor>,
) -> StorageResult<EncodedRecord> {
    let compressed;
    let stored: &[u8] = match (deleted, compressor) {
        (true, _) => &[],
        (false, Some(compressor)) => {
            compressed = compressor
                .compress(value)
                .map_err(StorageError::compression_failed)?;
            &compressed
        }
        (false, None) => value,
    };
    let value_len = len_u32(stored.len(), "Value")?;

    let mut buf = ByteBuffer::with_capacity(VALUE_PREFIX_SIZE + stored.len() + CHECKSUM_SIZE);
    buf.append_single(flag_byte(deleted));
    buf.append(&revision.to_le_bytes());
    buf.append(&value_len.to_le_bytes());
    buf.append(stored);
    let payload = seal(&mut buf);

    let header = RecordHeader::for_payload(RecordKind::Value, deleted, revision, &payload)?;
    Ok(EncodedRecord {
        header: header.encode(),
        payload,
    })
}

/// Total payload length of a value record, from its fixed prefix.
fn value_payload_len(prefix: &[u8]) -> usize {
    VALUE_PREFIX_SIZE + read_u32(prefix, 5) as usize + CHECKSUM_SIZE
}

/// Total payload length of a key record, from its fixed prefix.
fn key_payload_len(prefix: &[u8]) -> usize {
    KEY_PREFIX_SIZE + read_u32(prefix, 21) as usize + CHECKSUM_SIZE
}

/// Decode a value payload, decompressing live values when a compressor is
/// given.
pub fn decode_value_record(
    bytes: &[u8],
    compressor: Option<&dyn Compressor>,
) -> StorageResult<ValueRecord> {
    if bytes.len() < VALUE_PREFIX_SIZE + CHECKSUM_SIZE {
        return Err(StorageError::data_corruption(format!(
            "Value record truncated: {} bytes",
            bytes.len()
        )));
    }
    let expected = value_payload_len(bytes);
    if bytes.len() != expected {
        return Err(StorageError::data_corruption(format!(
            "Value record length {} does not match encoded length {}",
            bytes.len(),
            expected
        )));
    }
    verify_sealed(bytes)?;

    let deleted = parse_flag(bytes[0])?;
    let revision = read_u32(bytes, 1);
    let stored = &bytes[VALUE_PREFIX_SIZE..expected - CHECKSUM_SIZE];

    if deleted {
        if !stored.is_empty() {
            return Err(StorageError::data_corruption(
                "Deleted value record carries a payload",
            ));
        }
        return Ok(ValueRecord {
            deleted,
            value: Vec::new(),
            revision,
        });
    }

    let value = match compressor {
        Some(compressor) => compressor
            .decompress(stored)
            .map_err(StorageError::decompression_failed)?,
        None => stored.to_vec(),
    };
    Ok(ValueRecord {
        deleted,
        value,
        revision,
    })
}

pub fn decode_key_record(bytes: &[u8]) -> StorageResult<KeyRecord> {
    if bytes.len() < KEY_PREFIX_SIZE + CHECKSUM_SIZE {
        return Err(StorageError::data_corruption(format!(
            "Key record truncated: {} bytes",
            bytes.len()
        )));
    }
    let expected = key_payload_len(bytes);
    if bytes.len() != expected {
        return Err(StorageError::data_corruption(format!(
            "Key record length {} does not match encoded length {}",
            bytes.len(),
            expected
        )));
    }
    verify_sealed(bytes)?;

    Ok(KeyRecord {
        deleted: parse_flag(bytes[0])?,
        revision: read_u32(bytes, 1),
        revision_root: read_u64(bytes, 5),
        latest_value: read_u64(bytes, 13),
        key: bytes[KEY_PREFIX_SIZE..expected - CHECKSUM_SIZE].to_vec(),
    })
}

/// Fetch and decode the value record whose payload starts at `offset`.
pub fn read_value_record(
    log: &AppendLogFile,
    offset: u64,
    compressor: Option<&dyn Compressor>,
) -> StorageResult<ValueRecord> {
    let prefix = log.read(offset, VALUE_PREFIX_SIZE)?;
    let bytes = log.read(offset, value_payload_len(&prefix))?;
    decode_value_record(&bytes, compressor)
        .map_err(|e| e.with_details(format!("logical_offset: {}", offset)))
}

/// Fetch and decode the key record whose payload starts at `offset`.
pub fn read_key_record(log: &AppendLogFile, offset: u64) -> StorageResult<KeyRecord> {
    let prefix = log.read(offset, KEY_PREFIX_SIZE)?;
    let bytes = log.read(offset, key_payload_len(&prefix))?;
    decode_key_record(&bytes).map_err(|e| e.with_details(format!("logical_offset: {}", offset)))
}

/// Encode a document's textual form as a value record.
///
/// `None` stores an empty value, which is how an absent document is spelled.
pub fn encode_document(
    deleted: bool,
    document: Option<&str>,
    revision: u32,
    compressor: Option<&dyn Compressor>,
) -> StorageResult<EncodedRecord> {
    let bytes = document.map(str::as_bytes).unwrap_or(&[]);
    encode_value_record(deleted, bytes, revision, compressor)
}

/// Textual form of a decoded value record; `None` for tombstones.
pub fn decode_document(record: &ValueRecord) -> StorageResult<Option<String>> {
    if record.deleted {
        return Ok(None);
    }
    String::from_utf8(record.value.clone())
        .map(Some)
        .map_err(|e| StorageError::data_corruption(format!("Document is not UTF-8: {}", e)))
}

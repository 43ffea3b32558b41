use bytes::{BufMut, BytesMut};
use prost::encoding::{decode_varint, encode_varint};

use crate::error::{FerrocaskError, Result};

pub(crate) const CRC_SIZE: usize = 4;

/// Widest possible record header: crc (4) + type (1) + two u32 varints
/// (5 bytes each).
pub(crate) const MAX_RECORD_HEADER_SIZE: usize = CRC_SIZE + 1 + 5 + 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogRecordType {
    /// A live key-value pair.
    Normal = 0,
    /// Tombstone; the value is empty.
    Delete = 1,
    /// Commit marker terminating a write batch.
    TxnFin = 2,
}

impl LogRecordType {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => LogRecordType::Normal,
            1 => LogRecordType::Delete,
            2 => LogRecordType::TxnFin,
            // Only reachable after a crc check has passed, and no other
            // type byte is ever written.
            other => unreachable!("unknown log record type {other}"),
        }
    }
}

/// Unit of the append-only log.
///
/// On disk a record is framed as
/// `crc(4, LE) | type(1) | klen(varint) | vlen(varint) | key | value`,
/// where the crc covers every byte after its own slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub(crate) key: Vec<u8>,
    pub(crate) value: Vec<u8>,
    pub(crate) record_type: LogRecordType,
}

impl LogRecord {
    /// Encode into the on-disk framing, crc filled in.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(
            MAX_RECORD_HEADER_SIZE + self.key.len() + self.value.len(),
        );
        buf.put_u32_le(0); // crc slot, patched once the payload is in place
        buf.put_u8(self.record_type as u8);
        encode_varint(self.key.len() as u64, &mut buf);
        encode_varint(self.value.len() as u64, &mut buf);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        buf.to_vec()
    }
}

/// Decoded record header. The type is kept as the raw byte until the crc
/// has been verified.
pub(crate) struct RecordHeader {
    pub(crate) crc: u32,
    pub(crate) record_type: u8,
    pub(crate) key_size: u32,
    pub(crate) value_size: u32,
}

/// Decode a header from the front of `buf`, returning it together with its
/// encoded length. Returns `None` when `buf` cannot hold a header, which
/// callers treat as end-of-stream.
pub(crate) fn decode_record_header(buf: &[u8]) -> Option<(RecordHeader, u64)> {
    if buf.len() <= CRC_SIZE {
        return None;
    }

    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let record_type = buf[CRC_SIZE];

    // A varint truncated by a torn tail decodes as zero here; the crc
    // verification downstream rejects the record.
    let mut cursor = &buf[CRC_SIZE + 1..];
    let before = cursor.len();
    let key_size = decode_varint(&mut cursor).unwrap_or(0);
    let value_size = decode_varint(&mut cursor).unwrap_or(0);
    let header_size = (CRC_SIZE + 1 + before - cursor.len()) as u64;

    Some((
        RecordHeader {
            crc,
            record_type,
            key_size: key_size as u32,
            value_size: value_size as u32,
        },
        header_size,
    ))
}

/// Recompute the crc the same way `encode` does: over the header bytes past
/// the crc slot, then key, then value.
pub(crate) fn record_crc(header_past_crc: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_past_crc);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Location of a single record on disk; the value type of the keydir.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordPosition {
    pub file_id: u32,
    pub offset: u64,
    /// Length of the encoded record, used for reclaim accounting.
    pub size: u32,
}

impl RecordPosition {
    /// Encode as `file_id (uvarint) | size (uvarint) | offset (varint)`.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_varint(self.file_id as u64, &mut buf);
        encode_varint(self.size as u64, &mut buf);
        encode_varint(encode_zigzag(self.offset as i64), &mut buf);
        buf.to_vec()
    }

    pub(crate) fn decode(mut buf: &[u8]) -> Result<Self> {
        let corrupted =
            |_| FerrocaskError::DirectoryCorrupted("malformed keydir position".to_string());
        let file_id = decode_varint(&mut buf).map_err(corrupted)?;
        let size = decode_varint(&mut buf).map_err(corrupted)?;
        let offset = decode_zigzag(decode_varint(&mut buf).map_err(corrupted)?);
        Ok(Self {
            file_id: file_id as u32,
            offset: offset as u64,
            size: size as u32,
        })
    }
}

/// A batch record held back during replay until its commit marker shows up.
pub(crate) struct TransactionRecord {
    pub(crate) record: LogRecord,
    pub(crate) pos: RecordPosition,
}

fn encode_zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn decode_zigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

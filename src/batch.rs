use std::collections::HashMap;
use std::sync::atomic::Ordering;

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use prost::encoding::{decode_varint, encode_varint};

use crate::error::{FerrocaskError, Result};
use crate::ferrocask::Ferrocask;
use crate::options::WriteBatchOptions;
use crate::record::{LogRecord, LogRecordType, RecordPosition};

/// Sequence number reserved for writes outside any batch.
pub(crate) const NON_TXN_SEQUENCE: u64 = 0;

/// Key of the commit marker terminating every batch on disk.
const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// A group of writes that becomes visible atomically at commit.
///
/// Staged records live only in memory until [`commit`](Self::commit)
/// appends them all under one sequence number followed by a commit marker.
/// Recovery discards any batch whose marker never made it to disk, so a
/// crash mid-commit leaves no trace.
pub struct WriteBatch<'a> {
    engine: &'a Ferrocask,
    options: WriteBatchOptions,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(engine: &'a Ferrocask, options: WriteBatchOptions) -> Self {
        Self {
            engine,
            options,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Stage a put, replacing any earlier staged record for the same key.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(FerrocaskError::KeyEmpty);
        }
        let record = LogRecord {
            key: key.clone(),
            value,
            record_type: LogRecordType::Normal,
        };
        self.pending.lock().insert(key, record);
        Ok(())
    }

    /// Stage a delete. A key that exists neither in the keydir nor on disk
    /// only needs its staged put dropped; nothing is written for it at
    /// commit.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(FerrocaskError::KeyEmpty);
        }

        let mut pending = self.pending.lock();
        if self.engine.keydir.get(&key).is_none() {
            pending.remove(&key);
            return Ok(());
        }

        let record = LogRecord {
            key: key.clone(),
            value: Vec::new(),
            record_type: LogRecordType::Delete,
        };
        pending.insert(key, record);
        Ok(())
    }

    /// Number of records currently staged.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Append every staged record under a fresh sequence number, terminate
    /// the group with a commit marker, then apply the batch to the keydir.
    ///
    /// On failure the staged records are kept and nothing becomes visible;
    /// any bytes already appended carry no commit marker and are discarded
    /// by recovery. The caller may retry.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_size {
            return Err(FerrocaskError::BatchTooLarge);
        }

        // Exclusive engine access for the whole commit: appends, the
        // marker, and the keydir application happen without interleaving
        // writers.
        let mut store = self.engine.store.write();
        let seq = self.engine.txn_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: HashMap<Vec<u8>, RecordPosition> =
            HashMap::with_capacity(pending.len());
        for (key, record) in pending.iter() {
            let sequenced = LogRecord {
                key: key_with_sequence(key, seq),
                value: record.value.clone(),
                record_type: record.record_type,
            };
            let pos = self.engine.append_log_record(&mut store, &sequenced)?;
            positions.insert(key.clone(), pos);
        }

        let marker = LogRecord {
            key: key_with_sequence(TXN_FIN_KEY, seq),
            value: Vec::new(),
            record_type: LogRecordType::TxnFin,
        };
        self.engine.append_log_record(&mut store, &marker)?;

        if self.options.sync_on_commit {
            store.active_file.sync()?;
        }

        // The marker is durable; the batch may now become visible.
        for (key, record) in pending.drain() {
            if let Some(pos) = positions.remove(&key) {
                self.engine.apply_to_keydir(key, record.record_type, pos);
            }
        }

        Ok(())
    }
}

/// Prefix `key` with an unsigned varint sequence number for storage.
pub(crate) fn key_with_sequence(key: &[u8], seq: u64) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(10 + key.len());
    encode_varint(seq, &mut buf);
    buf.put_slice(key);
    buf.to_vec()
}

/// Split an on-disk key into its sequence number and the user key.
pub(crate) fn split_sequenced_key(key: &[u8]) -> (u64, Vec<u8>) {
    let mut cursor = key;
    let seq = decode_varint(&mut cursor).unwrap_or(NON_TXN_SEQUENCE);
    (seq, cursor.to_vec())
}

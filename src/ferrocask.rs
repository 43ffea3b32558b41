use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use fs2::FileExt;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use crate::batch::{key_with_sequence, split_sequenced_key, WriteBatch, NON_TXN_SEQUENCE};
use crate::datafile::{DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FIN_FILE_NAME};
use crate::error::{FerrocaskError, Result};
use crate::fio::IoKind;
use crate::iterator::EngineIterator;
use crate::keydir::{new_indexer, Indexer};
use crate::merge;
use crate::options::{IteratorOptions, Options, WriteBatchOptions};
use crate::record::{LogRecord, LogRecordType, RecordPosition, TransactionRecord};
use crate::utils;

pub(crate) const LOCK_FILE_NAME: &str = "flock";

const INITIAL_FILE_ID: u32 = 0;

/// An embeddable Bitcask storage engine.
///
/// All writes append to a single active data file; an in-memory keydir maps
/// every live key to the exact position of its newest record, so reads cost
/// at most one seek. A directory lock keeps the engine the sole owner of
/// its data directory for the lifetime of the value.
pub struct Ferrocask {
    pub(crate) options: Options,

    /// Mutable file state. Reads share it, appends and rollover take it
    /// exclusively.
    pub(crate) store: RwLock<Store>,

    /// The keydir carries its own synchronization so iterators can snapshot
    /// it under shared engine access.
    pub(crate) keydir: Box<dyn Indexer>,

    /// Last batch sequence number handed out. Restored from the log on
    /// open.
    pub(crate) txn_seq: AtomicU64,

    /// Bytes on disk known to be dead (overwritten or tombstoned).
    pub(crate) reclaim_size: AtomicU64,

    bytes_since_sync: AtomicU64,

    /// Held for the duration of a merge; `try_lock` failure means one is
    /// already running.
    pub(crate) merge_guard: Mutex<()>,

    lock_file: File,
    is_initial: bool,
}

/// The append target plus every sealed read-only file, guarded together by
/// the engine lock.
pub(crate) struct Store {
    pub(crate) active_file: DataFile,
    pub(crate) older_files: HashMap<u32, DataFile>,
}

/// Point-in-time engine statistics.
#[derive(Clone, Debug)]
pub struct Stat {
    pub key_count: usize,
    pub data_file_count: usize,
    pub reclaim_size: u64,
    pub disk_size: u64,
}

impl Ferrocask {
    /// Open the engine rooted at `options.dir_path`, creating the directory
    /// when missing.
    ///
    /// Acquires the directory lock (failing with `InUse` if another
    /// instance holds it), consumes any finished merge staging, then
    /// rebuilds the keydir from the hint file and the non-merged tail of
    /// the log.
    pub fn open(options: Options) -> Result<Self> {
        check_options(&options)?;

        let dir_path = options.dir_path.clone();
        let mut is_initial = false;
        if !dir_path.is_dir() {
            is_initial = true;
            fs::create_dir_all(&dir_path)
                .map_err(|_| FerrocaskError::BadDirectory(dir_path.clone()))?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir_path.join(LOCK_FILE_NAME))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(FerrocaskError::InUse);
        }

        merge::load_merge_staging(&dir_path)?;

        let startup_io = if options.mmap_at_startup {
            IoKind::MemoryMap
        } else {
            IoKind::Standard
        };
        let (file_ids, mut data_files) = load_data_files(&dir_path, startup_io)?;
        if file_ids.is_empty() {
            is_initial = true;
        }
        info!("opening data files {file_ids:?} in {}", dir_path.display());

        let active_file = match data_files.pop() {
            Some(file) => file,
            None => DataFile::open(&dir_path, INITIAL_FILE_ID, IoKind::Standard)?,
        };
        let mut older_files = HashMap::new();
        for file in data_files {
            older_files.insert(file.file_id(), file);
        }

        let engine = Self {
            keydir: new_indexer(options.index_kind),
            store: RwLock::new(Store {
                active_file,
                older_files,
            }),
            txn_seq: AtomicU64::new(NON_TXN_SEQUENCE),
            reclaim_size: AtomicU64::new(0),
            bytes_since_sync: AtomicU64::new(0),
            merge_guard: Mutex::new(()),
            lock_file,
            is_initial,
            options,
        };

        engine.load_keydir_from_hint_file()?;
        engine.load_keydir_from_data_files(&file_ids)?;

        if engine.options.mmap_at_startup {
            engine.reset_io_kind()?;
        }

        // Appends land at the physical end of the file, so any torn tail
        // that replay skipped must actually come off the disk.
        {
            let mut store = engine.store.write();
            if store.active_file.size()? > store.active_file.write_off() {
                store.active_file.truncate_to_write_off()?;
            }
        }

        Ok(engine)
    }

    /// Whether open created (or found empty) the data directory.
    pub fn is_initial(&self) -> bool {
        self.is_initial
    }

    /// Inserts a key-value pair, replacing any previous value.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(FerrocaskError::KeyEmpty);
        }

        let record = LogRecord {
            key: key_with_sequence(&key, NON_TXN_SEQUENCE),
            value,
            record_type: LogRecordType::Normal,
        };

        // The record must be on disk before the keydir points at it, and
        // the keydir update must happen before the engine lock is released.
        let mut store = self.store.write();
        let pos = self.append_log_record(&mut store, &record)?;
        let old = self.keydir.put(key, pos);
        drop(store);

        if let Some(old) = old {
            self.reclaim_size.fetch_add(old.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(FerrocaskError::KeyEmpty);
        }
        let pos = self
            .keydir
            .get(key)
            .ok_or(FerrocaskError::KeyNotFound)?;
        self.value_at_position(&pos)
    }

    /// Removes `key` by appending a tombstone. Deleting an absent key is a
    /// no-op; the dead bytes are reclaimed by the next merge.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(FerrocaskError::KeyEmpty);
        }
        if self.keydir.get(key).is_none() {
            return Ok(());
        }

        let record = LogRecord {
            key: key_with_sequence(key, NON_TXN_SEQUENCE),
            value: Vec::new(),
            record_type: LogRecordType::Delete,
        };

        let mut store = self.store.write();
        let pos = self.append_log_record(&mut store, &record)?;
        let old = self.keydir.delete(key);
        drop(store);

        // The tombstone itself is dead weight the moment it lands.
        self.reclaim_size.fetch_add(pos.size as u64, Ordering::SeqCst);
        match old {
            Some(old) => {
                self.reclaim_size.fetch_add(old.size as u64, Ordering::SeqCst);
                Ok(())
            }
            None => Err(FerrocaskError::IndexUpdateFailure),
        }
    }

    /// Visit every live entry in ascending key order. The fold stops early
    /// when `visit` returns false.
    pub fn fold<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], Vec<u8>) -> bool,
    {
        let mut iter = self.keydir.iterator(false);
        while iter.valid() {
            let value = self.value_at_position(&iter.value())?;
            if !visit(iter.key(), value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Snapshot of all live keys in ascending order.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut iter = self.keydir.iterator(false);
        let mut keys = Vec::with_capacity(self.keydir.len());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        keys
    }

    /// Cursor over the live keyspace. Values are fetched from disk on
    /// demand.
    pub fn iterator(&self, options: IteratorOptions) -> EngineIterator<'_> {
        EngineIterator::new(self, options)
    }

    /// Stage a group of writes that commit atomically.
    pub fn write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch::new(self, options)
    }

    /// Fsync the active data file.
    pub fn sync(&self) -> Result<()> {
        self.store.read().active_file.sync()
    }

    pub fn stat(&self) -> Result<Stat> {
        let store = self.store.read();
        Ok(Stat {
            key_count: self.keydir.len(),
            data_file_count: store.older_files.len() + 1,
            reclaim_size: self.reclaim_size.load(Ordering::SeqCst),
            disk_size: utils::dir_size(&self.options.dir_path)?,
        })
    }

    /// Copy the data directory to `target`, leaving the lock file behind.
    pub fn backup(&self, target: &Path) -> Result<()> {
        let store = self.store.read();
        store.active_file.sync()?;
        utils::copy_dir(&self.options.dir_path, target, &[LOCK_FILE_NAME])
    }

    /// Flush the active file and release the directory lock. Runs again
    /// without effect from `Drop`.
    pub fn close(&self) -> Result<()> {
        if !self.options.dir_path.is_dir() {
            return Ok(());
        }
        let store = self.store.read();
        store.active_file.sync()?;
        FileExt::unlock(&self.lock_file)?;
        Ok(())
    }

    /// Append an encoded record to the active file, rolling it into the
    /// older-files map first when the record would overflow
    /// `max_file_size`. The caller holds the engine write lock.
    pub(crate) fn append_log_record(
        &self,
        store: &mut Store,
        record: &LogRecord,
    ) -> Result<RecordPosition> {
        let encoded = record.encode();
        let record_size = encoded.len() as u64;

        if store.active_file.write_off() + record_size > self.options.max_file_size {
            self.roll_active_file(store)?;
        }

        let offset = store.active_file.write_off();
        store.active_file.write(&encoded)?;

        let unsynced = self
            .bytes_since_sync
            .fetch_add(record_size, Ordering::SeqCst)
            + record_size;
        let threshold = self.options.sync_threshold;
        if self.options.sync_every_write || (threshold > 0 && unsynced >= threshold) {
            store.active_file.sync()?;
            self.bytes_since_sync.store(0, Ordering::SeqCst);
        }

        Ok(RecordPosition {
            file_id: store.active_file.file_id(),
            offset,
            size: record_size as u32,
        })
    }

    /// Seal the active file and start a fresh one with the next id.
    pub(crate) fn roll_active_file(&self, store: &mut Store) -> Result<()> {
        store.active_file.sync()?;
        let next_id = store.active_file.file_id() + 1;
        let fresh = DataFile::open(&self.options.dir_path, next_id, IoKind::Standard)?;
        let sealed = std::mem::replace(&mut store.active_file, fresh);
        store.older_files.insert(sealed.file_id(), sealed);
        Ok(())
    }

    /// Fetch and decode the record value behind a keydir position.
    pub(crate) fn value_at_position(&self, pos: &RecordPosition) -> Result<Vec<u8>> {
        let store = self.store.read();
        let (record, _) = if store.active_file.file_id() == pos.file_id {
            store.active_file.read_record(pos.offset)?
        } else {
            store
                .older_files
                .get(&pos.file_id)
                .ok_or(FerrocaskError::DataFileMissing)?
                .read_record(pos.offset)?
        };

        // The keydir never points at tombstones; treat one as absent.
        if record.record_type != LogRecordType::Normal {
            return Err(FerrocaskError::KeyNotFound);
        }
        Ok(record.value)
    }

    fn load_keydir_from_hint_file(&self) -> Result<()> {
        let hint_path = self.options.dir_path.join(HINT_FILE_NAME);
        if !hint_path.is_file() {
            return Ok(());
        }

        info!("loading keydir from hint file {}", hint_path.display());
        let hint_file = DataFile::hint_file(&self.options.dir_path)?;
        let mut offset = 0_u64;
        loop {
            match hint_file.read_record(offset) {
                Ok((record, size)) => {
                    let pos = RecordPosition::decode(&record.value)?;
                    self.keydir.put(record.key, pos);
                    offset += size;
                }
                Err(FerrocaskError::ReadEof) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Replay data files in ascending id order, skipping everything below
    /// the merge boundary. Batch records are buffered per sequence and only
    /// applied when their commit marker turns up; orphans vanish.
    fn load_keydir_from_data_files(&self, file_ids: &[u32]) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        let mut non_merge_fid = 0;
        if self.options.dir_path.join(MERGE_FIN_FILE_NAME).is_file() {
            non_merge_fid = merge::non_merge_file_id(&self.options.dir_path)?;
        }

        let mut pending_txns: HashMap<u64, Vec<TransactionRecord>> = HashMap::new();
        let mut max_seq = NON_TXN_SEQUENCE;

        let mut store = self.store.write();
        for (i, &file_id) in file_ids.iter().enumerate() {
            if file_id < non_merge_fid {
                continue;
            }
            let is_last = i == file_ids.len() - 1;

            let mut offset = 0_u64;
            loop {
                let read = if store.active_file.file_id() == file_id {
                    store.active_file.read_record(offset)
                } else {
                    store
                        .older_files
                        .get(&file_id)
                        .ok_or(FerrocaskError::DataFileMissing)?
                        .read_record(offset)
                };
                let (record, size) = match read {
                    Ok(ok) => ok,
                    Err(FerrocaskError::ReadEof) => break,
                    Err(FerrocaskError::InvalidCrc) if is_last => {
                        // Torn tail of the active file; everything before
                        // this offset is intact.
                        warn!("dropping torn tail of data file {file_id} at offset {offset}");
                        break;
                    }
                    Err(err) => return Err(err),
                };

                let pos = RecordPosition {
                    file_id,
                    offset,
                    size: size as u32,
                };
                let (seq, user_key) = split_sequenced_key(&record.key);

                if seq == NON_TXN_SEQUENCE {
                    self.apply_to_keydir(user_key, record.record_type, pos);
                } else if record.record_type == LogRecordType::TxnFin {
                    for buffered in pending_txns.remove(&seq).unwrap_or_default() {
                        self.apply_to_keydir(
                            buffered.record.key,
                            buffered.record.record_type,
                            buffered.pos,
                        );
                    }
                } else {
                    pending_txns.entry(seq).or_default().push(TransactionRecord {
                        record: LogRecord {
                            key: user_key,
                            value: record.value,
                            record_type: record.record_type,
                        },
                        pos,
                    });
                }

                if seq > max_seq {
                    max_seq = seq;
                }
                offset += size;
            }

            if is_last {
                store.active_file.set_write_off(offset);
            }
        }

        self.txn_seq.store(max_seq, Ordering::SeqCst);
        Ok(())
    }

    /// Fold one replayed (or committed) record into the keydir, keeping the
    /// reclaim counter in step.
    pub(crate) fn apply_to_keydir(
        &self,
        key: Vec<u8>,
        record_type: LogRecordType,
        pos: RecordPosition,
    ) {
        let replaced = match record_type {
            LogRecordType::Normal => self.keydir.put(key, pos),
            LogRecordType::Delete => {
                self.reclaim_size.fetch_add(pos.size as u64, Ordering::SeqCst);
                self.keydir.delete(&key)
            }
            LogRecordType::TxnFin => unreachable!("commit markers never reach the keydir"),
        };
        if let Some(old) = replaced {
            self.reclaim_size.fetch_add(old.size as u64, Ordering::SeqCst);
        }
    }

    /// Drop the startup memory maps and reopen every data file with
    /// standard file I/O.
    fn reset_io_kind(&self) -> Result<()> {
        let mut store = self.store.write();
        let dir_path = &self.options.dir_path;
        store.active_file.reset_io(dir_path, IoKind::Standard)?;
        for file in store.older_files.values_mut() {
            file.reset_io(dir_path, IoKind::Standard)?;
        }
        Ok(())
    }
}

impl Drop for Ferrocask {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("error closing engine: {err}");
        }
    }
}

fn check_options(options: &Options) -> Result<()> {
    if options.dir_path.as_os_str().is_empty() {
        return Err(FerrocaskError::InvalidOptions(
            "dir_path must not be empty".to_string(),
        ));
    }
    if options.max_file_size == 0 {
        return Err(FerrocaskError::InvalidOptions(
            "max_file_size must be greater than zero".to_string(),
        ));
    }
    if options.merge_ratio <= 0.0 || options.merge_ratio >= 1.0 {
        return Err(FerrocaskError::InvalidOptions(
            "merge_ratio must lie strictly between 0 and 1".to_string(),
        ));
    }
    Ok(())
}

/// Enumerate `<dir>/*.data`, returning ascending file ids and the matching
/// open files. A `.data` name that does not parse as an id means the
/// directory was tampered with.
fn load_data_files(dir_path: &Path, kind: IoKind) -> Result<(Vec<u32>, Vec<DataFile>)> {
    let mut file_ids = Vec::new();
    for entry in fs::read_dir(dir_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.ends_with(DATA_FILE_SUFFIX) {
            continue;
        }
        let file_id = utils::parse_data_file_id(&entry.path()).ok_or_else(|| {
            FerrocaskError::DirectoryCorrupted(format!("unexpected data file name {name}"))
        })?;
        file_ids.push(file_id);
    }
    file_ids.sort_unstable();

    let mut data_files = Vec::with_capacity(file_ids.len());
    for &file_id in &file_ids {
        data_files.push(DataFile::open(dir_path, file_id, kind)?);
    }
    Ok((file_ids, data_files))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn test_options(dir: &TempDir) -> Options {
        Options {
            dir_path: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn open_empty_dir_creates_first_data_file() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        let engine = Ferrocask::open(test_options(&temp_dir)).unwrap();

        assert!(engine.is_initial());
        let store = engine.store.read();
        assert_eq!(store.active_file.file_id(), 0);
        assert!(store.older_files.is_empty());
    }

    #[test]
    fn open_picks_highest_id_as_active() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        for file_id in 0..5 {
            fs::File::create(utils::data_file_path(temp_dir.path(), file_id)).unwrap();
        }

        let engine = Ferrocask::open(test_options(&temp_dir)).unwrap();
        assert!(!engine.is_initial());

        let store = engine.store.read();
        assert_eq!(store.active_file.file_id(), 4);
        assert_eq!(store.older_files.len(), 4);
    }

    #[test]
    fn open_rejects_misnamed_data_file() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        fs::File::create(temp_dir.path().join("not-a-number.data")).unwrap();

        let result = Ferrocask::open(test_options(&temp_dir));
        assert!(matches!(
            result,
            Err(FerrocaskError::DirectoryCorrupted(_))
        ));
    }

    #[test]
    fn open_rejects_bad_options() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");

        let mut options = test_options(&temp_dir);
        options.max_file_size = 0;
        assert!(matches!(
            Ferrocask::open(options),
            Err(FerrocaskError::InvalidOptions(_))
        ));

        let mut options = test_options(&temp_dir);
        options.merge_ratio = 1.5;
        assert!(matches!(
            Ferrocask::open(options),
            Err(FerrocaskError::InvalidOptions(_))
        ));
    }

    #[test]
    fn second_open_fails_while_locked() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        let engine = Ferrocask::open(test_options(&temp_dir)).unwrap();

        assert!(matches!(
            Ferrocask::open(test_options(&temp_dir)),
            Err(FerrocaskError::InUse)
        ));

        engine.close().unwrap();
        drop(engine);
        assert!(Ferrocask::open(test_options(&temp_dir)).is_ok());
    }

    #[test]
    fn append_rolls_over_at_max_file_size() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        let mut options = test_options(&temp_dir);
        options.max_file_size = 64;
        let engine = Ferrocask::open(options).unwrap();

        for i in 0..10_u32 {
            engine
                .put(format!("key-{i}").into_bytes(), vec![b'v'; 16])
                .unwrap();
        }

        let store = engine.store.read();
        assert!(store.active_file.file_id() > 0);
        assert_eq!(
            store.older_files.len() as u32,
            store.active_file.file_id()
        );
        for file_id in 0..store.active_file.file_id() {
            let older = store.older_files.get(&file_id).unwrap();
            assert!(older.write_off() <= 64);
        }
        drop(store);

        assert_eq!(engine.list_keys().len(), 10);
    }

    #[test]
    fn delete_of_absent_key_writes_nothing() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        let engine = Ferrocask::open(test_options(&temp_dir)).unwrap();

        engine.delete(b"ghost").unwrap();
        assert_eq!(engine.store.read().active_file.write_off(), 0);
    }

    #[test]
    fn reclaim_size_grows_on_overwrite_and_delete() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        let engine = Ferrocask::open(test_options(&temp_dir)).unwrap();

        engine.put(b"key".to_vec(), b"first".to_vec()).unwrap();
        assert_eq!(engine.reclaim_size.load(Ordering::SeqCst), 0);

        engine.put(b"key".to_vec(), b"second".to_vec()).unwrap();
        let after_overwrite = engine.reclaim_size.load(Ordering::SeqCst);
        assert!(after_overwrite > 0);

        engine.delete(b"key").unwrap();
        assert!(engine.reclaim_size.load(Ordering::SeqCst) > after_overwrite);
    }

    #[test]
    fn reopen_discards_torn_tail() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        let engine = Ferrocask::open(test_options(&temp_dir)).unwrap();
        engine.put(b"intact".to_vec(), b"value".to_vec()).unwrap();
        let clean_len = engine.store.read().active_file.write_off();
        engine.close().unwrap();
        drop(engine);

        // Half a record at the end of the active file, as a crash mid-append
        // would leave it.
        let torn = LogRecord {
            key: key_with_sequence(b"torn", NON_TXN_SEQUENCE),
            value: b"never finished".to_vec(),
            record_type: LogRecordType::Normal,
        }
        .encode();
        let data_path = utils::data_file_path(temp_dir.path(), 0);
        let mut file = OpenOptions::new().append(true).open(&data_path).unwrap();
        std::io::Write::write_all(&mut file, &torn[..torn.len() / 2]).unwrap();
        drop(file);

        let engine = Ferrocask::open(test_options(&temp_dir)).unwrap();
        assert_eq!(engine.get(b"intact").unwrap(), b"value");
        assert!(matches!(engine.get(b"torn"), Err(FerrocaskError::KeyNotFound)));

        // The torn bytes are gone from disk, so the next append lines up
        // with its recorded position.
        assert_eq!(fs::metadata(&data_path).unwrap().len(), clean_len);
        engine.put(b"fresh".to_vec(), b"post-crash".to_vec()).unwrap();
        assert_eq!(engine.get(b"fresh").unwrap(), b"post-crash");
    }

    #[test]
    fn reopen_discards_zero_filled_tail() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        let engine = Ferrocask::open(test_options(&temp_dir)).unwrap();
        engine.put(b"intact".to_vec(), b"value".to_vec()).unwrap();
        let clean_len = engine.store.read().active_file.write_off();
        engine.close().unwrap();
        drop(engine);

        let data_path = utils::data_file_path(temp_dir.path(), 0);
        let mut file = OpenOptions::new().append(true).open(&data_path).unwrap();
        std::io::Write::write_all(&mut file, &[0_u8; 128]).unwrap();
        drop(file);

        let engine = Ferrocask::open(test_options(&temp_dir)).unwrap();
        assert_eq!(engine.get(b"intact").unwrap(), b"value");
        assert_eq!(engine.store.read().active_file.write_off(), clean_len);
        assert_eq!(fs::metadata(&data_path).unwrap().len(), clean_len);
    }

    #[test]
    fn corruption_in_a_sealed_file_fails_open() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        let mut options = test_options(&temp_dir);
        options.max_file_size = 64;
        let engine = Ferrocask::open(options.clone()).unwrap();
        for i in 0..10_u32 {
            engine
                .put(format!("key-{i}").into_bytes(), vec![b'v'; 16])
                .unwrap();
        }
        engine.close().unwrap();
        drop(engine);

        // Flip a payload byte in the middle of the oldest sealed file.
        let data_path = utils::data_file_path(temp_dir.path(), 0);
        let mut bytes = fs::read(&data_path).unwrap();
        bytes[10] ^= 0xff;
        fs::write(&data_path, bytes).unwrap();

        assert!(matches!(
            Ferrocask::open(options),
            Err(FerrocaskError::InvalidCrc)
        ));
    }

    #[test]
    fn stat_reports_counts() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        let engine = Ferrocask::open(test_options(&temp_dir)).unwrap();

        engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();

        let stat = engine.stat().unwrap();
        assert_eq!(stat.key_count, 2);
        assert_eq!(stat.data_file_count, 1);
        assert!(stat.disk_size > 0);
    }

    #[test]
    fn backup_copies_everything_but_the_lock() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        let engine = Ferrocask::open(test_options(&temp_dir)).unwrap();
        engine.put(b"key".to_vec(), b"value".to_vec()).unwrap();

        let backup_dir = TempDir::new().unwrap();
        let target = backup_dir.path().join("snapshot");
        engine.backup(&target).unwrap();
        engine.close().unwrap();
        drop(engine);

        assert!(target.join("000000000.data").is_file());
        assert!(!target.join(LOCK_FILE_NAME).exists());

        let restored = Ferrocask::open(Options {
            dir_path: target,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(restored.get(b"key").unwrap(), b"value");
    }
}

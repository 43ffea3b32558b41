use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use log::{info, warn};

use crate::batch::{key_with_sequence, split_sequenced_key, NON_TXN_SEQUENCE};
use crate::datafile::{DataFile, MERGE_FIN_FILE_NAME};
use crate::error::{FerrocaskError, Result};
use crate::ferrocask::{Ferrocask, LOCK_FILE_NAME};
use crate::record::{LogRecord, LogRecordType};
use crate::utils;

const MERGE_DIR_SUFFIX: &str = ".merge";

/// Key of the single record inside the merge-finish marker file.
const MERGE_FIN_KEY: &[u8] = b"merge.fin";

impl Ferrocask {
    /// Rewrite all live records from sealed data files into a fresh
    /// generation inside a sibling staging directory, together with a hint
    /// file and a finish marker. The staging output is swapped in on the
    /// next open.
    ///
    /// Only one merge runs at a time; concurrent writes proceed normally
    /// and land in files at or above the merge boundary, outside the merge
    /// set.
    pub fn merge(&self) -> Result<()> {
        {
            let store = self.store.read();
            if store.active_file.write_off() == 0 && store.older_files.is_empty() {
                return Ok(());
            }
        }

        let Some(_running) = self.merge_guard.try_lock() else {
            return Err(FerrocaskError::MergeInProgress);
        };

        self.check_merge_gates()?;

        // Seal the current active file; everything below the fresh one is
        // the merge set and will never change again.
        let (non_merge_fid, merge_ids) = {
            let mut store = self.store.write();
            store.active_file.sync()?;
            self.roll_active_file(&mut store)?;
            let non_merge_fid = store.active_file.file_id();
            let mut ids: Vec<u32> = store.older_files.keys().copied().collect();
            ids.sort_unstable();
            (non_merge_fid, ids)
        };

        let staging_path = merge_path(&self.options.dir_path);
        if staging_path.is_dir() {
            fs::remove_dir_all(&staging_path)?;
        }
        fs::create_dir_all(&staging_path)?;

        info!(
            "merging data files {merge_ids:?} into {}, boundary {non_merge_fid}",
            staging_path.display()
        );

        let mut staging_options = self.options.clone();
        staging_options.dir_path = staging_path.clone();
        staging_options.sync_every_write = false;
        let staging_engine = Ferrocask::open(staging_options)?;
        let mut hint_file = DataFile::hint_file(&staging_path)?;

        for file_id in merge_ids {
            let mut offset = 0_u64;
            loop {
                let read = {
                    let store = self.store.read();
                    match store.older_files.get(&file_id) {
                        Some(data_file) => data_file.read_record(offset),
                        None => break,
                    }
                };
                let (record, size) = match read {
                    Ok(ok) => ok,
                    Err(FerrocaskError::ReadEof) => break,
                    Err(err) => return Err(err),
                };

                let (_, user_key) = split_sequenced_key(&record.key);

                // A record is live iff the keydir still points exactly at
                // it. Anything else is superseded and gets dropped.
                let live = self
                    .keydir
                    .get(&user_key)
                    .map_or(false, |pos| pos.file_id == file_id && pos.offset == offset);
                if live {
                    let rewritten = LogRecord {
                        // Committed data needs no sequence on rewrite.
                        key: key_with_sequence(&user_key, NON_TXN_SEQUENCE),
                        value: record.value,
                        record_type: record.record_type,
                    };
                    let new_pos = {
                        let mut staging_store = staging_engine.store.write();
                        staging_engine.append_log_record(&mut staging_store, &rewritten)?
                    };
                    hint_file.write_hint_record(user_key, new_pos)?;
                }

                offset += size;
            }
        }

        hint_file.sync()?;
        staging_engine.sync()?;
        staging_engine.close()?;
        drop(staging_engine);

        // The finish marker certifies the staging directory as complete;
        // until it exists the original generation stays authoritative.
        let mut fin_file = DataFile::merge_fin_file(&staging_path)?;
        let fin_record = LogRecord {
            key: MERGE_FIN_KEY.to_vec(),
            value: non_merge_fid.to_string().into_bytes(),
            record_type: LogRecordType::Normal,
        };
        fin_file.write(&fin_record.encode())?;
        fin_file.sync()?;

        info!("merge finished, staged output awaits next open");
        Ok(())
    }

    fn check_merge_gates(&self) -> Result<()> {
        let total_size = utils::dir_size(&self.options.dir_path)?;
        let reclaimable = self.reclaim_size.load(Ordering::SeqCst);

        let ratio = reclaimable as f32 / total_size as f32;
        if ratio < self.options.merge_ratio {
            info!(
                "merge skipped: reclaimable ratio {ratio:.3} below {:.3} \
                 (reclaimable {reclaimable}, total {total_size})",
                self.options.merge_ratio
            );
            return Err(FerrocaskError::MergeRatioBelowThreshold);
        }

        let survivors = total_size - reclaimable;
        if survivors >= utils::available_disk_space(&self.options.dir_path)? {
            return Err(FerrocaskError::InsufficientDiskSpace);
        }
        Ok(())
    }
}

/// Staging directory sibling to the working directory: `<dir>.merge`.
pub(crate) fn merge_path(dir_path: &Path) -> PathBuf {
    let mut name = dir_path
        .file_name()
        .unwrap_or(dir_path.as_os_str())
        .to_os_string();
    name.push(MERGE_DIR_SUFFIX);
    dir_path.with_file_name(name)
}

/// Consume a finished merge staging directory, if any: drop every working
/// data file below the recorded boundary and move the staged files in. An
/// unfinished staging directory is discarded wholesale. Runs before data
/// files are opened.
pub(crate) fn load_merge_staging(dir_path: &Path) -> Result<()> {
    let staging_path = merge_path(dir_path);
    if !staging_path.is_dir() {
        return Ok(());
    }

    let result = consume_merge_staging(dir_path, &staging_path);
    if let Err(err) = fs::remove_dir_all(&staging_path) {
        warn!(
            "failed to remove merge staging {}: {err}",
            staging_path.display()
        );
    }
    result
}

fn consume_merge_staging(dir_path: &Path, staging_path: &Path) -> Result<()> {
    let mut finished = false;
    let mut staged = Vec::new();
    for entry in fs::read_dir(staging_path)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == MERGE_FIN_FILE_NAME {
            finished = true;
        }
        if name == LOCK_FILE_NAME {
            continue;
        }
        staged.push((name, entry.path()));
    }

    if !finished {
        info!(
            "discarding unfinished merge staging {}",
            staging_path.display()
        );
        return Ok(());
    }

    let boundary = non_merge_file_id(staging_path)?;
    for file_id in 0..boundary {
        let merged_away = utils::data_file_path(dir_path, file_id);
        if merged_away.is_file() {
            fs::remove_file(merged_away)?;
        }
    }
    for (name, source) in staged {
        fs::rename(source, dir_path.join(name))?;
    }

    info!("merge staging consumed, non-merge boundary {boundary}");
    Ok(())
}

/// Read the first file id that was not merged out of the finish marker.
pub(crate) fn non_merge_file_id(dir_path: &Path) -> Result<u32> {
    let fin_file = DataFile::merge_fin_file(dir_path)?;
    let (record, _) = fin_file.read_record(0)?;
    let boundary = std::str::from_utf8(&record.value)
        .ok()
        .and_then(|text| text.parse::<u32>().ok())
        .ok_or_else(|| {
            FerrocaskError::DirectoryCorrupted("unreadable merge-finish marker".to_string())
        })?;
    Ok(boundary)
}

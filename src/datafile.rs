use std::io;
use std::path::Path;

use crate::error::{FerrocaskError, Result};
use crate::fio::{new_io_manager, IoKind, IoManager};
use crate::record::{
    decode_record_header, record_crc, LogRecord, LogRecordType, RecordPosition, CRC_SIZE,
    MAX_RECORD_HEADER_SIZE,
};
use crate::utils::data_file_path;

pub(crate) const DATA_FILE_SUFFIX: &str = ".data";
pub(crate) const HINT_FILE_NAME: &str = "hint-index";
pub(crate) const MERGE_FIN_FILE_NAME: &str = "hint-fin";

/// A single append-only log file: its id, the append cursor, and the I/O
/// variant behind it.
pub(crate) struct DataFile {
    file_id: u32,
    write_off: u64,
    io: Box<dyn IoManager>,
}

impl DataFile {
    /// Open (or create) the data file `<dir>/<id, zero-padded>.data`.
    pub(crate) fn open(dir_path: &Path, file_id: u32, kind: IoKind) -> Result<Self> {
        Self::from_path(&data_file_path(dir_path, file_id), file_id, kind)
    }

    /// Open the hint file produced by a merge. Shares the data-file record
    /// framing; values hold encoded positions.
    pub(crate) fn hint_file(dir_path: &Path) -> Result<Self> {
        Self::from_path(&dir_path.join(HINT_FILE_NAME), 0, IoKind::Standard)
    }

    /// Open the merge-finish marker file.
    pub(crate) fn merge_fin_file(dir_path: &Path) -> Result<Self> {
        Self::from_path(&dir_path.join(MERGE_FIN_FILE_NAME), 0, IoKind::Standard)
    }

    fn from_path(path: &Path, file_id: u32, kind: IoKind) -> Result<Self> {
        let io = new_io_manager(path, kind)?;
        let write_off = io.size()?;
        Ok(Self {
            file_id,
            write_off,
            io,
        })
    }

    pub(crate) fn file_id(&self) -> u32 {
        self.file_id
    }

    pub(crate) fn write_off(&self) -> u64 {
        self.write_off
    }

    pub(crate) fn set_write_off(&mut self, offset: u64) {
        self.write_off = offset;
    }

    pub(crate) fn size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Swap the I/O variant, e.g. back to standard file I/O once a
    /// mmap-accelerated replay has finished.
    pub(crate) fn reset_io(&mut self, dir_path: &Path, kind: IoKind) -> Result<()> {
        self.io = new_io_manager(&data_file_path(dir_path, self.file_id), kind)?;
        Ok(())
    }

    /// Read one record starting at `offset`.
    ///
    /// Returns the decoded record and its full on-disk size so callers can
    /// advance to the next one. `ReadEof` signals a clean end of stream:
    /// offset at the end of the file, an all-zero header, or a record
    /// truncated by a torn write.
    pub(crate) fn read_record(&self, offset: u64) -> Result<(LogRecord, u64)> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Err(FerrocaskError::ReadEof);
        }

        // The last record of a file may be shorter than the widest header.
        let mut header_len = MAX_RECORD_HEADER_SIZE as u64;
        if offset + header_len > file_size {
            header_len = file_size - offset;
        }
        let mut header_buf = vec![0_u8; header_len as usize];
        self.io.read(&mut header_buf, offset)?;

        let Some((header, header_size)) = decode_record_header(&header_buf) else {
            return Err(FerrocaskError::ReadEof);
        };
        if header.crc == 0 && header.key_size == 0 && header.value_size == 0 {
            return Err(FerrocaskError::ReadEof);
        }

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let record_size = header_size + (key_size + value_size) as u64;

        let mut kv_buf = vec![0_u8; key_size + value_size];
        if !kv_buf.is_empty() {
            self.io
                .read(&mut kv_buf, offset + header_size)
                .map_err(truncation_as_eof)?;
        }

        let crc = record_crc(
            &header_buf[CRC_SIZE..header_size as usize],
            &kv_buf[..key_size],
            &kv_buf[key_size..],
        );
        if crc != header.crc {
            return Err(FerrocaskError::InvalidCrc);
        }

        let value = kv_buf.split_off(key_size);
        let record = LogRecord {
            key: kv_buf,
            value,
            record_type: LogRecordType::from_u8(header.record_type),
        };
        Ok((record, record_size))
    }

    /// Append raw encoded bytes and advance the write cursor.
    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let written = self.io.write(buf)?;
        self.write_off += written as u64;
        Ok(written)
    }

    /// Append a hint record mapping `key` to an encoded position.
    pub(crate) fn write_hint_record(&mut self, key: Vec<u8>, pos: RecordPosition) -> Result<()> {
        let record = LogRecord {
            key,
            value: pos.encode(),
            record_type: LogRecordType::Normal,
        };
        self.write(&record.encode())?;
        Ok(())
    }

    pub(crate) fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Cut the file back to the current write cursor, discarding any torn
    /// or zero-filled tail found during recovery.
    pub(crate) fn truncate_to_write_off(&mut self) -> Result<()> {
        self.io.truncate(self.write_off)
    }
}

// A record whose key/value bytes run past the end of the file lost its tail
// to a torn write; recovery treats it the same as a clean end of stream.
fn truncation_as_eof(err: FerrocaskError) -> FerrocaskError {
    match err {
        FerrocaskError::Io(ref io_err) if io_err.kind() == io::ErrorKind::UnexpectedEof => {
            FerrocaskError::ReadEof
        }
        other => other,
    }
}

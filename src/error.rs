use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the public engine API.
#[derive(Error, Debug)]
pub enum FerrocaskError {
    #[error("the key is empty")]
    KeyEmpty,

    #[error("key not found")]
    KeyNotFound,

    #[error("data file not found for keydir position")]
    DataFileMissing,

    #[error("the data directory may be corrupted: {0}")]
    DirectoryCorrupted(String),

    #[error("the data directory is in use by another engine instance")]
    InUse,

    #[error("invalid crc, log record may be corrupted")]
    InvalidCrc,

    #[error("batch holds more records than the configured maximum")]
    BatchTooLarge,

    #[error("a merge is already in progress, try again later")]
    MergeInProgress,

    #[error("reclaimable size does not reach the configured merge ratio")]
    MergeRatioBelowThreshold,

    #[error("not enough free disk space to merge")]
    InsufficientDiskSpace,

    #[error("failed to update the keydir")]
    IndexUpdateFailure,

    #[error("invalid engine options: {0}")]
    InvalidOptions(String),

    #[error("open must be passed a usable directory, got: {0:?}")]
    BadDirectory(PathBuf),

    /// End-of-stream marker returned by the record reader when a data file
    /// holds no further records at the requested offset. Never escapes the
    /// engine API.
    #[error("end of data file reached")]
    ReadEof,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FerrocaskError>;

use std::path::PathBuf;

/// Selects the structure backing the in-memory keydir. All variants present
/// identical ordered-map semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// Balanced tree (`std::collections::BTreeMap` behind a rw-lock).
    BTree,
    /// Lock-free skip list (`crossbeam_skiplist::SkipMap`).
    SkipList,
}

/// Engine configuration. Validated by [`Ferrocask::open`].
///
/// [`Ferrocask::open`]: crate::Ferrocask::open
#[derive(Clone, Debug)]
pub struct Options {
    /// Directory holding the data files. Created if missing.
    pub dir_path: PathBuf,

    /// Rollover threshold for the active data file, in bytes. Must be > 0.
    pub max_file_size: u64,

    /// Fsync the active file after every successful append.
    pub sync_every_write: bool,

    /// Fsync once this many bytes have been appended since the last sync.
    /// Zero disables threshold-based syncing.
    pub sync_threshold: u64,

    /// Backing structure for the keydir.
    pub index_kind: IndexKind,

    /// Open data files through a read-only memory map while rebuilding the
    /// keydir, then fall back to standard file I/O.
    pub mmap_at_startup: bool,

    /// Fraction of dead bytes that must accumulate before a merge is
    /// allowed to run. Must lie in (0, 1).
    pub merge_ratio: f32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("ferrocask"),
            max_file_size: 256 * 1024 * 1024,
            sync_every_write: false,
            sync_threshold: 0,
            index_kind: IndexKind::BTree,
            mmap_at_startup: false,
            merge_ratio: 0.5,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this prefix. Empty matches everything.
    pub prefix: Vec<u8>,

    /// Iterate in descending key order.
    pub reverse: bool,
}

#[derive(Clone, Debug)]
pub struct WriteBatchOptions {
    /// Largest number of staged records a single commit may carry.
    pub max_batch_size: usize,

    /// Fsync the active file after the commit marker is appended.
    pub sync_on_commit: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 256 * 1024,
            sync_on_commit: true,
        }
    }
}

//! Ferrocask is an embeddable key-value storage engine based on the
//! Bitcask design: an append-only on-disk log plus an in-memory keydir
//! mapping every live key to the position of its newest record.
//!
//! ```no_run
//! use ferrocask::{Ferrocask, Options};
//!
//! let engine = Ferrocask::open(Options {
//!     dir_path: "/tmp/ferrocask-demo".into(),
//!     ..Default::default()
//! })?;
//!
//! engine.put(b"greeting".to_vec(), b"hello".to_vec())?;
//! assert_eq!(engine.get(b"greeting")?, b"hello");
//! engine.delete(b"greeting")?;
//! # Ok::<(), ferrocask::FerrocaskError>(())
//! ```

pub mod batch;
pub mod error;
pub mod ferrocask;
pub mod iterator;
pub mod options;

mod datafile;
mod fio;
mod keydir;
mod merge;
mod record;
mod utils;

pub use batch::WriteBatch;
pub use error::{FerrocaskError, Result};
pub use ferrocask::{Ferrocask, Stat};
pub use iterator::EngineIterator;
pub use options::{IndexKind, IteratorOptions, Options, WriteBatchOptions};

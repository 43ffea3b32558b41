use crate::error::Result;
use crate::ferrocask::Ferrocask;
use crate::keydir::KeydirIter;
use crate::options::IteratorOptions;

/// Cursor over the live keyspace.
///
/// Wraps a keydir snapshot taken at construction; keys mutated afterwards
/// are not observed. [`value`](Self::value) reads the record from disk on
/// demand under shared engine access.
pub struct EngineIterator<'a> {
    engine: &'a Ferrocask,
    index_iter: Box<dyn KeydirIter>,
    prefix: Vec<u8>,
}

impl<'a> EngineIterator<'a> {
    pub(crate) fn new(engine: &'a Ferrocask, options: IteratorOptions) -> Self {
        let mut iter = Self {
            index_iter: engine.keydir.iterator(options.reverse),
            engine,
            prefix: options.prefix,
        };
        iter.skip_to_prefix();
        iter
    }

    /// Reset to the first matching entry.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_prefix();
    }

    /// Position on the first matching entry at or past `key` in iteration
    /// order.
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_prefix();
    }

    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_prefix();
    }

    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Key under the cursor. Callers must check `valid` first.
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Fetch the value under the cursor from disk.
    pub fn value(&self) -> Result<Vec<u8>> {
        self.engine.value_at_position(&self.index_iter.value())
    }

    /// Release the underlying snapshot early.
    pub fn close(&mut self) {
        self.index_iter.close();
    }

    fn skip_to_prefix(&mut self) {
        if self.prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() && !self.index_iter.key().starts_with(&self.prefix) {
            self.index_iter.next();
        }
    }
}

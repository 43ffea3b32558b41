use std::collections::BTreeMap;

use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;

use crate::options::IndexKind;
use crate::record::RecordPosition;

/// The keydir: an ordered in-memory map from live key to the position of
/// its newest on-disk record.
///
/// Implementations are safe for concurrent readers; `put` and `delete`
/// take exclusive access internally. Keys order lexicographically.
pub(crate) trait Indexer: Send + Sync {
    /// Insert or replace, returning the previous position if one existed.
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Option<RecordPosition>;

    fn get(&self, key: &[u8]) -> Option<RecordPosition>;

    /// Remove, returning the previous position if one existed.
    fn delete(&self, key: &[u8]) -> Option<RecordPosition>;

    /// Snapshot the ordered key sequence and return a cursor over it.
    /// Mutations after construction are not observed by the cursor.
    fn iterator(&self, reverse: bool) -> Box<dyn KeydirIter>;

    fn len(&self) -> usize;
}

/// Bidirectional, seekable cursor over a keydir snapshot.
pub(crate) trait KeydirIter: Send {
    /// Reset to the first entry.
    fn rewind(&mut self);

    /// Position on the first entry with key >= target (<= target when the
    /// snapshot is reversed).
    fn seek(&mut self, key: &[u8]);

    fn next(&mut self);

    fn valid(&self) -> bool;

    /// Key under the cursor. Callers must check `valid` first.
    fn key(&self) -> &[u8];

    fn value(&self) -> RecordPosition;

    /// Drop the snapshot early.
    fn close(&mut self);
}

pub(crate) fn new_indexer(kind: IndexKind) -> Box<dyn Indexer> {
    match kind {
        IndexKind::BTree => Box::new(BTreeKeydir::new()),
        IndexKind::SkipList => Box::new(SkipListKeydir::new()),
    }
}

/// Keydir backed by a balanced tree behind a reader-writer lock.
pub(crate) struct BTreeKeydir {
    tree: RwLock<BTreeMap<Vec<u8>, RecordPosition>>,
}

impl BTreeKeydir {
    fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Indexer for BTreeKeydir {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Option<RecordPosition> {
        self.tree.write().insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<RecordPosition> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Option<RecordPosition> {
        self.tree.write().remove(key)
    }

    fn iterator(&self, reverse: bool) -> Box<dyn KeydirIter> {
        let tree = self.tree.read();
        let entries = tree.iter().map(|(k, v)| (k.clone(), *v)).collect();
        Box::new(SnapshotIter::new(entries, reverse))
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }
}

/// Keydir backed by a lock-free skip list. Mutual exclusion between writers
/// comes from the engine lock, so the read-modify-write in `put` does not
/// race.
pub(crate) struct SkipListKeydir {
    map: SkipMap<Vec<u8>, RecordPosition>,
}

impl SkipListKeydir {
    fn new() -> Self {
        Self {
            map: SkipMap::new(),
        }
    }
}

impl Indexer for SkipListKeydir {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Option<RecordPosition> {
        let old = self.map.get(&key).map(|entry| *entry.value());
        self.map.insert(key, pos);
        old
    }

    fn get(&self, key: &[u8]) -> Option<RecordPosition> {
        self.map.get(key).map(|entry| *entry.value())
    }

    fn delete(&self, key: &[u8]) -> Option<RecordPosition> {
        self.map.remove(key).map(|entry| *entry.value())
    }

    fn iterator(&self, reverse: bool) -> Box<dyn KeydirIter> {
        let entries = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        Box::new(SnapshotIter::new(entries, reverse))
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Cursor over an ordered snapshot, shared by every backing structure.
/// For reverse iteration the snapshot is stored in descending order so the
/// cursor only ever moves forward through the vector.
struct SnapshotIter {
    entries: Vec<(Vec<u8>, RecordPosition)>,
    current: usize,
    reverse: bool,
}

impl SnapshotIter {
    fn new(mut entries: Vec<(Vec<u8>, RecordPosition)>, reverse: bool) -> Self {
        if reverse {
            entries.reverse();
        }
        Self {
            entries,
            current: 0,
            reverse,
        }
    }
}

impl KeydirIter for SnapshotIter {
    fn rewind(&mut self) {
        self.current = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.current = if self.reverse {
            self.entries.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.entries.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.current += 1;
    }

    fn valid(&self) -> bool {
        self.current < self.entries.len()
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.current].0
    }

    fn value(&self) -> RecordPosition {
        self.entries[self.current].1
    }

    fn close(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(file_id: u32, offset: u64) -> RecordPosition {
        RecordPosition {
            file_id,
            offset,
            size: 10,
        }
    }

    fn backings() -> Vec<Box<dyn Indexer>> {
        vec![
            new_indexer(IndexKind::BTree),
            new_indexer(IndexKind::SkipList),
        ]
    }

    #[test]
    fn put_get_delete() {
        for keydir in backings() {
            assert_eq!(keydir.put(b"a".to_vec(), pos(0, 0)), None);
            assert_eq!(keydir.put(b"a".to_vec(), pos(1, 42)), Some(pos(0, 0)));
            assert_eq!(keydir.get(b"a"), Some(pos(1, 42)));
            assert_eq!(keydir.len(), 1);

            assert_eq!(keydir.delete(b"a"), Some(pos(1, 42)));
            assert_eq!(keydir.get(b"a"), None);
            assert_eq!(keydir.delete(b"a"), None);
            assert_eq!(keydir.len(), 0);
        }
    }

    #[test]
    fn iterator_orders_keys() {
        for keydir in backings() {
            keydir.put(b"bb".to_vec(), pos(0, 1));
            keydir.put(b"aa".to_vec(), pos(0, 0));
            keydir.put(b"cc".to_vec(), pos(0, 2));

            let mut iter = keydir.iterator(false);
            let mut keys = Vec::new();
            while iter.valid() {
                keys.push(iter.key().to_vec());
                iter.next();
            }
            assert_eq!(keys, vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]);

            let mut reversed = keydir.iterator(true);
            let mut keys = Vec::new();
            while reversed.valid() {
                keys.push(reversed.key().to_vec());
                reversed.next();
            }
            assert_eq!(keys, vec![b"cc".to_vec(), b"bb".to_vec(), b"aa".to_vec()]);
        }
    }

    #[test]
    fn seek_finds_boundary() {
        for keydir in backings() {
            for key in [&b"aa"[..], b"cc", b"ee"] {
                keydir.put(key.to_vec(), pos(0, 0));
            }

            let mut iter = keydir.iterator(false);
            iter.seek(b"bb");
            assert!(iter.valid());
            assert_eq!(iter.key(), b"cc");

            iter.seek(b"cc");
            assert_eq!(iter.key(), b"cc");

            iter.seek(b"ff");
            assert!(!iter.valid());

            let mut reversed = keydir.iterator(true);
            reversed.seek(b"dd");
            assert!(reversed.valid());
            assert_eq!(reversed.key(), b"cc");

            reversed.seek(b"a");
            assert!(!reversed.valid());
        }
    }

    #[test]
    fn iterator_is_a_snapshot() {
        for keydir in backings() {
            keydir.put(b"a".to_vec(), pos(0, 0));
            let mut iter = keydir.iterator(false);

            keydir.put(b"b".to_vec(), pos(0, 1));
            keydir.delete(b"a");

            assert!(iter.valid());
            assert_eq!(iter.key(), b"a");
            iter.next();
            assert!(!iter.valid());
        }
    }

    #[test]
    fn rewind_and_close() {
        for keydir in backings() {
            keydir.put(b"a".to_vec(), pos(0, 0));
            keydir.put(b"b".to_vec(), pos(0, 1));

            let mut iter = keydir.iterator(false);
            iter.next();
            assert_eq!(iter.key(), b"b");
            iter.rewind();
            assert_eq!(iter.key(), b"a");

            iter.close();
            assert!(!iter.valid());
        }
    }
}

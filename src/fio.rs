use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use memmap2::Mmap;

use crate::error::Result;

/// I/O variant used when opening a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IoKind {
    Standard,
    MemoryMap,
}

/// Byte-addressable file abstraction behind every data file.
///
/// Two variants exist: buffered standard file I/O (read + append + fsync)
/// and a read-only memory-mapped view used to accelerate startup replay.
pub(crate) trait IoManager: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`. A read that runs past the
    /// end of the file fails with `io::ErrorKind::UnexpectedEof`.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Append `buf` to the end of the file, returning the bytes written.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush file contents to stable storage.
    fn sync(&self) -> Result<()>;

    /// Current file length in bytes.
    fn size(&self) -> Result<u64>;

    /// Cut the file down to `size` bytes. Recovery uses this to discard a
    /// torn tail; appends land at the physical end of the file, so the
    /// logical cursor and the file length must agree.
    fn truncate(&mut self, size: u64) -> Result<()>;
}

pub(crate) fn new_io_manager(path: &Path, kind: IoKind) -> Result<Box<dyn IoManager>> {
    match kind {
        IoKind::Standard => Ok(Box::new(StandardIo::open(path)?)),
        IoKind::MemoryMap => Ok(Box::new(MemoryMapIo::open(path)?)),
    }
}

/// Standard file I/O: positional reads plus append-only writes.
pub(crate) struct StandardIo {
    file: File,
}

impl StandardIo {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl IoManager for StandardIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.file.read_exact_at(buf, offset)?;
        Ok(buf.len())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        use std::io::Write;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.file.set_len(size)?;
        Ok(())
    }
}

/// Read-only memory-mapped view of a file. Appends are an invariant
/// violation: only startup replay selects this variant, and replay never
/// writes.
pub(crate) struct MemoryMapIo {
    // A zero-length file cannot be mapped, so an empty file maps to `None`.
    map: Option<Mmap>,
}

impl MemoryMapIo {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let map = if file.metadata()?.len() == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map })
    }

    fn len(&self) -> u64 {
        self.map.as_ref().map_or(0, |m| m.len() as u64)
    }
}

impl IoManager for MemoryMapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let map = self
            .map
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let end = offset
            .checked_add(buf.len() as u64)
            .filter(|end| *end <= map.len() as u64)
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(&map[offset as usize..end as usize]);
        Ok(buf.len())
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        unreachable!("write attempted on a read-only memory-mapped file")
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.len())
    }

    fn truncate(&mut self, _size: u64) -> Result<()> {
        unreachable!("truncate attempted on a read-only memory-mapped file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn standard_io_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000000000.data");

        let mut io = StandardIo::open(&path).unwrap();
        assert_eq!(io.write(b"hello").unwrap(), 5);
        assert_eq!(io.write(b" world").unwrap(), 6);
        assert_eq!(io.size().unwrap(), 11);

        let mut buf = [0_u8; 5];
        io.read(&mut buf, 6).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn standard_io_read_past_eof() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000000000.data");

        let mut io = StandardIo::open(&path).unwrap();
        io.write(b"abc").unwrap();

        let mut buf = [0_u8; 8];
        assert!(io.read(&mut buf, 0).is_err());
    }

    #[test]
    fn mmap_io_reads_what_standard_io_wrote() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000000000.data");

        let mut writer = StandardIo::open(&path).unwrap();
        writer.write(b"mapped bytes").unwrap();
        writer.sync().unwrap();

        let mapped = MemoryMapIo::open(&path).unwrap();
        assert_eq!(mapped.size().unwrap(), 12);

        let mut buf = [0_u8; 5];
        mapped.read(&mut buf, 7).unwrap();
        assert_eq!(&buf, b"bytes");
    }

    #[test]
    fn mmap_io_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000000000.data");

        let mapped = MemoryMapIo::open(&path).unwrap();
        assert_eq!(mapped.size().unwrap(), 0);

        let mut buf = [0_u8; 1];
        assert!(mapped.read(&mut buf, 0).is_err());
    }
}

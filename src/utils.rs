use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::Result;

/// Path of the data file with the given id: `<dir>/<9-digit id>.data`.
pub(crate) fn data_file_path(dir_path: &Path, file_id: u32) -> PathBuf {
    dir_path.join(format!("{file_id:09}.data"))
}

/// Extract the file id from a well-formed data-file name.
pub(crate) fn parse_data_file_id(path: &Path) -> Option<u32> {
    let file_name = path.file_name()?.to_string_lossy();
    let re = Regex::new(r"^(\d{9})\.data$").expect("data file pattern is valid");
    let captures = re.captures(&file_name)?;
    captures[1].parse().ok()
}

/// Total on-disk size of the engine directory, data and auxiliary files
/// included.
pub(crate) fn dir_size(dir_path: &Path) -> Result<u64> {
    let size = fs_extra::dir::get_size(dir_path)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    Ok(size)
}

/// Free space on the volume holding the engine directory.
pub(crate) fn available_disk_space(dir_path: &Path) -> Result<u64> {
    Ok(fs2::available_space(dir_path)?)
}

/// Recursively copy `src` into `dst`, skipping top-level names listed in
/// `exclude`. Used for online backups, which must leave the lock file
/// behind.
pub(crate) fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> Result<()> {
    if !dst.is_dir() {
        fs::create_dir_all(dst)?;
    }
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|skip| name == *skip) {
            continue;
        }
        let target = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target, &[])?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn test_data_file_path() {
        let path = data_file_path(Path::new("/tmp/cask"), 42);
        assert_eq!(path, PathBuf::from("/tmp/cask/000000042.data"));
    }

    #[test]
    fn test_parse_data_file_id() {
        assert_eq!(
            parse_data_file_id(Path::new("/tmp/cask/000000042.data")),
            Some(42)
        );
        assert_eq!(
            parse_data_file_id(Path::new("/tmp/cask/000001000.data")),
            Some(1000)
        );
        assert_eq!(parse_data_file_id(Path::new("/tmp/cask/hint-index")), None);
        assert_eq!(parse_data_file_id(Path::new("/tmp/cask/flock")), None);
        assert_eq!(
            parse_data_file_id(Path::new("/tmp/cask/not-a-number.data")),
            None
        );
    }

    #[test]
    fn copy_dir_skips_excluded_names() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("000000000.data"), b"payload").unwrap();
        fs::write(src.path().join("flock"), b"").unwrap();

        copy_dir(src.path(), dst.path(), &["flock"]).unwrap();

        assert!(dst.path().join("000000000.data").is_file());
        assert!(!dst.path().join("flock").exists());
    }
}

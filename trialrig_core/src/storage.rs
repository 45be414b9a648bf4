//! Filesystem implementation of the `Storage` capability.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use trialrig_traits::Storage;

/// Local files. `create` is atomic (temp file + rename); `append` syncs data
/// before returning.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp_name);
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

impl Storage for FsStorage {
    fn is_locked(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        match OpenOptions::new().append(true).open(path) {
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "lock probe failed");
                true
            }
        }
    }

    fn create(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        write_atomic(path, bytes)
    }

    fn append(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        f.write_all(bytes)?;
        f.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_replaces_and_append_extends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let fs = FsStorage::new();
        assert!(!fs.is_locked(&path));
        fs.create(&path, b"head\r\n").unwrap();
        fs.append(&path, b"row\r\n").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"head\r\nrow\r\n");
        fs.create(&path, b"fresh").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"fresh");
        assert!(!dir.path().join("log.csv.tmp").exists());
        assert!(!fs.is_locked(&path));
    }
}

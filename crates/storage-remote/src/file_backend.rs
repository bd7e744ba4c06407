use crate::backend::{flat_key, sharded_key, BackendResult, Failure, RemoteBackend};
use ccache_core::atomic::with_atomic;
use ccache_core::cachedir::CACHEDIR_TAG_CONTENTS;
use ccache_core::Digest;
use std::fs;
use std::path::PathBuf;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Layout {
    Flat,
    Subdirs,
}

/// A remote backed by a directory on a locally mounted filesystem
/// (`file://` scheme). Writes go through the same atomic-write
/// primitive as the local store.
pub struct FileStorageBackend {
    root: PathBuf,
    layout: Layout,
    update_mtime: bool,
}

impl FileStorageBackend {
    pub fn new(root: impl Into<PathBuf>, layout: Layout, update_mtime: bool) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let tag = root.join("CACHEDIR.TAG");
        if !tag.exists() {
            fs::write(tag, CACHEDIR_TAG_CONTENTS)?;
        }
        Ok(FileStorageBackend {
            root,
            layout,
            update_mtime,
        })
    }

    fn path_for(&self, key: &Digest) -> PathBuf {
        let rel = match self.layout {
            Layout::Flat => flat_key(key),
            Layout::Subdirs => sharded_key(key),
        };
        self.root.join(rel)
    }
}

impl RemoteBackend for FileStorageBackend {
    fn get(&self, key: &Digest) -> BackendResult<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => {
                if self.update_mtime {
                    let now = filetime::FileTime::now();
                    let _ = filetime::set_file_mtime(&path, now);
                }
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Failure::error(format!("read {}: {e}", path.display()))),
        }
    }

    fn put(&self, key: &Digest, bytes: &[u8], overwrite: bool) -> BackendResult<bool> {
        let path = self.path_for(key);
        if !overwrite && path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Failure::error(format!("mkdir {}: {e}", parent.display())))?;
        }
        with_atomic(path, |f| {
            f.write(bytes)
                .map_err(|e| ccache_core::CoreError::FatalConfig(e.to_string()))
        })
        .map_err(|e| Failure::error(e.to_string()))?;
        Ok(true)
    }

    fn remove(&self, key: &Digest) -> BackendResult<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Failure::error(format!("remove {}: {e}", path.display()))),
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(byte: u8) -> Digest {
        Digest::from_bytes([byte; Digest::SIZE])
    }

    #[test]
    fn put_then_get_round_trips_flat_layout() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStorageBackend::new(dir.path(), Layout::Flat, false).unwrap();
        let key = digest(1);
        assert!(backend.put(&key, b"payload", true).unwrap());
        assert_eq!(backend.get(&key).unwrap(), Some(b"payload".to_vec()));
    }

    #[test]
    fn subdirs_layout_creates_shard_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStorageBackend::new(dir.path(), Layout::Subdirs, false).unwrap();
        let key = digest(0xab);
        backend.put(&key, b"x", true).unwrap();
        assert!(dir.path().join("ab").is_dir());
    }

    #[test]
    fn overwrite_false_preserves_existing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStorageBackend::new(dir.path(), Layout::Flat, false).unwrap();
        let key = digest(2);
        backend.put(&key, b"first", true).unwrap();
        assert!(!backend.put(&key, b"second", false).unwrap());
        assert_eq!(backend.get(&key).unwrap(), Some(b"first".to_vec()));
    }

    #[test]
    fn missing_key_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStorageBackend::new(dir.path(), Layout::Flat, false).unwrap();
        assert_eq!(backend.get(&digest(9)).unwrap(), None);
    }
}

use crate::error::{CoreError, Result};
use rand::Rng;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Write-to-temp-then-rename producer of files with all-or-nothing
/// visibility: a reader of `path` always observes either the previous
/// contents or the fully written new contents, never a partial write.
pub struct AtomicFile {
    final_path: PathBuf,
    tmp_path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl AtomicFile {
    /// Creates `<path>.tmp.<random>` alongside `path` (same directory, so
    /// the final rename is same-filesystem) and opens it for writing.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let final_path = path.into();
        let suffix: u64 = rand::rng().random();
        let tmp_path = final_path.with_extension(format!(
            "tmp.{}",
            hex_suffix(suffix, final_path.extension())
        ));
        let file = File::create(&tmp_path).map_err(|e| CoreError::io(tmp_path.clone(), e))?;
        Ok(AtomicFile {
            final_path,
            tmp_path,
            file: Some(file),
            committed: false,
        })
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        use std::io::Write;
        let file = self
            .file
            .as_mut()
            .expect("write called after commit or drop");
        file.write_all(bytes)
            .map_err(|e| CoreError::io(self.tmp_path.clone(), e))
    }

    pub fn flush(&mut self) -> Result<()> {
        use std::io::Write;
        let file = self.file.as_mut().expect("flush called after commit");
        file.flush()
            .map_err(|e| CoreError::io(self.tmp_path.clone(), e))
    }

    /// Closes the temp file and renames it over the final path. Once this
    /// returns `Ok`, the new contents are durably visible at `final_path`.
    pub fn commit(mut self) -> Result<()> {
        self.flush()?;
        drop(self.file.take());
        fs::rename(&self.tmp_path, &self.final_path)
            .map_err(|e| CoreError::io(self.final_path.clone(), e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

fn hex_suffix(value: u64, existing_ext: Option<&std::ffi::OsStr>) -> String {
    match existing_ext {
        Some(ext) => format!("{:016x}.{}", value, ext.to_string_lossy()),
        None => format!("{:016x}", value),
    }
}

/// Convenience wrapper matching the common `with_atomic(path, f)` shape:
/// runs `f` against a fresh `AtomicFile`, commits on success, and leaves
/// no trace on failure.
pub fn with_atomic<F>(path: impl Into<PathBuf>, f: F) -> Result<()>
where
    F: FnOnce(&mut AtomicFile) -> Result<()>,
{
    let mut atomic = AtomicFile::create(path)?;
    f(&mut atomic)?;
    atomic.commit()
}

/// Copies `src` to `dst`, preferring a hard link, falling back to a
/// reflink-capable copy, falling back to a plain atomic copy. Used by
/// raw-file retrieval from the local store.
pub fn clone_hard_link_or_copy_file(src: &Path, dst: &Path, dest_may_exist: bool) -> io::Result<()> {
    if dest_may_exist {
        let _ = fs::remove_file(dst);
    }
    match fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            // No portable reflink in std; fall back straight to a copy,
            // which is still atomic from the reader's point of view
            // because we stage it through a temp file first.
            let tmp = dst.with_extension("tmp.clone");
            fs::copy(src, &tmp)?;
            fs::rename(&tmp, dst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn commit_makes_contents_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        with_atomic(path.clone(), |f| f.write(b"hello")).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn failure_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        let result: Result<()> = with_atomic(path.clone(), |_f| {
            Err(CoreError::FatalConfig("boom".into()))
        });
        assert!(result.is_err());
        assert!(!path.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn second_write_does_not_clobber_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        fs::write(&path, b"old").unwrap();

        let mut atomic = AtomicFile::create(&path).unwrap();
        atomic.write(b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"old");
        atomic.commit().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }
}

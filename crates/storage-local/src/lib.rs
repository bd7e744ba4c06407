//! Content-addressed sharded local cache directory: places and retrieves
//! entry blobs, maintains per-shard size/count stats, and runs LRU
//! cleanup and recompression passes.

pub mod cleanup;
pub mod layout;
pub mod recompress;
pub mod shard_stats;

use ccache_core::atomic::{clone_hard_link_or_copy_file, with_atomic};
use ccache_core::error::CoreError;
use ccache_core::stats::Statistic;
use ccache_core::Digest;
use layout::entry_path;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_SUFFIX: &str = "M";
pub const RESULT_SUFFIX: &str = "R";

pub fn raw_suffix(file_number: u8) -> String {
    format!(".{file_number}R")
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Overwrite {
    No,
    Yes,
}

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        layout::ensure_shard_dirs(&root)?;
        let store = LocalStore { root };
        store.write_cachedir_tag_if_absent()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_cachedir_tag_if_absent(&self) -> std::io::Result<()> {
        let tag_path = self.root.join("CACHEDIR.TAG");
        if !tag_path.exists() {
            fs::write(tag_path, layout::CACHEDIR_TAG_CONTENTS)?;
        }
        Ok(())
    }

    fn path(&self, key: &Digest, suffix: &str) -> PathBuf {
        entry_path(&self.root, key, suffix)
    }

    /// Writes `bytes` to the canonical path for `key`/`suffix`. With
    /// `Overwrite::No`, an existing entry is left untouched and `Ok(false)`
    /// is returned; the caller's own concurrent racer always sees a
    /// complete entry either way because the write itself is atomic.
    pub fn put(
        &self,
        key: &Digest,
        suffix: &str,
        bytes: &[u8],
        overwrite: Overwrite,
    ) -> Result<bool, CoreError> {
        let path = self.path(key, suffix);
        if overwrite == Overwrite::No && path.exists() {
            return Ok(false);
        }

        let existed = path.exists();
        with_atomic(path.clone(), |f| f.write(bytes))?;

        let size_delta = bytes.len() as i64;
        let count_delta: i64 = if existed { 0 } else { 1 };
        self.update_shard_stats(key, size_delta, count_delta)?;
        Ok(true)
    }

    /// Reads the entry's bytes, touching its mtime (LRU recency) on
    /// success. `atime` would be the more natural recency signal but is
    /// frequently mounted `noatime`; mtime is touched instead, matching
    /// `relatime`-hostile deployments.
    pub fn get(&self, key: &Digest, suffix: &str) -> Option<Vec<u8>> {
        let path = self.path(key, suffix);
        let bytes = fs::read(&path).ok()?;
        let now = filetime::FileTime::now();
        let _ = filetime::set_file_mtime(&path, now);
        Some(bytes)
    }

    pub fn contains(&self, key: &Digest, suffix: &str) -> bool {
        self.path(key, suffix).exists()
    }

    pub fn get_raw_file_path(&self, key: &Digest, file_number: u8) -> PathBuf {
        self.path(key, &raw_suffix(file_number))
    }

    pub fn put_raw_file(&self, key: &Digest, file_number: u8, src: &Path) -> std::io::Result<()> {
        let dst = self.get_raw_file_path(key, file_number);
        clone_hard_link_or_copy_file(src, &dst, true)
    }

    fn update_shard_stats(&self, key: &Digest, size_delta: i64, count_delta: i64) -> Result<(), CoreError> {
        let (a, b) = key.shard_prefix();
        let shard = layout::shard_dir(&self.root, a, b);
        shard_stats::update(&shard, shard_stats::OnlyIfChanged::No, |counters| {
            let size = counters.get(Statistic::CacheSizeKibibyte) as i64;
            let new_size = (size + size_delta / 1024).max(0) as u64;
            counters.set(Statistic::CacheSizeKibibyte, new_size);

            let files = counters.get(Statistic::FilesInCache) as i64;
            let new_files = (files + count_delta).max(0) as u64;
            counters.set(Statistic::FilesInCache, new_files);
        })
    }

    pub fn aggregate_stats(&self) -> ccache_core::stats::StatsCounters {
        shard_stats::aggregate(&self.root)
    }

    /// Increments an arbitrary counter in the shard associated with
    /// `key`. Used by callers above the store (the façade, the
    /// orchestrator) to record hit/miss/error statistics against the
    /// same per-shard files `put`/`clean_dir` already maintain.
    pub fn increment_stat(&self, key: &Digest, stat: Statistic, delta: u64) -> Result<(), CoreError> {
        let (a, b) = key.shard_prefix();
        let shard = layout::shard_dir(&self.root, a, b);
        shard_stats::update(&shard, shard_stats::OnlyIfChanged::No, |counters| {
            counters.increment(stat, delta);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(byte: u8) -> Digest {
        Digest::from_bytes([byte; Digest::SIZE])
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let key = digest(7);
        assert!(store.put(&key, RESULT_SUFFIX, b"payload", Overwrite::No).unwrap());
        assert_eq!(store.get(&key, RESULT_SUFFIX).unwrap(), b"payload");
    }

    #[test]
    fn overwrite_no_keeps_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let key = digest(8);
        assert!(store.put(&key, RESULT_SUFFIX, b"first", Overwrite::No).unwrap());
        assert!(!store.put(&key, RESULT_SUFFIX, b"second", Overwrite::No).unwrap());
        assert_eq!(store.get(&key, RESULT_SUFFIX).unwrap(), b"first");
    }

    #[test]
    fn overwrite_yes_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let key = digest(9);
        store.put(&key, RESULT_SUFFIX, b"first", Overwrite::No).unwrap();
        store.put(&key, RESULT_SUFFIX, b"second", Overwrite::Yes).unwrap();
        assert_eq!(store.get(&key, RESULT_SUFFIX).unwrap(), b"second");
    }

    #[test]
    fn missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        assert!(store.get(&digest(1), RESULT_SUFFIX).is_none());
    }

    #[test]
    fn cachedir_tag_is_written_on_creation() {
        let dir = tempfile::tempdir().unwrap();
        let _store = LocalStore::new(dir.path()).unwrap();
        assert!(dir.path().join("CACHEDIR.TAG").exists());
    }

    #[test]
    fn put_updates_shard_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let key = digest(3);
        store.put(&key, RESULT_SUFFIX, b"0123456789", Overwrite::No).unwrap();
        let stats = store.aggregate_stats();
        assert_eq!(stats.get(Statistic::FilesInCache), 1);
    }
}

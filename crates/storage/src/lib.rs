//! Combines the local store and any configured remote backends behind a
//! single read/write policy: local-first reads with remote fallback and
//! write-back, local-synchronous writes with fire-and-forget remote
//! write-through, and namespace-scoped visibility.

use ccache_core::envelope::{self, CacheEntryHeader, CompressionType, EntryType};
use ccache_core::stats::Statistic;
use ccache_core::{Digest, ThreadPool};
use ccache_storage_local::{LocalStore, Overwrite as LocalOverwrite};
use ccache_storage_remote::RemoteBackend;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub use ccache_storage_local::{MANIFEST_SUFFIX, RESULT_SUFFIX};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Overwrite {
    No,
    Yes,
}

impl From<Overwrite> for LocalOverwrite {
    fn from(o: Overwrite) -> Self {
        match o {
            Overwrite::No => LocalOverwrite::No,
            Overwrite::Yes => LocalOverwrite::Yes,
        }
    }
}

struct RemoteSlot {
    backend: Arc<dyn RemoteBackend>,
    writable: bool,
}

pub struct StorageFacade {
    local: Arc<LocalStore>,
    local_read_only: bool,
    remotes: Vec<RemoteSlot>,
    pool: ThreadPool,
    namespace: String,
    ccache_version: String,
    compression_level: Option<i32>,
}

impl StorageFacade {
    pub fn new(
        local: LocalStore,
        local_read_only: bool,
        namespace: impl Into<String>,
        ccache_version: impl Into<String>,
        compression_level: Option<i32>,
    ) -> Self {
        StorageFacade {
            local: Arc::new(local),
            local_read_only,
            remotes: Vec::new(),
            pool: ThreadPool::new(4, 64),
            namespace: namespace.into(),
            ccache_version: ccache_version.into(),
            compression_level,
        }
    }

    pub fn add_remote(&mut self, backend: Arc<dyn RemoteBackend>, writable: bool) {
        self.remotes.push(RemoteSlot { backend, writable });
    }

    /// Manifests and results are stored as envelopes (C4); raw per-file
    /// blobs (`raw_suffix`) are stored as-is, matching the original's
    /// split between `CacheEntry`-wrapped metadata and plain raw files.
    fn entry_type_for_suffix(suffix: &str) -> Option<EntryType> {
        match suffix {
            MANIFEST_SUFFIX => Some(EntryType::Manifest),
            RESULT_SUFFIX => Some(EntryType::Result),
            _ => None,
        }
    }

    fn wrap(&self, suffix: &str, payload: &[u8]) -> Vec<u8> {
        let Some(entry_type) = Self::entry_type_for_suffix(suffix) else {
            return payload.to_vec();
        };
        let mut header = CacheEntryHeader::new(entry_type, self.ccache_version.clone());
        header.namespace = self.namespace.clone();
        header.creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if let Some(level) = self.compression_level {
            header.compression_type = CompressionType::Zstd;
            header.compression_level = level as i8;
        }
        match envelope::serialize(header, payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("failed to encode cache entry envelope: {e}");
                payload.to_vec()
            }
        }
    }

    /// Unwraps an envelope fetched from local or remote storage,
    /// verifying its checksum and namespace. Returns `None` (a
    /// self-healing miss, never a hard failure) on a checksum mismatch,
    /// a namespace mismatch, or any other corruption.
    fn unwrap(&self, suffix: &str, bytes: Vec<u8>) -> Option<Vec<u8>> {
        if Self::entry_type_for_suffix(suffix).is_none() {
            return Some(bytes);
        }
        match envelope::deserialize(&bytes) {
            Ok((header, payload)) => {
                if !self.namespace.is_empty() && header.namespace != self.namespace {
                    return None;
                }
                Some(payload)
            }
            Err(e) => {
                log::warn!("discarding corrupt cache entry: {e}");
                None
            }
        }
    }

    /// Local-first read with remote fallback; on a remote hit, writes
    /// the entry back to local (unless local is read-only) before
    /// returning it, so subsequent lookups avoid the remote round trip.
    pub fn get(&self, key: &Digest, suffix: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.local.get(key, suffix) {
            return self.unwrap(suffix, bytes);
        }

        for slot in &self.remotes {
            match slot.backend.get(key) {
                Ok(Some(bytes)) => {
                    let Some(payload) = self.unwrap(suffix, bytes.clone()) else {
                        continue;
                    };
                    let _ = self
                        .local
                        .increment_stat(key, Statistic::RemoteStorageReadHit, 1);
                    if !self.local_read_only {
                        let _ = self.local.put(key, suffix, &bytes, LocalOverwrite::Yes);
                    }
                    return Some(payload);
                }
                Ok(None) => continue,
                Err(failure) => {
                    let stat = if failure.is_timeout() {
                        Statistic::RemoteStorageTimeout
                    } else {
                        Statistic::RemoteStorageError
                    };
                    let _ = self.local.increment_stat(key, stat, 1);
                    log::warn!("remote {} get failed: {}", slot.backend.describe(), failure.message);
                }
            }
        }
        None
    }

    /// Writes to local synchronously (unless read-only); enqueues each
    /// writable remote's write on the background pool so remote RTT
    /// never charges the caller's compile latency.
    pub fn put(&self, key: &Digest, suffix: &str, bytes: &[u8], overwrite: Overwrite) -> bool {
        let wrapped = self.wrap(suffix, bytes);

        let mut wrote_locally = false;
        if !self.local_read_only {
            match self.local.put(key, suffix, &wrapped, overwrite.into()) {
                Ok(wrote) => wrote_locally = wrote,
                Err(e) => log::warn!("local store write failed: {e}"),
            }
        }

        let owned_bytes = wrapped;
        let owned_key = *key;
        let local = Arc::clone(&self.local);
        for slot in &self.remotes {
            if !slot.writable {
                continue;
            }
            let backend = Arc::clone(&slot.backend);
            let bytes = owned_bytes.clone();
            let local = Arc::clone(&local);
            let overwrite_bool = overwrite == Overwrite::Yes;
            self.pool.enqueue(move || {
                match backend.put(&owned_key, &bytes, overwrite_bool) {
                    Ok(_) => {}
                    Err(failure) => {
                        let stat = if failure.is_timeout() {
                            Statistic::RemoteStorageTimeout
                        } else {
                            Statistic::RemoteStorageError
                        };
                        let _ = local.increment_stat(&owned_key, stat, 1);
                        log::warn!("remote {} put failed: {}", backend.describe(), failure.message);
                    }
                }
            });
        }

        wrote_locally
    }

    pub fn remove(&self, key: &Digest, suffix: &str) {
        let path_existed = self.local.contains(key, suffix);
        if path_existed {
            let _ = std::fs::remove_file(
                ccache_storage_local::layout::entry_path(self.local.root(), key, suffix),
            );
        }
        for slot in &self.remotes {
            if slot.writable {
                let _ = slot.backend.remove(key);
            }
        }
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn aggregate_stats(&self) -> ccache_core::stats::StatsCounters {
        self.local.aggregate_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccache_storage_remote::file_backend::{FileStorageBackend, Layout};

    fn digest(byte: u8) -> Digest {
        Digest::from_bytes([byte; Digest::SIZE])
    }

    #[test]
    fn local_hit_short_circuits_remote() {
        let local_dir = tempfile::tempdir().unwrap();
        let local = LocalStore::new(local_dir.path()).unwrap();
        let facade = StorageFacade::new(local, false, "", "4.0", None);
        let key = digest(1);
        facade.put(&key, "R", b"payload", Overwrite::No);
        assert_eq!(facade.get(&key, "R"), Some(b"payload".to_vec()));
    }

    #[test]
    fn remote_hit_writes_back_to_local() {
        let local_dir = tempfile::tempdir().unwrap();
        let remote_dir = tempfile::tempdir().unwrap();
        let local = LocalStore::new(local_dir.path()).unwrap();
        let mut facade = StorageFacade::new(local, false, "", "4.0", None);

        let remote = FileStorageBackend::new(remote_dir.path(), Layout::Flat, false).unwrap();
        let key = digest(2);
        let header = CacheEntryHeader::new(EntryType::Result, "4.0");
        let enveloped = envelope::serialize(header, b"from remote").unwrap();
        remote.put(&key, &enveloped, true).unwrap();
        facade.add_remote(Arc::new(remote), true);

        assert_eq!(facade.get(&key, "R"), Some(b"from remote".to_vec()));
        // Second read should now come purely from local.
        assert!(facade.local().contains(&key, "R"));
    }

    #[test]
    fn namespace_mismatch_is_treated_as_a_miss() {
        let local_dir = tempfile::tempdir().unwrap();
        let local = LocalStore::new(local_dir.path()).unwrap();
        let facade = StorageFacade::new(local, false, "project-a", "4.0", None);
        let key = digest(3);
        facade.put(&key, "R", b"payload", Overwrite::No);

        let other_namespace = StorageFacade::new(
            LocalStore::new(local_dir.path()).unwrap(),
            false,
            "project-b",
            "4.0",
            None,
        );
        assert_eq!(other_namespace.get(&key, "R"), None);
    }
}

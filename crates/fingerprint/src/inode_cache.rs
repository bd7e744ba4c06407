//! Process-local stand-in for the spec's shared-memory inode cache.
//!
//! The real design keys a cross-process shared-memory table by
//! `(device, inode, size, mtime_ns, ctime_ns, content_type)` so that
//! concurrent invocations of the cache on the same machine skip
//! re-hashing or re-scanning a file that another invocation already
//! processed. The teacher repo and the rest of the example pack carry
//! no shared-memory-table crate, so this cache is scoped to the current
//! process (a `Mutex<HashMap<..>>`) instead of `mmap`'d pages shared
//! across processes. Disabled behaviour (every lookup misses, every
//! insert is a no-op) is identical either way, only slower; the
//! cross-process speedup is the part this implementation forgoes.

use ccache_core::Digest;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ContentType {
    RawDigest,
    TemporalScan,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct InodeKey {
    device: u64,
    inode: u64,
    size: u64,
    mtime_ns: i64,
    ctime_ns: i64,
    content_type: ContentType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacroFlags {
    pub has_date: bool,
    pub has_time: bool,
    pub has_timestamp: bool,
}

#[derive(Clone, Debug)]
enum CachedValue {
    Digest(Digest),
    Macro(MacroFlags),
}

pub struct InodeCache {
    enabled: bool,
    table: Mutex<HashMap<InodeKey, CachedValue>>,
}

#[derive(Clone, Copy, Debug)]
pub struct FileStat {
    pub device: u64,
    pub inode: u64,
    pub size: u64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
}

#[cfg(unix)]
pub fn stat_file(path: &Path) -> Option<FileStat> {
    use std::os::unix::fs::MetadataExt;
    let meta = fs::metadata(path).ok()?;
    Some(FileStat {
        device: meta.dev(),
        inode: meta.ino(),
        size: meta.size(),
        mtime_ns: meta.mtime() * 1_000_000_000 + meta.mtime_nsec(),
        ctime_ns: meta.ctime() * 1_000_000_000 + meta.ctime_nsec(),
    })
}

#[cfg(not(unix))]
pub fn stat_file(path: &Path) -> Option<FileStat> {
    let meta = fs::metadata(path).ok()?;
    Some(FileStat {
        device: 0,
        inode: 0,
        size: meta.len(),
        mtime_ns: 0,
        ctime_ns: 0,
    })
}

impl InodeCache {
    /// `enabled` should reflect whatever platform/config gate the
    /// caller applies; on non-unix platforms `stat_file` never yields a
    /// stable inode identity so callers should pass `false` there.
    pub fn new(enabled: bool) -> Self {
        InodeCache {
            enabled,
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        InodeCache::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lookup(&self, stat: FileStat, content_type: ContentType) -> Option<CachedValue> {
        if !self.enabled {
            return None;
        }
        let key = InodeKey {
            device: stat.device,
            inode: stat.inode,
            size: stat.size,
            mtime_ns: stat.mtime_ns,
            ctime_ns: stat.ctime_ns,
            content_type,
        };
        self.table.lock().unwrap().get(&key).cloned()
    }

    fn insert(&self, stat: FileStat, content_type: ContentType, value: CachedValue) {
        if !self.enabled {
            return;
        }
        let key = InodeKey {
            device: stat.device,
            inode: stat.inode,
            size: stat.size,
            mtime_ns: stat.mtime_ns,
            ctime_ns: stat.ctime_ns,
            content_type,
        };
        self.table.lock().unwrap().insert(key, value);
    }

    pub fn lookup_digest(&self, stat: FileStat) -> Option<Digest> {
        match self.lookup(stat, ContentType::RawDigest)? {
            CachedValue::Digest(d) => Some(d),
            CachedValue::Macro(_) => None,
        }
    }

    pub fn insert_digest(&self, stat: FileStat, digest: Digest) {
        self.insert(stat, ContentType::RawDigest, CachedValue::Digest(digest));
    }

    pub fn lookup_macro_flags(&self, stat: FileStat) -> Option<MacroFlags> {
        match self.lookup(stat, ContentType::TemporalScan)? {
            CachedValue::Macro(flags) => Some(flags),
            CachedValue::Digest(_) => None,
        }
    }

    pub fn insert_macro_flags(&self, stat: FileStat, flags: MacroFlags) {
        self.insert(stat, ContentType::TemporalScan, CachedValue::Macro(flags));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(inode: u64) -> FileStat {
        FileStat {
            device: 1,
            inode,
            size: 10,
            mtime_ns: 100,
            ctime_ns: 100,
        }
    }

    #[test]
    fn disabled_cache_always_misses() {
        let cache = InodeCache::disabled();
        let s = stat(1);
        cache.insert_digest(s, Digest::from_bytes([1; Digest::SIZE]));
        assert!(cache.lookup_digest(s).is_none());
    }

    #[test]
    fn enabled_cache_round_trips_digest() {
        let cache = InodeCache::new(true);
        let s = stat(2);
        let digest = Digest::from_bytes([7; Digest::SIZE]);
        cache.insert_digest(s, digest);
        assert_eq!(cache.lookup_digest(s), Some(digest));
    }

    #[test]
    fn digest_and_macro_entries_are_independent() {
        let cache = InodeCache::new(true);
        let s = stat(3);
        cache.insert_digest(s, Digest::from_bytes([9; Digest::SIZE]));
        assert!(cache.lookup_macro_flags(s).is_none());
    }
}

use crate::layout::all_shards;
use ccache_core::envelope::{self, CompressionType};
use ccache_core::ThreadPool;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct RecompressionReport {
    pub rewritten: u64,
    pub skipped: u64,
}

/// Walks every shard and re-encodes any entry whose stored compression
/// level differs from `target_level` at `target_level`, preserving the
/// entry's mtime (and thus its place in LRU order). An entry that fails
/// to parse is left untouched and does not affect any counter — whether
/// such entries should instead be evicted is left to the caller; this
/// function always skips them, which §9's open question allows.
pub fn recompress_all(root: &Path, target_level: i32, pool: &ThreadPool) -> RecompressionReport {
    let rewritten = Arc::new(AtomicU64::new(0));
    let skipped = Arc::new(AtomicU64::new(0));

    for (a, b) in all_shards() {
        let shard = root.join(a.to_string()).join(b.to_string());
        let rewritten = Arc::clone(&rewritten);
        let skipped = Arc::clone(&skipped);
        pool.enqueue(move || {
            recompress_shard(&shard, target_level, &rewritten, &skipped);
        });
    }

    // `enqueue` fires-and-forgets; callers that need the report to
    // reflect a fully finished pass should drop or join the pool first.
    RecompressionReport {
        rewritten: rewritten.load(Ordering::SeqCst),
        skipped: skipped.load(Ordering::SeqCst),
    }
}

fn recompress_shard(shard: &Path, target_level: i32, rewritten: &AtomicU64, skipped: &AtomicU64) {
    let Ok(dir) = fs::read_dir(shard) else {
        return;
    };
    for entry in dir.flatten() {
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if name == "stats" || name == "stats.lock" || name == "CACHEDIR.TAG" {
            continue;
        }
        if recompress_one(&path, target_level).is_some() {
            rewritten.fetch_add(1, Ordering::SeqCst);
        } else {
            skipped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Returns `Some(())` if the entry was rewritten, `None` if it was left
/// untouched (already at the target level, or unparseable).
fn recompress_one(path: &PathBuf, target_level: i32) -> Option<()> {
    let original = fs::read(path).ok()?;
    let (mut header, payload) = envelope::deserialize(&original).ok()?;

    let already_at_level = header.compression_type == CompressionType::Zstd
        && header.compression_level as i32 == target_level;
    if already_at_level {
        return None;
    }

    header.compression_type = CompressionType::Zstd;
    header.compression_level = target_level as i8;
    let rewritten = envelope::serialize(header, &payload).ok()?;

    let meta = fs::metadata(path).ok()?;
    let atime = filetime::FileTime::from_last_access_time(&meta);
    let mtime = filetime::FileTime::from_last_modification_time(&meta);

    let tmp = path.with_extension("tmp.recompress");
    fs::write(&tmp, &rewritten).ok()?;
    fs::rename(&tmp, path).ok()?;
    let _ = filetime::set_file_times(path, atime, mtime);

    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccache_core::envelope::{CacheEntryHeader, EntryType};

    #[test]
    fn recompress_one_rewrites_to_target_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entryR");

        let mut header = CacheEntryHeader::new(EntryType::Result, "1.0");
        header.compression_type = CompressionType::Zstd;
        header.compression_level = 1;
        let bytes = envelope::serialize(header, &vec![b'y'; 1024]).unwrap();
        fs::write(&path, &bytes).unwrap();

        let rewritten = recompress_one(&path, 9);
        assert!(rewritten.is_some());

        let (header, payload) = envelope::deserialize(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(header.compression_level, 9);
        assert_eq!(payload, vec![b'y'; 1024]);
    }

    #[test]
    fn recompress_one_skips_entry_already_at_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entryR");

        let mut header = CacheEntryHeader::new(EntryType::Result, "1.0");
        header.compression_type = CompressionType::Zstd;
        header.compression_level = 5;
        let bytes = envelope::serialize(header, &vec![b'z'; 64]).unwrap();
        fs::write(&path, &bytes).unwrap();

        assert!(recompress_one(&path, 5).is_none());
    }

    #[test]
    fn recompress_one_skips_unparseable_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbageR");
        fs::write(&path, b"not a cache entry").unwrap();
        assert!(recompress_one(&path, 5).is_none());
    }
}

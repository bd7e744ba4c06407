use crate::layout::{all_shards, shard_dir};
use crate::shard_stats::{self, OnlyIfChanged};
use ccache_core::envelope::peek_header;
use ccache_core::error::CoreError;
use ccache_core::stats::Statistic;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

fn is_entry_file(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some("stats") | Some("stats.lock") | Some("CACHEDIR.TAG") => false,
        Some(_) => true,
        None => false,
    }
}

struct Entry {
    path: PathBuf,
    mtime: SystemTime,
    size: u64,
}

fn list_entries(shard: &Path) -> std::io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    if !shard.exists() {
        return Ok(entries);
    }
    for dirent in fs::read_dir(shard)? {
        let dirent = dirent?;
        let path = dirent.path();
        if !path.is_file() || !is_entry_file(&path) {
            continue;
        }
        let meta = dirent.metadata()?;
        entries.push(Entry {
            path,
            mtime: meta.modified()?,
            size: meta.len(),
        });
    }
    Ok(entries)
}

/// Deletes entries from `shard` oldest-mtime-first until both `max_size`
/// (bytes) and `max_files` are satisfied. Ties on mtime break by path, so
/// the result is deterministic. Updates the shard's stats and increments
/// `cleanups_performed`.
pub fn clean_dir(shard: &Path, max_size: u64, max_files: u64) -> Result<(), CoreError> {
    let mut entries = list_entries(shard).map_err(|e| CoreError::io(shard.to_path_buf(), e))?;
    entries.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.path.cmp(&b.path)));

    let mut total_size: u64 = entries.iter().map(|e| e.size).sum();
    let mut total_files: u64 = entries.len() as u64;

    let mut removed_size: u64 = 0;
    let mut removed_files: u64 = 0;

    let mut iter = entries.into_iter();
    while total_size > max_size || total_files > max_files {
        let Some(entry) = iter.next() else { break };
        if fs::remove_file(&entry.path).is_ok() {
            total_size = total_size.saturating_sub(entry.size);
            total_files = total_files.saturating_sub(1);
            removed_size += entry.size;
            removed_files += 1;
        }
    }

    if removed_files > 0 {
        shard_stats::update(shard, OnlyIfChanged::No, |counters| {
            let size_kib = counters.get(Statistic::CacheSizeKibibyte) as i64;
            let new_size = (size_kib - (removed_size as i64 / 1024)).max(0) as u64;
            counters.set(Statistic::CacheSizeKibibyte, new_size);

            let files = counters.get(Statistic::FilesInCache) as i64;
            let new_files = (files - removed_files as i64).max(0) as u64;
            counters.set(Statistic::FilesInCache, new_files);

            counters.increment(Statistic::CleanupsPerformed, 1);
        })?;
    }

    Ok(())
}

/// Applies `clean_dir` to every shard using `config.max_size/16` and
/// `config.max_files/16` as the per-shard thresholds.
pub fn clean_all(root: &Path, max_size: u64, max_files: u64) -> Result<(), CoreError> {
    let per_shard_size = max_size / 16;
    let per_shard_files = max_files / 16;
    for (a, b) in all_shards() {
        clean_dir(&shard_dir(root, a, b), per_shard_size, per_shard_files)?;
    }
    Ok(())
}

/// Removes entries older than `max_age`, or belonging to `namespace`, or
/// both when both are supplied. An entry whose header cannot be parsed
/// is left untouched and does not affect any counter, matching the
/// "skipped entries increment no counter" rule used for recompression.
pub fn evict(root: &Path, max_age: Option<Duration>, namespace: Option<&str>) -> Result<(), CoreError> {
    let now = SystemTime::now();
    for (a, b) in all_shards() {
        let shard = shard_dir(root, a, b);
        let entries = list_entries(&shard).map_err(|e| CoreError::io(shard.clone(), e))?;
        let mut removed_size: u64 = 0;
        let mut removed_files: u64 = 0;

        for entry in entries {
            let too_old = match max_age {
                Some(age) => now.duration_since(entry.mtime).map(|d| d > age).unwrap_or(false),
                None => false,
            };
            let wrong_namespace = match namespace {
                Some(ns) => match fs::read(&entry.path).ok().and_then(|b| peek_header(&b).ok()) {
                    Some(header) => header.namespace == ns,
                    None => false,
                },
                None => false,
            };

            if too_old || wrong_namespace {
                if fs::remove_file(&entry.path).is_ok() {
                    removed_size += entry.size;
                    removed_files += 1;
                }
            }
        }

        if removed_files > 0 {
            shard_stats::update(&shard, OnlyIfChanged::No, |counters| {
                let size_kib = counters.get(Statistic::CacheSizeKibibyte) as i64;
                let new_size = (size_kib - (removed_size as i64 / 1024)).max(0) as u64;
                counters.set(Statistic::CacheSizeKibibyte, new_size);

                let files = counters.get(Statistic::FilesInCache) as i64;
                let new_files = (files - removed_files as i64).max(0) as u64;
                counters.set(Statistic::FilesInCache, new_files);
            })?;
        }
    }
    Ok(())
}

/// Unlinks every entry file in every shard, leaving `CACHEDIR.TAG` and
/// stats files behind (callers that also want counters reset call
/// `shard_stats::update` with a zeroing mutator separately).
pub fn wipe_all(root: &Path) -> Result<(), CoreError> {
    for (a, b) in all_shards() {
        let shard = shard_dir(root, a, b);
        let entries = list_entries(&shard).map_err(|e| CoreError::io(shard.clone(), e))?;
        for entry in entries {
            let _ = fs::remove_file(entry.path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_entry(shard: &Path, name: &str, size: usize, age_secs: u64) {
        fs::create_dir_all(shard).unwrap();
        let path = shard.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(&vec![b'x'; size]).unwrap();
        drop(f);
        let mtime = filetime::FileTime::from_unix_time(
            (SystemTime::now() - Duration::from_secs(age_secs))
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap()
                .as_secs() as i64,
            0,
        );
        filetime::set_file_mtime(&path, mtime).unwrap();
    }

    #[test]
    fn clean_dir_evicts_oldest_first_to_bound() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("shard");
        for i in 0..10 {
            write_entry(&shard, &format!("entry{i}R"), 1024 * 1024, 10 - i as u64);
        }
        clean_dir(&shard, 4 * 1024 * 1024, 4).unwrap();
        let remaining = list_entries(&shard).unwrap();
        assert_eq!(remaining.len(), 4);
        // the 4 most-recently-touched (lowest age) should remain
        for e in &remaining {
            let name = e.path.file_name().unwrap().to_str().unwrap();
            let idx: usize = name.trim_start_matches("entry").trim_end_matches('R').parse().unwrap();
            assert!(idx >= 6, "expected only newest entries to remain, found {name}");
        }
    }

    #[test]
    fn evict_by_age_removes_old_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("0").join("0");
        write_entry(&shard, "oldR", 10, 1000);
        write_entry(&shard, "newR", 10, 0);
        evict(dir.path(), Some(Duration::from_secs(500)), None).unwrap();
        let remaining: Vec<_> = list_entries(&shard)
            .unwrap()
            .into_iter()
            .map(|e| e.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(remaining, vec!["newR".to_string()]);
    }

    #[test]
    fn wipe_all_removes_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("a").join("b");
        write_entry(&shard, "entryR", 10, 0);
        wipe_all(dir.path()).unwrap();
        assert!(list_entries(&shard).unwrap().is_empty());
    }
}

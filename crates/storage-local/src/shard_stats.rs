use crate::layout::{all_shards, shard_dir, stats_file_path};
use ccache_core::atomic::with_atomic;
use ccache_core::error::CoreError;
use ccache_core::lock::FileLock;
use ccache_core::stats::{format_stats_text, parse_stats_text, StatsCounters};
use std::fs;
use std::path::Path;

/// Whether an update that left counters unchanged should still be
/// written back. Skipping avoids mtime churn on an otherwise-idle shard.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OnlyIfChanged {
    Yes,
    No,
}

/// Reads a shard's `stats` file. Missing or malformed files degrade to
/// all-zero counters; reads take no lock, matching the original
/// lock-free, tolerant `StatsFile::read`.
pub fn read(shard: &Path) -> StatsCounters {
    match fs::read_to_string(stats_file_path(shard)) {
        Ok(text) => parse_stats_text(&text),
        Err(_) => StatsCounters::zero(),
    }
}

/// Acquires the shard's lock, reads current counters, lets `mutate`
/// adjust them, and writes back atomically unless `only_if_changed` says
/// the counters are unchanged.
pub fn update<F>(shard: &Path, only_if_changed: OnlyIfChanged, mutate: F) -> Result<(), CoreError>
where
    F: FnOnce(&mut StatsCounters),
{
    fs::create_dir_all(shard).map_err(|e| CoreError::io(shard.to_path_buf(), e))?;
    let lock_path = shard.join("stats.lock");
    let _lock = FileLock::acquire(&lock_path)?;

    let mut counters = read(shard);
    let before = counters.clone();
    mutate(&mut counters);

    if only_if_changed == OnlyIfChanged::Yes && counters == before {
        return Ok(());
    }

    let text = format_stats_text(&counters);
    with_atomic(stats_file_path(shard), |f| f.write(text.as_bytes()))
}

/// Visits every shard's stats file and element-wise sums them into one
/// aggregate view. Used by `ccache --show-stats`.
pub fn aggregate(root: &Path) -> StatsCounters {
    let mut total = StatsCounters::zero();
    for (a, b) in all_shards() {
        let shard = shard_dir(root, a, b);
        total.merge(&read(&shard));
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccache_core::stats::Statistic;

    #[test]
    fn update_persists_across_reads() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("3").join("f");
        update(&shard, OnlyIfChanged::No, |c| {
            c.increment(Statistic::CacheMiss, 1);
        })
        .unwrap();
        let counters = read(&shard);
        assert_eq!(counters.get(Statistic::CacheMiss), 1);
    }

    #[test]
    fn only_if_changed_skips_write_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("a").join("b");
        update(&shard, OnlyIfChanged::No, |c| {
            c.increment(Statistic::CacheMiss, 1);
        })
        .unwrap();
        let before_mtime = fs::metadata(stats_file_path(&shard)).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        update(&shard, OnlyIfChanged::Yes, |_c| {}).unwrap();
        let after_mtime = fs::metadata(stats_file_path(&shard)).unwrap().modified().unwrap();
        assert_eq!(before_mtime, after_mtime);
    }

    #[test]
    fn aggregate_sums_across_shards() {
        let dir = tempfile::tempdir().unwrap();
        update(&dir.path().join("0").join("0"), OnlyIfChanged::No, |c| {
            c.increment(Statistic::CacheMiss, 2);
        })
        .unwrap();
        update(&dir.path().join("f").join("f"), OnlyIfChanged::No, |c| {
            c.increment(Statistic::CacheMiss, 3);
        })
        .unwrap();
        let total = aggregate(dir.path());
        assert_eq!(total.get(Statistic::CacheMiss), 5);
    }
}

mod classifier;
mod config;

use ccache_core::stats::Statistic;
use ccache_core::ThreadPool;
use ccache_fingerprint::{CompilerCheck, InodeCache};
use ccache_orchestrator::{Context, Outcome, PrefixConfig, SignalGuard, SystemCompilerRunner};
use ccache_storage::StorageFacade;
use ccache_storage_local::{cleanup, layout, recompress, shard_stats, LocalStore};
use clap::Parser;
use classifier::{NaiveClassifier, NaiveIncludeScanner};
use config::Config;
use std::path::PathBuf;
use std::time::Duration;

/// Content-addressed cache for compiler invocations.
///
/// Invoked either directly (`ccache cc -c foo.c -o foo.o`) or via a
/// symlink named after the compiler it wraps.
#[derive(Parser, Debug)]
#[command(name = "ccache", version, about)]
struct Cli {
    /// Run LRU cleanup once.
    #[arg(short = 'c', long = "cleanup")]
    cleanup: bool,

    /// Wipe all entries.
    #[arg(short = 'C', long = "clear")]
    clear: bool,

    /// Print aggregated counters.
    #[arg(short = 's', long = "show-stats")]
    show_stats: bool,

    /// Reset counters.
    #[arg(short = 'z', long = "zero-stats")]
    zero_stats: bool,

    /// Ephemeral `key=value` configuration override for this invocation.
    #[arg(short = 'o', value_name = "KEY=VAL")]
    overrides: Vec<String>,

    /// Set the file-count limit persistently.
    #[arg(short = 'F', long = "max-files")]
    max_files: Option<u64>,

    /// Set the size limit (bytes) persistently.
    #[arg(short = 'M', long = "max-size")]
    max_size: Option<u64>,

    /// LRU-like maintenance: remove entries older than this many seconds.
    #[arg(long = "evict-older-than")]
    evict_older_than: Option<u64>,

    /// LRU-like maintenance: remove entries outside this namespace.
    #[arg(long = "evict-namespace")]
    evict_namespace: Option<String>,

    /// Print per-shard compression statistics, or run `recompress` to
    /// re-encode all entries at `-o compression_level=N`.
    #[arg(short = 'X', long = "show-compression")]
    show_compression: Option<String>,

    /// Dump a cache entry's envelope header (and manifest summary, if
    /// applicable) for debugging.
    #[arg(long = "inspect")]
    inspect: Option<PathBuf>,

    /// `<compiler> <args...>` — the masqueraded invocation.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    compiler_and_args: Vec<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("ccache: fatal: {e}");
            std::process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    let mut config = Config::load();
    config.apply_overrides(&cli.overrides);
    if let Some(max_files) = cli.max_files {
        config.max_files = Some(max_files);
    }
    if let Some(max_size) = cli.max_size {
        config.max_size = Some(max_size);
    }

    let local = LocalStore::new(&config.cache_dir)?;

    if let Some(path) = &cli.inspect {
        return inspect(path);
    }
    if cli.clear {
        cleanup::wipe_all(local.root())?;
        return Ok(0);
    }
    if cli.cleanup {
        cleanup::clean_all(
            local.root(),
            config.max_size.unwrap_or(u64::MAX),
            config.max_files.unwrap_or(u64::MAX),
        )?;
        return Ok(0);
    }
    if cli.evict_older_than.is_some() || cli.evict_namespace.is_some() {
        let max_age = cli.evict_older_than.map(Duration::from_secs);
        cleanup::evict(local.root(), max_age, cli.evict_namespace.as_deref())?;
        return Ok(0);
    }
    if cli.zero_stats {
        for (a, b) in layout::all_shards() {
            let shard = layout::shard_dir(local.root(), a, b);
            shard_stats::update(&shard, shard_stats::OnlyIfChanged::No, |counters| {
                *counters = ccache_core::StatsCounters::zero();
            })?;
        }
        return Ok(0);
    }
    if cli.show_stats {
        print_stats(&local);
        return Ok(0);
    }
    if let Some(action) = &cli.show_compression {
        if action == "recompress" {
            let level = config.compression_level.unwrap_or(3);
            let pool = ThreadPool::new(4, 64);
            let report = recompress::recompress_all(local.root(), level, &pool);
            println!("recompressed {} entries, skipped {}", report.rewritten, report.skipped);
        } else {
            print_stats(&local);
        }
        return Ok(0);
    }

    if cli.compiler_and_args.is_empty() {
        anyhow::bail!("no compiler invocation given");
    }

    compile(&config, local, &cli.compiler_and_args)
}

fn print_stats(local: &LocalStore) {
    let stats = local.aggregate_stats();
    for stat in ccache_core::stats::Statistic::ALL {
        let value = stats.get(stat);
        if value != 0 {
            println!("{:<32} {}", stat.name(), value);
        }
    }
}

fn inspect(path: &PathBuf) -> anyhow::Result<i32> {
    let bytes = std::fs::read(path)?;
    match ccache_core::envelope::deserialize(&bytes) {
        Ok((header, payload)) => {
            println!("format_version: {}", header.format_version);
            println!("entry_type:     {:?}", header.entry_type);
            println!("compression:    {:?} level {}", header.compression_type, header.compression_level);
            println!("self_contained: {}", header.self_contained);
            println!("namespace:      {}", header.namespace);
            println!("entry_size:     {}", header.entry_size);
            if matches!(header.entry_type, ccache_core::envelope::EntryType::Manifest) {
                if let Ok(manifest) = ccache_manifest::Manifest::from_bytes(&payload) {
                    print!("{}", manifest.inspect());
                }
            }
        }
        Err(e) => eprintln!("ccache: could not parse entry: {e}"),
    }
    Ok(0)
}

fn compile(config: &Config, local: LocalStore, args: &[String]) -> anyhow::Result<i32> {
    let _signal_guard = SignalGuard::install();

    let compiler = PathBuf::from(&args[0]);
    let compiler_args: Vec<String> = args[1..].to_vec();

    let compression_level = config.compression.then(|| config.compression_level.unwrap_or(3));
    let mut storage = StorageFacade::new(
        local,
        config.read_only,
        config.namespace.clone(),
        env!("CARGO_PKG_VERSION"),
        compression_level,
    );
    for url in &config.remote_storage {
        match ccache_storage_remote::build_backend(url, ccache_storage_remote::DEFAULT_TIMEOUTS) {
            Ok(backend) => storage.add_remote(std::sync::Arc::from(backend), !config.read_only),
            Err(e) => log::warn!("skipping remote storage {url}: {e}"),
        }
    }

    let inode_cache = InodeCache::new(cfg!(unix));

    let compiler_check = match &config.compiler_check {
        Some(opaque) => CompilerCheck::Opaque(opaque.clone()),
        None => match ccache_fingerprint::stat_file(&compiler) {
            Some(stat) => CompilerCheck::SizeMtime {
                size: stat.size,
                mtime_ns: stat.mtime_ns,
            },
            None => CompilerCheck::Opaque(compiler.display().to_string()),
        },
    };

    let cwd = std::env::current_dir().ok();
    let current_local_date = current_local_date();
    let source_date_epoch = std::env::var("SOURCE_DATE_EPOCH").ok();

    let ctx = Context {
        storage: &storage,
        inode_cache: &inode_cache,
        direct_mode_enabled: config.direct_mode && !config.read_only_direct,
        hard_link: config.hard_link,
        sloppy_file_stat: config.is_sloppy("file_stat_matches"),
        current_local_date,
        source_date_epoch,
        recache: config.recache,
        prefix: PrefixConfig {
            ccache_version: env!("CARGO_PKG_VERSION"),
            compiler_check,
            cc_name: compiler.file_name().and_then(|n| n.to_str()).unwrap_or("cc"),
            cwd: config.base_dir.is_none().then_some(cwd).flatten(),
            extra_files_to_hash: Vec::new(),
            ignore_options: config.ignore_options.clone(),
            arch_mappings: Vec::new(),
        },
    };

    let outcome = ccache_orchestrator::state::run(
        &ctx,
        &NaiveClassifier,
        &NaiveIncludeScanner,
        &SystemCompilerRunner { compiler },
        &compiler_args,
    )?;

    Ok(match outcome {
        Outcome::DirectHit | Outcome::PreprocessedHit => {
            let _ = storage.local().increment_stat(&zero_digest(), Statistic::CacheHit, 1);
            0
        }
        Outcome::Miss { .. } => {
            let _ = storage.local().increment_stat(&zero_digest(), Statistic::CacheMiss, 1);
            0
        }
        Outcome::Uncached { status, .. } => status,
    })
}

fn zero_digest() -> ccache_core::Digest {
    ccache_core::Digest::from_bytes([0; ccache_core::Digest::SIZE])
}

/// Today's calendar date as `YYYY-MM-DD`, fed into the direct-mode key
/// whenever a `__DATE__`/`__TIME__`/`__TIMESTAMP__` macro is observed
/// (§4.10) so that invocations on different days produce different
/// keys. Computed straight from `SystemTime` with a civil-from-days
/// conversion (Howard Hinnant's algorithm) rather than pulling in a
/// calendar crate for one date string; this reports UTC, not the
/// process's actual local timezone offset, which only matters for
/// invocations within a few hours of local midnight.
fn current_local_date() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = (secs / 86_400) as i64;
    let (year, month, day) = civil_from_days(days);
    format!("{year:04}-{month:02}-{day:02}")
}

/// Days-since-epoch to proleptic Gregorian calendar date, per Howard
/// Hinnant's `civil_from_days` (public domain, chrono::naive uses the
/// same algorithm).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

#[cfg(test)]
mod tests {
    use super::civil_from_days;

    #[test]
    fn civil_from_days_matches_known_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(20_661), (2026, 7, 27));
    }
}

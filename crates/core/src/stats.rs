use std::fmt;

/// Stable ordinal identifying one counter in a `StatsCounters` vector.
/// Ordinals are assigned once and never reused, so that a `stats` file
/// written by an older binary still parses under a newer one (trailing
/// counters simply default to zero).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(usize)]
pub enum Statistic {
    CacheMiss = 0,
    CacheHit = 1,
    DirectCacheHit = 2,
    DirectCacheMiss = 3,
    PreprocessedCacheHit = 4,
    PreprocessedCacheMiss = 5,
    CompileFailed = 6,
    PreprocessorError = 7,
    CompilerProducedNoOutput = 8,
    CompilerProducedEmptyOutput = 9,
    InternalError = 10,
    BadCompilerArguments = 11,
    Recache = 12,
    FilesInCache = 13,
    CacheSizeKibibyte = 14,
    CleanupsPerformed = 15,
    RemoteStorageHit = 16,
    RemoteStorageMiss = 17,
    RemoteStorageReadHit = 18,
    RemoteStorageError = 19,
    RemoteStorageTimeout = 20,
    UnsupportedCompilerOption = 21,
    UnsupportedCodeDirective = 22,
    UnsupportedEnvironmentVariable = 23,
    AutoconfTest = 24,
    CouldNotFindCompiler = 25,
    CouldNotUseModules = 26,
    CouldNotUsePrecompiledHeader = 27,
    NoInputFile = 28,
    MultipleSourceFiles = 29,
    OutputToStdout = 30,
    OutputIsStandardOutput = 31,
}

/// One past the highest ordinal, i.e. the fixed length of every
/// `StatsCounters` vector.
pub const NUM_STATISTICS: usize = 32;

impl Statistic {
    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub const ALL: [Statistic; NUM_STATISTICS] = [
        Statistic::CacheMiss,
        Statistic::CacheHit,
        Statistic::DirectCacheHit,
        Statistic::DirectCacheMiss,
        Statistic::PreprocessedCacheHit,
        Statistic::PreprocessedCacheMiss,
        Statistic::CompileFailed,
        Statistic::PreprocessorError,
        Statistic::CompilerProducedNoOutput,
        Statistic::CompilerProducedEmptyOutput,
        Statistic::InternalError,
        Statistic::BadCompilerArguments,
        Statistic::Recache,
        Statistic::FilesInCache,
        Statistic::CacheSizeKibibyte,
        Statistic::CleanupsPerformed,
        Statistic::RemoteStorageHit,
        Statistic::RemoteStorageMiss,
        Statistic::RemoteStorageReadHit,
        Statistic::RemoteStorageError,
        Statistic::RemoteStorageTimeout,
        Statistic::UnsupportedCompilerOption,
        Statistic::UnsupportedCodeDirective,
        Statistic::UnsupportedEnvironmentVariable,
        Statistic::AutoconfTest,
        Statistic::CouldNotFindCompiler,
        Statistic::CouldNotUseModules,
        Statistic::CouldNotUsePrecompiledHeader,
        Statistic::NoInputFile,
        Statistic::MultipleSourceFiles,
        Statistic::OutputToStdout,
        Statistic::OutputIsStandardOutput,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Statistic::CacheMiss => "cache_miss",
            Statistic::CacheHit => "cache_hit",
            Statistic::DirectCacheHit => "direct_cache_hit",
            Statistic::DirectCacheMiss => "direct_cache_miss",
            Statistic::PreprocessedCacheHit => "preprocessed_cache_hit",
            Statistic::PreprocessedCacheMiss => "preprocessed_cache_miss",
            Statistic::CompileFailed => "compile_failed",
            Statistic::PreprocessorError => "preprocessor_error",
            Statistic::CompilerProducedNoOutput => "compiler_produced_no_output",
            Statistic::CompilerProducedEmptyOutput => "compiler_produced_empty_output",
            Statistic::InternalError => "internal_error",
            Statistic::BadCompilerArguments => "bad_compiler_arguments",
            Statistic::Recache => "recache",
            Statistic::FilesInCache => "files_in_cache",
            Statistic::CacheSizeKibibyte => "cache_size_kibibyte",
            Statistic::CleanupsPerformed => "cleanups_performed",
            Statistic::RemoteStorageHit => "remote_storage_hit",
            Statistic::RemoteStorageMiss => "remote_storage_miss",
            Statistic::RemoteStorageReadHit => "remote_storage_read_hit",
            Statistic::RemoteStorageError => "remote_storage_error",
            Statistic::RemoteStorageTimeout => "remote_storage_timeout",
            Statistic::UnsupportedCompilerOption => "unsupported_compiler_option",
            Statistic::UnsupportedCodeDirective => "unsupported_code_directive",
            Statistic::UnsupportedEnvironmentVariable => "unsupported_environment_variable",
            Statistic::AutoconfTest => "autoconf_test",
            Statistic::CouldNotFindCompiler => "could_not_find_compiler",
            Statistic::CouldNotUseModules => "could_not_use_modules",
            Statistic::CouldNotUsePrecompiledHeader => "could_not_use_precompiled_header",
            Statistic::NoInputFile => "no_input_file",
            Statistic::MultipleSourceFiles => "multiple_source_files",
            Statistic::OutputToStdout => "output_to_stdout",
            Statistic::OutputIsStandardOutput => "output_is_standard_output",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed-length vector of `u64` counters addressed by `Statistic`
/// ordinal. Addition and equality are element-wise, matching the
/// per-shard stats files that get merged into one aggregate view.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StatsCounters {
    counters: [u64; NUM_STATISTICS],
}

impl StatsCounters {
    pub fn zero() -> Self {
        StatsCounters {
            counters: [0; NUM_STATISTICS],
        }
    }

    pub fn get(&self, stat: Statistic) -> u64 {
        self.counters[stat.ordinal()]
    }

    pub fn set(&mut self, stat: Statistic, value: u64) {
        self.counters[stat.ordinal()] = value;
    }

    pub fn increment(&mut self, stat: Statistic, delta: u64) {
        self.counters[stat.ordinal()] = self.counters[stat.ordinal()].saturating_add(delta);
    }

    /// Raw counter slice, ordered by ordinal; used when serializing a
    /// stats file (one decimal value per line, line N = ordinal N).
    pub fn get_raw(&self) -> &[u64; NUM_STATISTICS] {
        &self.counters
    }

    pub fn set_raw(&mut self, raw: [u64; NUM_STATISTICS]) {
        self.counters = raw;
    }

    pub fn all_zero(&self) -> bool {
        self.counters.iter().all(|&c| c == 0)
    }

    pub fn merge(&mut self, other: &StatsCounters) {
        for i in 0..NUM_STATISTICS {
            self.counters[i] = self.counters[i].saturating_add(other.counters[i]);
        }
    }
}

impl Default for StatsCounters {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::ops::Add for StatsCounters {
    type Output = StatsCounters;

    fn add(mut self, rhs: StatsCounters) -> StatsCounters {
        self.merge(&rhs);
        self
    }
}

/// Parses a stats file's text form: newline-separated decimal `u64`s,
/// one per ordinal. Tolerates a missing, short, or malformed file —
/// unparseable or absent lines default to zero, matching the original
/// `StatsFile::read` behaviour of never failing a read.
pub fn parse_stats_text(text: &str) -> StatsCounters {
    let mut counters = StatsCounters::zero();
    for (i, line) in text.lines().enumerate().take(NUM_STATISTICS) {
        if let Ok(value) = line.trim().parse::<u64>() {
            counters.counters[i] = value;
        }
    }
    counters
}

pub fn format_stats_text(counters: &StatsCounters) -> String {
    let mut out = String::new();
    for value in counters.get_raw() {
        out.push_str(&value.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_then_get_round_trips() {
        let mut c = StatsCounters::zero();
        c.increment(Statistic::CacheMiss, 1);
        c.increment(Statistic::CacheMiss, 2);
        assert_eq!(c.get(Statistic::CacheMiss), 3);
    }

    #[test]
    fn parse_tolerates_missing_and_short_text() {
        let c = parse_stats_text("5\n\n7\n");
        assert_eq!(c.get(Statistic::CacheMiss), 5);
        assert_eq!(c.get(Statistic::CacheHit), 0);
        assert_eq!(c.get(Statistic::DirectCacheHit), 7);
    }

    #[test]
    fn format_then_parse_round_trips() {
        let mut c = StatsCounters::zero();
        c.increment(Statistic::RemoteStorageTimeout, 42);
        let text = format_stats_text(&c);
        let parsed = parse_stats_text(&text);
        assert_eq!(c, parsed);
    }

    #[test]
    fn all_zero_detects_any_nonzero_counter() {
        let mut c = StatsCounters::zero();
        assert!(c.all_zero());
        c.increment(Statistic::Recache, 1);
        assert!(!c.all_zero());
    }

    #[test]
    fn merge_is_element_wise() {
        let mut a = StatsCounters::zero();
        a.increment(Statistic::CacheMiss, 3);
        let mut b = StatsCounters::zero();
        b.increment(Statistic::CacheMiss, 4);
        b.increment(Statistic::CacheHit, 1);
        a.merge(&b);
        assert_eq!(a.get(Statistic::CacheMiss), 7);
        assert_eq!(a.get(Statistic::CacheHit), 1);
    }
}

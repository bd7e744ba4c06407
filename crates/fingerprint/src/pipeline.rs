use crate::inode_cache::{stat_file, InodeCache, MacroFlags};
use crate::macros::scan_temporal_macros;
use ccache_core::{Digest, Hasher};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> FingerprintError {
    FingerprintError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// How the compiler's identity is bound into the prefix hash. All three
/// variants are collaborator-supplied; this pipeline only knows how to
/// mix the result into the hash.
pub enum CompilerCheck {
    SizeMtime { size: u64, mtime_ns: i64 },
    Opaque(String),
    CommandOutput(Vec<u8>),
}

/// Everything the common-prefix hash is seeded from. The argument
/// classification itself (which flags "affect output") is the
/// argument-parser collaborator's job; this struct only receives the
/// already-classified list.
pub struct PrefixInputs<'a> {
    pub ccache_version: &'a str,
    pub compiler_check: &'a CompilerCheck,
    pub cc_name: &'a str,
    /// `None` when base-dir rewriting applies and cwd should not be mixed in.
    pub cwd: Option<&'a Path>,
    pub extra_files_to_hash: &'a [PathBuf],
    pub hashed_args: &'a [String],
    /// Supports a single trailing `*` wildcard, e.g. `-frandom-seed=*`.
    pub ignore_options: &'a [String],
    pub arch_mappings: &'a [(String, String)],
}

pub fn matches_ignore_pattern(arg: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => arg.starts_with(prefix),
        None => arg == pattern,
    }
}

fn is_ignored(arg: &str, ignore_options: &[String]) -> bool {
    ignore_options.iter().any(|p| matches_ignore_pattern(arg, p))
}

pub fn compute_prefix_hash(inputs: &PrefixInputs) -> Result<Digest, FingerprintError> {
    let mut hasher = Hasher::new();
    hasher
        .delimit("ccache_version")
        .update(inputs.ccache_version.as_bytes());

    hasher.delimit("compiler_check");
    match inputs.compiler_check {
        CompilerCheck::SizeMtime { size, mtime_ns } => {
            hasher.update(&size.to_le_bytes()).update_i64(*mtime_ns);
        }
        CompilerCheck::Opaque(s) => {
            hasher.update(s.as_bytes());
        }
        CompilerCheck::CommandOutput(bytes) => {
            hasher.update(bytes);
        }
    }

    hasher.delimit("cc_name").update(inputs.cc_name.as_bytes());

    if let Some(cwd) = inputs.cwd {
        hasher
            .delimit("cwd")
            .update(cwd.to_string_lossy().as_bytes());
    }

    for path in inputs.extra_files_to_hash {
        hasher.delimit("extra_file");
        hasher.hash_file(path).map_err(|e| io_err(path, e))?;
    }

    hasher.delimit("args");
    for arg in inputs.hashed_args {
        if is_ignored(arg, inputs.ignore_options) {
            continue;
        }
        hasher.update(arg.as_bytes());
        hasher.update(&[0]);
    }

    hasher.delimit("arch_mappings");
    for (arch, mapped) in inputs.arch_mappings {
        hasher.update(arch.as_bytes()).update(&[0]).update(mapped.as_bytes()).update(&[0]);
    }

    Ok(hasher.digest())
}

/// Reads and hashes a file, consulting and populating the inode cache
/// for both the digest and the temporal-macro scan.
fn fingerprint_file(
    path: &Path,
    inode_cache: &InodeCache,
) -> Result<(Digest, MacroFlags, Vec<u8>), FingerprintError> {
    let bytes = fs::read(path).map_err(|e| io_err(path, e))?;
    let stat = stat_file(path);

    let digest = match stat.and_then(|s| inode_cache.lookup_digest(s)) {
        Some(d) => d,
        None => {
            let mut hasher = Hasher::new();
            hasher.update(&bytes);
            let d = hasher.digest();
            if let Some(s) = stat {
                inode_cache.insert_digest(s, d);
            }
            d
        }
    };

    let macro_flags = match stat.and_then(|s| inode_cache.lookup_macro_flags(s)) {
        Some(f) => f,
        None => {
            let f = scan_temporal_macros(&bytes);
            if let Some(s) = stat {
                inode_cache.insert_macro_flags(s, f);
            }
            f
        }
    };

    Ok((digest, macro_flags, bytes))
}

pub struct IncludeDependency {
    pub path: PathBuf,
    pub digest: Digest,
}

pub enum DirectModeOutcome {
    /// `__TIME__` was observed: direct mode is disabled for this invocation.
    Disabled,
    Key(Digest),
}

#[allow(clippy::too_many_arguments)]
pub fn compute_direct_key(
    prefix: Digest,
    source_path: &Path,
    inode_cache: &InodeCache,
    extra_files_not_already_hashed: &[PathBuf],
    includes: &[IncludeDependency],
    current_local_date: &str,
    source_date_epoch: Option<&str>,
) -> Result<DirectModeOutcome, FingerprintError> {
    let (_source_digest, source_flags, source_bytes) = fingerprint_file(source_path, inode_cache)?;
    if source_flags.has_time {
        return Ok(DirectModeOutcome::Disabled);
    }

    let mut hasher = Hasher::new();
    hasher.update(prefix.as_bytes());
    hasher.delimit("sourcefile").update(&source_bytes);

    if source_flags.has_date || source_flags.has_timestamp {
        hasher.delimit("temporal");
        if source_flags.has_date {
            hasher.update(current_local_date.as_bytes());
            if let Some(epoch) = source_date_epoch {
                hasher.update(epoch.as_bytes());
            }
        }
        if source_flags.has_timestamp {
            if let Some(stat) = stat_file(source_path) {
                hasher.update_i64(stat.mtime_ns);
            }
        }
    }

    for path in extra_files_not_already_hashed {
        let (digest, flags, _bytes) = fingerprint_file(path, inode_cache)?;
        if flags.has_time {
            return Ok(DirectModeOutcome::Disabled);
        }
        hasher.delimit("extra_file");
        hasher.update(digest.as_bytes());
    }

    for include in includes {
        hasher.delimit("include");
        hasher.update(include.path.to_string_lossy().as_bytes());
        hasher.update(include.digest.as_bytes());
    }

    Ok(DirectModeOutcome::Key(hasher.digest()))
}

pub fn compute_preprocessed_key(prefix: Digest, preprocessed_output: &[u8]) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update(prefix.as_bytes());
    hasher.delimit("preprocessed").update(preprocessed_output);
    hasher.digest()
}

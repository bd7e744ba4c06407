//! Derives the direct-mode and preprocessed-mode cache keys for a
//! compiler invocation from its arguments, inputs, compiler identity,
//! and environment, consulting an inode cache to avoid re-hashing
//! files multiple invocations have already seen.

pub mod inode_cache;
pub mod macros;
pub mod pipeline;

pub use inode_cache::{stat_file, FileStat, InodeCache, MacroFlags};
pub use macros::scan_temporal_macros;
pub use pipeline::{
    compute_direct_key, compute_prefix_hash, compute_preprocessed_key, matches_ignore_pattern,
    CompilerCheck, DirectModeOutcome, FingerprintError, IncludeDependency, PrefixInputs,
};

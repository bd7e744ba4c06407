//! Shared building blocks for the cache: digests, atomic writes, file
//! locks, the cache-entry envelope format, and the statistics counter
//! vector that every shard-local stats file is built from.

pub mod atomic;
pub mod cachedir;
pub mod digest;
pub mod envelope;
pub mod error;
pub mod hasher;
pub mod lock;
pub mod stats;
pub mod threadpool;

pub use digest::Digest;
pub use error::{CoreError, Result};
pub use hasher::Hasher;
pub use stats::{Statistic, StatsCounters};
pub use threadpool::ThreadPool;

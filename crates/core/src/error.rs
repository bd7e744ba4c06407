use std::io;
use std::path::PathBuf;

/// Errors surfaced by the low-level building blocks (hashing, atomic
/// writes, locking, envelope (de)serialization). Higher layers map most
/// of these down to a cache miss; only `FatalConfig` ever aborts an
/// invocation.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache entry is corrupt: {0}")]
    Corrupt(&'static str),

    #[error("invalid configuration: {0}")]
    FatalConfig(String),

    #[error("lock on {path} could not be acquired: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}

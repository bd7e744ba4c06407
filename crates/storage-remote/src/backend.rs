use ccache_core::Digest;
use std::time::Duration;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FailureKind {
    Error,
    Timeout,
}

#[derive(Clone, Debug)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn error(message: impl Into<String>) -> Self {
        Failure {
            kind: FailureKind::Error,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Failure {
            kind: FailureKind::Timeout,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::Timeout
    }
}

pub type BackendResult<T> = Result<T, Failure>;

/// Capability set every remote backend implements: `get`/`put`/`remove`
/// keyed by content digest. Backends are selected by URL scheme and
/// dispatched through this trait object rather than an inheritance
/// hierarchy.
pub trait RemoteBackend: Send + Sync {
    fn get(&self, key: &Digest) -> BackendResult<Option<Vec<u8>>>;
    fn put(&self, key: &Digest, bytes: &[u8], overwrite: bool) -> BackendResult<bool>;
    fn remove(&self, key: &Digest) -> BackendResult<bool>;

    /// Attribute name is used only for diagnostics; framework-level
    /// `read-only` wrapping is applied by the caller, not the backend.
    fn describe(&self) -> String;
}

/// Sharded key layout shared by file/http backends: `XX/YYYY...` where
/// `XX` is the digest's first two hex digits.
pub fn sharded_key(key: &Digest) -> String {
    let hex = key.to_hex();
    format!("{}/{}", &hex[..2], &hex[2..])
}

pub fn flat_key(key: &Digest) -> String {
    key.to_hex()
}

#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub connect: Duration,
    pub operation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect: Duration::from_secs(2),
            operation: Duration::from_secs(10),
        }
    }
}

/// A `read-only` remote turns `put`/`remove` into no-op successes
/// without ever reaching the underlying backend.
pub struct ReadOnlyBackend<B> {
    inner: B,
}

impl<B: RemoteBackend> ReadOnlyBackend<B> {
    pub fn new(inner: B) -> Self {
        ReadOnlyBackend { inner }
    }
}

impl<B: RemoteBackend> RemoteBackend for ReadOnlyBackend<B> {
    fn get(&self, key: &Digest) -> BackendResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, _key: &Digest, _bytes: &[u8], _overwrite: bool) -> BackendResult<bool> {
        Ok(true)
    }

    fn remove(&self, _key: &Digest) -> BackendResult<bool> {
        Ok(true)
    }

    fn describe(&self) -> String {
        format!("{} (read-only)", self.inner.describe())
    }
}

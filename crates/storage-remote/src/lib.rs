//! Pluggable remote cache backend abstraction. Backends are selected by
//! URL scheme (`file`, `http`/`https`, `redis`/`redis+unix`) and
//! dispatched through the `RemoteBackend` trait object rather than an
//! inheritance hierarchy.

pub mod backend;
pub mod file_backend;
pub mod http_backend;
pub mod redact;
pub mod redis_backend;

pub use backend::{BackendResult, Failure, FailureKind, ReadOnlyBackend, RemoteBackend, Timeouts};
pub use file_backend::{FileStorageBackend, Layout as FileLayout};
pub use http_backend::{HttpLayout, HttpStorageBackend};
pub use redis_backend::RedisStorageBackend;

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported remote storage URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("malformed remote storage URL: {0}")]
    Malformed(String),
    #[error("backend construction failed: {0}")]
    Backend(String),
}

/// Parses one entry of the space-separated `remote_storage` config
/// value and constructs the matching backend, applying `read-only` when
/// present as a query attribute.
pub fn build_backend(url_str: &str, timeouts: Timeouts) -> Result<Box<dyn RemoteBackend>, ConfigError> {
    let parsed = url::Url::parse(url_str).map_err(|e| ConfigError::Malformed(e.to_string()))?;
    let read_only = parsed.query_pairs().any(|(k, v)| k == "read-only" && v != "false" && v != "0");

    let backend: Box<dyn RemoteBackend> = match parsed.scheme() {
        "file" => {
            let layout = query_layout(&parsed, FileLayout::Flat);
            let update_mtime = parsed
                .query_pairs()
                .any(|(k, v)| k == "update-mtime" && (v == "true" || v == "1"));
            let path = parsed.to_file_path().map_err(|_| {
                ConfigError::Malformed(format!("file URL has no local path: {url_str}"))
            })?;
            Box::new(
                FileStorageBackend::new(path, layout, update_mtime)
                    .map_err(|e| ConfigError::Backend(e.to_string()))?,
            )
        }
        "http" | "https" => {
            let layout = query_http_layout(&parsed);
            let bearer = parsed
                .query_pairs()
                .find(|(k, _)| k == "bearer-token")
                .map(|(_, v)| v.to_string())
                .or_else(|| {
                    if parsed.password().is_some() {
                        None
                    } else if !parsed.username().is_empty() {
                        Some(parsed.username().to_string())
                    } else {
                        None
                    }
                });
            let mut base = parsed.clone();
            let _ = base.set_username("");
            let _ = base.set_password(None);
            base.set_query(None);
            Box::new(HttpStorageBackend::new(
                base.to_string(),
                layout,
                bearer,
                Vec::new(),
                timeouts,
            ))
        }
        "redis" | "redis+unix" => {
            let prefix = parsed
                .query_pairs()
                .find(|(k, _)| k == "key-prefix")
                .map(|(_, v)| v.to_string());
            Box::new(
                RedisStorageBackend::new(url_str, prefix, timeouts)
                    .map_err(|e| ConfigError::Backend(e.message))?,
            )
        }
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };

    if read_only {
        Ok(Box::new(ReadOnlyWrapper(backend)))
    } else {
        Ok(backend)
    }
}

fn query_layout(url: &url::Url, default: FileLayout) -> FileLayout {
    match url.query_pairs().find(|(k, _)| k == "layout") {
        Some((_, v)) if v == "subdirs" => FileLayout::Subdirs,
        Some((_, v)) if v == "flat" => FileLayout::Flat,
        _ => default,
    }
}

fn query_http_layout(url: &url::Url) -> HttpLayout {
    match url.query_pairs().find(|(k, _)| k == "layout") {
        Some((_, v)) if v == "bazel" => HttpLayout::Bazel,
        Some((_, v)) if v == "subdirs" => HttpLayout::Subdirs,
        _ => HttpLayout::Flat,
    }
}

/// Wraps a boxed backend the same way `ReadOnlyBackend<B>` wraps a
/// concrete one; needed because `build_backend` only has a trait object.
struct ReadOnlyWrapper(Box<dyn RemoteBackend>);

impl RemoteBackend for ReadOnlyWrapper {
    fn get(&self, key: &ccache_core::Digest) -> BackendResult<Option<Vec<u8>>> {
        self.0.get(key)
    }
    fn put(&self, _key: &ccache_core::Digest, _bytes: &[u8], _overwrite: bool) -> BackendResult<bool> {
        Ok(true)
    }
    fn remove(&self, _key: &ccache_core::Digest) -> BackendResult<bool> {
        Ok(true)
    }
    fn describe(&self) -> String {
        format!("{} (read-only)", self.0.describe())
    }
}

pub const DEFAULT_TIMEOUTS: Timeouts = Timeouts {
    connect: Duration::from_secs(2),
    operation: Duration::from_secs(10),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_file_backend_from_url() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        let backend = build_backend(&url, DEFAULT_TIMEOUTS).unwrap();
        assert!(backend.describe().starts_with("file:"));
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let err = build_backend("ftp://example/", DEFAULT_TIMEOUTS).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme(_)));
    }
}

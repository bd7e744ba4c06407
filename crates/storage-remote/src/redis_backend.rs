use crate::backend::{BackendResult, Failure, RemoteBackend, Timeouts};
use crate::redact::redact_url;
use ccache_core::Digest;
use redis::Commands;
use std::sync::Mutex;

const DEFAULT_KEY_PREFIX: &str = "ccache";

pub struct RedisStorageBackend {
    client: redis::Client,
    connection: Mutex<Option<redis::Connection>>,
    key_prefix: String,
    original_url: String,
    timeouts: Timeouts,
}

impl RedisStorageBackend {
    /// `url` accepts `redis://[user[:password]@]host[:port][/db]` and
    /// `redis+unix:///path/to/socket[?db=N]`, matching the original's
    /// two connection forms.
    pub fn new(url: &str, key_prefix: Option<String>, timeouts: Timeouts) -> BackendResult<Self> {
        let normalized = url.replacen("redis+unix://", "unix://", 1);
        let client = redis::Client::open(normalized.as_str())
            .map_err(|e| Failure::error(format!("invalid redis URL {}: {e}", redact_url(url))))?;
        Ok(RedisStorageBackend {
            client,
            connection: Mutex::new(None),
            key_prefix: key_prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            original_url: url.to_string(),
            timeouts,
        })
    }

    fn key_for(&self, key: &Digest) -> String {
        format!("{}:{}", self.key_prefix, key.to_hex())
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> BackendResult<T> {
        let mut guard = self.connection.lock().unwrap();
        if guard.is_none() {
            let conn = self
                .client
                .get_connection_with_timeout(self.timeouts.connect)
                .map_err(|e| classify(&e))?;
            *guard = Some(conn);
        }
        let conn = guard.as_mut().unwrap();
        match f(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                // A broken connection is dropped so the next call
                // reconnects rather than reusing a dead socket.
                *guard = None;
                Err(classify(&e))
            }
        }
    }
}

fn classify(err: &redis::RedisError) -> Failure {
    if err.is_timeout() {
        Failure::timeout(err.to_string())
    } else {
        Failure::error(err.to_string())
    }
}

impl RemoteBackend for RedisStorageBackend {
    fn get(&self, key: &Digest) -> BackendResult<Option<Vec<u8>>> {
        let redis_key = self.key_for(key);
        self.with_connection(|conn| conn.get::<_, Option<Vec<u8>>>(&redis_key))
    }

    fn put(&self, key: &Digest, bytes: &[u8], overwrite: bool) -> BackendResult<bool> {
        let redis_key = self.key_for(key);
        if !overwrite {
            let exists: bool = self.with_connection(|conn| conn.exists(&redis_key))?;
            if exists {
                return Ok(false);
            }
        }
        self.with_connection(|conn| conn.set::<_, _, ()>(&redis_key, bytes))?;
        Ok(true)
    }

    fn remove(&self, key: &Digest) -> BackendResult<bool> {
        let redis_key = self.key_for(key);
        let deleted: i64 = self.with_connection(|conn| conn.del(&redis_key))?;
        Ok(deleted > 0)
    }

    fn describe(&self) -> String {
        redact_url(&self.original_url)
    }
}

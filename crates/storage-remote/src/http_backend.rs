use crate::backend::{flat_key, sharded_key, BackendResult, Failure, RemoteBackend, Timeouts};
use crate::redact::redact_url;
use ccache_core::Digest;
use std::io::Read;
use std::time::Duration;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HttpLayout {
    Bazel,
    Flat,
    Subdirs,
}

pub struct HttpStorageBackend {
    base_url: String,
    layout: HttpLayout,
    bearer_token: Option<String>,
    extra_headers: Vec<(String, String)>,
    agent: ureq::Agent,
}

impl HttpStorageBackend {
    pub fn new(
        base_url: impl Into<String>,
        layout: HttpLayout,
        bearer_token: Option<String>,
        extra_headers: Vec<(String, String)>,
        timeouts: Timeouts,
    ) -> Self {
        let config = ureq::config::Config::builder()
            .timeout_connect(Some(timeouts.connect))
            .timeout_global(Some(timeouts.operation))
            .build();
        HttpStorageBackend {
            base_url: base_url.into(),
            layout,
            bearer_token,
            extra_headers,
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn url_for(&self, key: &Digest) -> String {
        let rel = match self.layout {
            HttpLayout::Flat => flat_key(key),
            HttpLayout::Subdirs | HttpLayout::Bazel => sharded_key(key),
        };
        format!("{}/{}", self.base_url.trim_end_matches('/'), rel)
    }

    fn apply_auth<'a>(&self, mut req: ureq::RequestBuilder<'a>) -> ureq::RequestBuilder<'a> {
        if let Some(token) = &self.bearer_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        for (name, value) in &self.extra_headers {
            req = req.header(name, value);
        }
        req
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn classify_transport_error(err: &ureq::Error) -> Failure {
    let message = err.to_string();
    if message.to_lowercase().contains("timed out") || message.to_lowercase().contains("timeout") {
        Failure::timeout(message)
    } else {
        Failure::error(message)
    }
}

impl RemoteBackend for HttpStorageBackend {
    fn get(&self, key: &Digest) -> BackendResult<Option<Vec<u8>>> {
        let url = self.url_for(key);
        let req = self.apply_auth(self.agent.get(&url));
        match req.call() {
            Ok(mut response) => {
                if response.status() == 404 {
                    return Ok(None);
                }
                if !is_success(response.status().into()) {
                    return Err(Failure::error(format!(
                        "GET {} returned {}",
                        redact_url(&url),
                        response.status()
                    )));
                }
                let mut bytes = Vec::new();
                response
                    .body_mut()
                    .as_reader()
                    .read_to_end(&mut bytes)
                    .map_err(|e| Failure::error(e.to_string()))?;
                Ok(Some(bytes))
            }
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(e) => Err(classify_transport_error(&e)),
        }
    }

    fn put(&self, key: &Digest, bytes: &[u8], overwrite: bool) -> BackendResult<bool> {
        let url = self.url_for(key);

        if !overwrite {
            let head = self.apply_auth(self.agent.head(&url));
            if let Ok(response) = head.call() {
                if is_success(response.status().into()) {
                    return Ok(false);
                }
            }
        }

        let req = self.apply_auth(self.agent.put(&url));
        match req
            .content_type("application/octet-stream")
            .send(bytes)
        {
            Ok(response) => Ok(is_success(response.status().into())),
            Err(e) => Err(classify_transport_error(&e)),
        }
    }

    fn remove(&self, key: &Digest) -> BackendResult<bool> {
        let url = self.url_for(key);
        let req = self.apply_auth(self.agent.delete(&url));
        match req.call() {
            Ok(response) => Ok(is_success(response.status().into())),
            Err(ureq::Error::StatusCode(404)) => Ok(false),
            Err(e) => Err(classify_transport_error(&e)),
        }
    }

    fn describe(&self) -> String {
        redact_url(&self.base_url)
    }
}

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

//! Configuration: every key `foo_bar` is settable via environment
//! variable `CCACHE_FOO_BAR`; `-o key=val` on the command line applies
//! an ephemeral override on top for the current invocation only.

use directories_next::ProjectDirs;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub base_dir: Option<PathBuf>,
    pub compiler: Option<String>,
    pub compiler_check: Option<String>,
    pub compression: bool,
    pub compression_level: Option<i32>,
    pub direct_mode: bool,
    pub sloppiness: Vec<String>,
    pub hard_link: bool,
    pub max_size: Option<u64>,
    pub max_files: Option<u64>,
    pub namespace: String,
    pub read_only: bool,
    pub read_only_direct: bool,
    pub recache: bool,
    pub remote_storage: Vec<String>,
    pub ignore_headers_in_manifest: bool,
    pub ignore_options: Vec<String>,
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.as_str(), "true" | "1"),
        Err(_) => default,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_i32(key: &str) -> Option<i32> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_list(key: &str) -> Vec<String> {
    env_string(key)
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn default_cache_dir() -> PathBuf {
    ProjectDirs::from("", "", "ccache")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".ccache"))
}

impl Config {
    pub fn load() -> Self {
        Config {
            cache_dir: env_string("CCACHE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_dir),
            base_dir: env_string("CCACHE_BASE_DIR").map(PathBuf::from),
            compiler: env_string("CCACHE_COMPILER"),
            compiler_check: env_string("CCACHE_COMPILER_CHECK"),
            compression: env_bool("CCACHE_COMPRESSION", true),
            compression_level: env_i32("CCACHE_COMPRESSION_LEVEL"),
            direct_mode: env_bool("CCACHE_DIRECT_MODE", true),
            sloppiness: env_list("CCACHE_SLOPPINESS"),
            hard_link: env_bool("CCACHE_HARD_LINK", false),
            max_size: env_u64("CCACHE_MAX_SIZE"),
            max_files: env_u64("CCACHE_MAX_FILES"),
            namespace: env_string("CCACHE_NAMESPACE").unwrap_or_default(),
            read_only: env_bool("CCACHE_READ_ONLY", false),
            read_only_direct: env_bool("CCACHE_READ_ONLY_DIRECT", false),
            recache: env_bool("CCACHE_RECACHE", false),
            remote_storage: env_string("CCACHE_REMOTE_STORAGE")
                .map(|v| v.split_whitespace().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
            ignore_headers_in_manifest: env_bool("CCACHE_IGNORE_HEADERS_IN_MANIFEST", false),
            ignore_options: env_list("CCACHE_IGNORE_OPTIONS"),
        }
    }

    /// Applies `-o key=val` ephemeral overrides parsed from the CLI,
    /// scoped to the current invocation only (never written back to
    /// any persisted configuration file).
    pub fn apply_overrides(&mut self, overrides: &[String]) {
        for entry in overrides {
            let Some((key, val)) = entry.split_once('=') else {
                log::warn!("ignoring malformed -o override: {entry}");
                continue;
            };
            match key {
                "compression" => self.compression = matches!(val, "true" | "1"),
                "compression_level" => {
                    if let Ok(level) = val.parse() {
                        self.compression_level = Some(level);
                    }
                }
                "direct_mode" => self.direct_mode = matches!(val, "true" | "1"),
                "hard_link" => self.hard_link = matches!(val, "true" | "1"),
                "max_size" => self.max_size = val.parse().ok(),
                "max_files" => self.max_files = val.parse().ok(),
                "namespace" => self.namespace = val.to_string(),
                "read_only" => self.read_only = matches!(val, "true" | "1"),
                "read_only_direct" => self.read_only_direct = matches!(val, "true" | "1"),
                "recache" => self.recache = matches!(val, "true" | "1"),
                "remote_storage" => {
                    self.remote_storage = val.split_whitespace().map(|s| s.to_string()).collect();
                }
                "sloppiness" => {
                    self.sloppiness = val.split(',').map(|s| s.trim().to_string()).collect();
                }
                "ignore_options" => {
                    self.ignore_options = val.split(',').map(|s| s.trim().to_string()).collect();
                }
                other => log::warn!("unrecognised -o key: {other}"),
            }
        }
    }

    pub fn is_sloppy(&self, flag: &str) -> bool {
        self.sloppiness.iter().any(|s| s == flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_parses_known_keys() {
        let mut config = Config {
            cache_dir: PathBuf::from("/tmp/c"),
            base_dir: None,
            compiler: None,
            compiler_check: None,
            compression: true,
            compression_level: None,
            direct_mode: true,
            sloppiness: Vec::new(),
            hard_link: false,
            max_size: None,
            max_files: None,
            namespace: String::new(),
            read_only: false,
            read_only_direct: false,
            recache: false,
            remote_storage: Vec::new(),
            ignore_headers_in_manifest: false,
            ignore_options: Vec::new(),
        };
        config.apply_overrides(&["compression_level=5".to_string(), "direct_mode=false".to_string()]);
        assert_eq!(config.compression_level, Some(5));
        assert!(!config.direct_mode);
    }
}

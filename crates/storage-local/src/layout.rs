pub use ccache_core::cachedir::CACHEDIR_TAG_CONTENTS;
use ccache_core::Digest;
use std::path::{Path, PathBuf};

/// Canonical on-disk path for a cache entry: `<root>/<H[0]>/<H[1]>/<H[2:]><suffix>`.
pub fn entry_path(root: &Path, key: &Digest, suffix: &str) -> PathBuf {
    let hex = key.to_hex();
    let (a, b) = key.shard_prefix();
    root.join(a.to_string())
        .join(b.to_string())
        .join(format!("{}{}", &hex[2..], suffix))
}

/// Directory holding one second-level shard, e.g. `<root>/3/f`.
pub fn shard_dir(root: &Path, first: char, second: char) -> PathBuf {
    root.join(first.to_string()).join(second.to_string())
}

pub fn stats_file_path(shard: &Path) -> PathBuf {
    shard.join("stats")
}

pub fn all_shards() -> Vec<(char, char)> {
    const HEX: &[char] = &[
        '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
    ];
    let mut shards = Vec::with_capacity(256);
    for &a in HEX {
        for &b in HEX {
            shards.push((a, b));
        }
    }
    shards
}

pub fn ensure_shard_dirs(root: &Path) -> std::io::Result<()> {
    for (a, b) in all_shards() {
        std::fs::create_dir_all(shard_dir(root, a, b))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_path_shards_on_first_two_hex_digits() {
        let root = Path::new("/cache");
        let mut bytes = [0u8; 20];
        bytes[0] = 0x3f;
        let key = Digest::from_bytes(bytes);
        let path = entry_path(root, &key, "M");
        assert!(path.starts_with("/cache/3/f"));
        assert!(path.to_string_lossy().ends_with('M'));
    }
}

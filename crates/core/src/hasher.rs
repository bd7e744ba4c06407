use crate::digest::Digest;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Fixed 8-byte magic injected before every delimited section, so that
/// `{-I -O2}` and `{-I-O2}` can never collide once each semantic category
/// is delimited before being hashed.
const HASH_DELIMITER: [u8; 8] = [0, b'c', b'C', b'a', b'C', b'h', b'E', 0];

/// Streaming BLAKE3 hasher truncated to 20 bytes, the cache's digest size.
///
/// `update` combines raw bytes; `delimit` is the *only* sanctioned way to
/// mix heterogeneous input categories into one digest. Callers must call
/// `delimit` before each semantic category (arguments, source contents,
/// environment, …).
pub struct Hasher {
    inner: blake3::Hasher,
}

impl Hasher {
    pub fn new() -> Self {
        Hasher {
            inner: blake3::Hasher::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    pub fn update_i64(&mut self, value: i64) -> &mut Self {
        self.inner.update(&value.to_le_bytes());
        self
    }

    /// Injects the delimiter magic, the tag bytes, and a terminating NUL.
    pub fn delimit(&mut self, tag: &str) -> &mut Self {
        self.inner.update(&HASH_DELIMITER);
        self.inner.update(tag.as_bytes());
        self.inner.update(&[0]);
        self
    }

    pub fn hash_file(&mut self, path: &Path) -> io::Result<&mut Self> {
        let mut file = File::open(path)?;
        self.hash_reader(&mut file)?;
        Ok(self)
    }

    pub fn hash_reader<R: Read>(&mut self, reader: &mut R) -> io::Result<&mut Self> {
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.inner.update(&buf[..n]);
        }
        Ok(self)
    }

    /// Finalizes into the cache's 20-byte digest size, via BLAKE3's
    /// extendable output rather than truncating the default 32-byte hash.
    pub fn digest(&self) -> Digest {
        let mut xof = self.inner.finalize_xof();
        let mut bytes = [0u8; Digest::SIZE];
        xof.fill(&mut bytes);
        Digest::from_bytes(bytes)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn delimited_inputs_do_not_collide() {
        let mut a = Hasher::new();
        a.delimit("args").update(b"-I").update(b"-O2");

        let mut b = Hasher::new();
        b.delimit("args").update(b"-I-O2");

        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn same_input_same_digest() {
        let mut a = Hasher::new();
        a.delimit("args").update(b"-I").update(b"-O2");

        let mut b = Hasher::new();
        b.delimit("args").update(b"-I").update(b"-O2");

        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn hash_file_matches_in_memory_hash() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"int main(void){return 0;}").unwrap();
        tmp.flush().unwrap();

        let mut from_file = Hasher::new();
        from_file.delimit("sourcefile").hash_file(tmp.path()).unwrap();

        let mut from_mem = Hasher::new();
        from_mem
            .delimit("sourcefile")
            .update(b"int main(void){return 0;}");

        assert_eq!(from_file.digest(), from_mem.digest());
    }
}

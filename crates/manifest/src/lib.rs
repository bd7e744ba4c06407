//! Maps a direct-mode cache key to candidate preprocessed-mode (result)
//! keys, carrying enough file-identity information to judge whether a
//! given set of included files still matches a prior compilation.

use ccache_core::Digest;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Cap on the number of distinct included files a single manifest may
/// reference; exceeding it causes `add_result` to reject the insertion.
pub const MAX_FILES: usize = 1_000_000;
/// Cap on the number of result entries a single manifest may hold.
pub const MAX_RESULTS: usize = 100_000;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub index: u32,
    pub digest: Digest,
    pub size: u64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ResultEntry {
    pub file_info_indexes: Vec<u32>,
    pub result_key: Digest,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Manifest {
    files: Vec<String>,
    file_infos: Vec<FileInfo>,
    results: Vec<ResultEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
}

/// Everything `Manifest::lookup`/`add_result` need from the invocation:
/// the set of files the include-scanner already hashed this run, a stat
/// callback for the lenient-equality fallback, and whether
/// `file_stat_matches` sloppiness is enabled.
pub trait ManifestContext {
    /// Digest already computed this run for `path`, if the include
    /// scanner visited it (avoids re-hashing).
    fn included_digest(&self, path: &Path) -> Option<Digest>;
    fn stat(&self, path: &Path) -> Option<FileStat>;
    /// `sloppiness=file_stat_matches`: accept stat equality in lieu of a
    /// content digest when no fresher digest is available.
    fn file_stat_matches_allowed(&self) -> bool;
    /// Last-resort: hash the file from disk. Returns `None` on I/O
    /// failure, which the caller (the orchestrator) treats as a bail to
    /// "no match", not a hard error.
    fn hash_file(&self, path: &Path) -> Option<Digest>;
}

impl Manifest {
    pub fn new() -> Self {
        Manifest::default()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    pub fn results_len(&self) -> usize {
        self.results.len()
    }

    pub fn files_len(&self) -> usize {
        self.files.len()
    }

    /// Iterates results most-recently-added first; a result *matches*
    /// when every referenced file_info is provably identical to the
    /// corresponding file on disk right now. Returns the first match's
    /// result key.
    pub fn lookup(&self, ctx: &dyn ManifestContext) -> Option<Digest> {
        for result in self.results.iter().rev() {
            if self.result_matches(result, ctx) {
                return Some(result.result_key);
            }
        }
        None
    }

    fn result_matches(&self, result: &ResultEntry, ctx: &dyn ManifestContext) -> bool {
        result
            .file_info_indexes
            .iter()
            .all(|&idx| match self.file_infos.get(idx as usize) {
                Some(info) => self.file_info_matches(info, ctx),
                None => false,
            })
    }

    fn file_info_matches(&self, info: &FileInfo, ctx: &dyn ManifestContext) -> bool {
        let path = match self.files.get(info.index as usize) {
            Some(p) => Path::new(p),
            None => return false,
        };

        if let Some(digest) = ctx.included_digest(path) {
            return digest == info.digest;
        }

        if ctx.file_stat_matches_allowed() {
            if let Some(stat) = ctx.stat(path) {
                if stat.size == info.size
                    && stat.mtime_ns == info.mtime_ns
                    && stat.ctime_ns == info.ctime_ns
                {
                    return true;
                }
            }
        }

        match ctx.hash_file(path) {
            Some(digest) => digest == info.digest,
            None => false,
        }
    }

    /// Inserts a new result entry referencing `included_files`,
    /// deduplicating against existing file/file_info entries. Returns
    /// `false` without mutating the manifest if inserting would exceed
    /// the file or result count caps.
    pub fn add_result(
        &mut self,
        result_key: Digest,
        included_files: &HashMap<PathBuf, (Digest, FileStat)>,
    ) -> bool {
        if self.results.len() >= MAX_RESULTS {
            log::warn!("manifest result cap ({MAX_RESULTS}) reached, refusing insert");
            return false;
        }

        let mut indexes = Vec::with_capacity(included_files.len());
        let mut new_files = Vec::new();
        let mut new_file_infos = Vec::new();

        for (path, (digest, stat)) in included_files {
            let path_str = path.to_string_lossy().to_string();
            let file_index = match self.files.iter().position(|f| f == &path_str) {
                Some(i) => i as u32,
                None => {
                    let i = (self.files.len() + new_files.len()) as u32;
                    new_files.push(path_str);
                    i
                }
            };

            let existing = self
                .file_infos
                .iter()
                .position(|fi| fi.index == file_index && fi.digest == *digest);
            let info_index = match existing {
                Some(i) => i as u32,
                None => {
                    let i = (self.file_infos.len() + new_file_infos.len()) as u32;
                    new_file_infos.push(FileInfo {
                        index: file_index,
                        digest: *digest,
                        size: stat.size,
                        mtime_ns: stat.mtime_ns,
                        ctime_ns: stat.ctime_ns,
                    });
                    i
                }
            };
            indexes.push(info_index);
        }

        if self.files.len() + new_files.len() > MAX_FILES {
            log::warn!("manifest file cap ({MAX_FILES}) reached, refusing insert");
            return false;
        }

        // `files` is kept in insertion order rather than sorted: indexes
        // recorded in `new_file_infos` above are only valid while
        // appending, not after a reorder. Two manifests built from the
        // same sequence of `add_result` calls still serialize identically,
        // which is all §4.5 requires.
        self.files.extend(new_files);
        self.file_infos.extend(new_file_infos);

        self.results.push(ResultEntry {
            file_info_indexes: indexes,
            result_key,
        });
        true
    }

    pub fn inspect(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("files: {}\n", self.files.len()));
        out.push_str(&format!("file_infos: {}\n", self.file_infos.len()));
        out.push_str(&format!("results: {}\n", self.results.len()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeContext {
        included: HashMap<PathBuf, Digest>,
        stats: HashMap<PathBuf, FileStat>,
        sloppy: bool,
        hash_calls: RefCell<u32>,
    }

    impl ManifestContext for FakeContext {
        fn included_digest(&self, path: &Path) -> Option<Digest> {
            self.included.get(path).copied()
        }
        fn stat(&self, path: &Path) -> Option<FileStat> {
            self.stats.get(path).copied()
        }
        fn file_stat_matches_allowed(&self) -> bool {
            self.sloppy
        }
        fn hash_file(&self, _path: &Path) -> Option<Digest> {
            *self.hash_calls.borrow_mut() += 1;
            None
        }
    }

    fn digest(byte: u8) -> Digest {
        Digest::from_bytes([byte; Digest::SIZE])
    }

    #[test]
    fn lookup_matches_when_included_digest_equals_stored() {
        let mut manifest = Manifest::new();
        let mut included = HashMap::new();
        let path = PathBuf::from("/src/foo.h");
        let stat = FileStat {
            size: 10,
            mtime_ns: 1,
            ctime_ns: 1,
        };
        included.insert(path.clone(), (digest(1), stat));
        assert!(manifest.add_result(digest(9), &included));

        let ctx = FakeContext {
            included: [(path.clone(), digest(1))].into_iter().collect(),
            stats: HashMap::new(),
            sloppy: false,
            hash_calls: RefCell::new(0),
        };
        assert_eq!(manifest.lookup(&ctx), Some(digest(9)));
    }

    #[test]
    fn lookup_misses_when_digest_differs() {
        let mut manifest = Manifest::new();
        let mut included = HashMap::new();
        let path = PathBuf::from("/src/foo.h");
        let stat = FileStat {
            size: 10,
            mtime_ns: 1,
            ctime_ns: 1,
        };
        included.insert(path.clone(), (digest(1), stat));
        manifest.add_result(digest(9), &included);

        let ctx = FakeContext {
            included: [(path, digest(2))].into_iter().collect(),
            stats: HashMap::new(),
            sloppy: false,
            hash_calls: RefCell::new(0),
        };
        assert_eq!(manifest.lookup(&ctx), None);
    }

    #[test]
    fn lookup_falls_back_to_stat_when_sloppy() {
        let mut manifest = Manifest::new();
        let mut included = HashMap::new();
        let path = PathBuf::from("/src/foo.h");
        let stat = FileStat {
            size: 10,
            mtime_ns: 1,
            ctime_ns: 1,
        };
        included.insert(path.clone(), (digest(1), stat));
        manifest.add_result(digest(9), &included);

        let ctx = FakeContext {
            included: HashMap::new(),
            stats: [(path, stat)].into_iter().collect(),
            sloppy: true,
            hash_calls: RefCell::new(0),
        };
        assert_eq!(manifest.lookup(&ctx), Some(digest(9)));
        assert_eq!(*ctx.hash_calls.borrow(), 0);
    }

    #[test]
    fn lookup_returns_most_recent_match_first() {
        let mut manifest = Manifest::new();
        let mut included = HashMap::new();
        let path = PathBuf::from("/src/foo.h");
        let stat = FileStat {
            size: 10,
            mtime_ns: 1,
            ctime_ns: 1,
        };
        included.insert(path.clone(), (digest(1), stat));
        manifest.add_result(digest(9), &included);
        manifest.add_result(digest(10), &included);

        let ctx = FakeContext {
            included: [(path, digest(1))].into_iter().collect(),
            stats: HashMap::new(),
            sloppy: false,
            hash_calls: RefCell::new(0),
        };
        assert_eq!(manifest.lookup(&ctx), Some(digest(10)));
    }

    #[test]
    fn bytes_round_trip() {
        let mut manifest = Manifest::new();
        let mut included = HashMap::new();
        included.insert(
            PathBuf::from("/a.h"),
            (
                digest(3),
                FileStat {
                    size: 1,
                    mtime_ns: 2,
                    ctime_ns: 3,
                },
            ),
        );
        manifest.add_result(digest(5), &included);

        let bytes = manifest.to_bytes().unwrap();
        let parsed = Manifest::from_bytes(&bytes).unwrap();
        assert_eq!(manifest, parsed);
    }
}

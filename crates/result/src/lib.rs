//! Bundles the output artifacts of a single compile (object file,
//! dependency file, diagnostics, …) and retrieves them back onto disk or
//! into the invoking process's stdout/stderr streams.

use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const RESULT_FORMAT_VERSION: u8 = 1;

/// Closed enum of artifact kinds a compile may produce. Closed
/// deliberately: adding a new kind means a new variant here, not an
/// open-ended string tag.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    Object,
    Dependency,
    StderrOutput,
    StdoutOutput,
    CoverageUnmangled,
    CoverageMangled,
    StackUsage,
    Diagnostic,
    DwarfObject,
    AssemblerListing,
    IncludedPchFile,
    CallgraphInfo,
    IpaClones,
}

impl FileType {
    /// Suffix used by the `Extractor` when writing
    /// `ccache-result<suffix>` files for manual inspection.
    pub fn extractor_suffix(self) -> &'static str {
        match self {
            FileType::Object => ".o",
            FileType::Dependency => ".d",
            FileType::StderrOutput => ".stderr.txt",
            FileType::StdoutOutput => ".stdout.txt",
            FileType::CoverageUnmangled => ".gcno",
            FileType::CoverageMangled => ".gcno-mangled",
            FileType::StackUsage => ".su",
            FileType::Diagnostic => ".dia",
            FileType::DwarfObject => ".dwo",
            FileType::AssemblerListing => ".s",
            FileType::IncludedPchFile => ".gch",
            FileType::CallgraphInfo => ".ci",
            FileType::IpaClones => ".ipa-clones",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
enum Record {
    Embedded {
        file_number: u8,
        file_type: FileType,
        bytes: Vec<u8>,
    },
    Raw {
        file_number: u8,
        file_type: FileType,
        size: u64,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
struct ResultBundle {
    version: u8,
    records: Vec<Record>,
}

/// Builds a result bundle by accumulating embedded or raw records.
#[derive(Default)]
pub struct Serializer {
    bundle: ResultBundle,
    next_file_number: u8,
}

impl Serializer {
    pub fn new() -> Self {
        Serializer {
            bundle: ResultBundle {
                version: RESULT_FORMAT_VERSION,
                records: Vec::new(),
            },
            next_file_number: 0,
        }
    }

    /// Stores `bytes` inline in the result bundle itself.
    pub fn add_embedded(&mut self, file_type: FileType, bytes: Vec<u8>) -> u8 {
        let n = self.alloc_file_number();
        self.bundle.records.push(Record::Embedded {
            file_number: n,
            file_type,
            bytes,
        });
        n
    }

    /// Records that `size` bytes live in a sibling raw file
    /// (`<key>.<file_number>R`) rather than inline; used for large
    /// object files when hard-linking is permitted.
    pub fn add_raw(&mut self, file_type: FileType, size: u64) -> u8 {
        let n = self.alloc_file_number();
        self.bundle.records.push(Record::Raw {
            file_number: n,
            file_type,
            size,
        });
        n
    }

    fn alloc_file_number(&mut self) -> u8 {
        let n = self.next_file_number;
        self.next_file_number = self.next_file_number.wrapping_add(1);
        n
    }

    pub fn is_empty(&self) -> bool {
        self.bundle.records.is_empty()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(&self.bundle)
    }
}

/// Callback surface a `Deserializer` drives while walking a bundle.
pub trait ResultVisitor {
    fn on_embedded(&mut self, file_number: u8, file_type: FileType, bytes: &[u8]) -> io::Result<()>;
    fn on_raw(&mut self, file_number: u8, file_type: FileType, size: u64) -> io::Result<()>;
}

pub struct Deserializer;

impl Deserializer {
    pub fn visit(bytes: &[u8], visitor: &mut dyn ResultVisitor) -> Result<(), WriteError> {
        let bundle: ResultBundle = postcard::from_bytes(bytes).map_err(WriteError::Decode)?;
        for record in bundle.records {
            match record {
                Record::Embedded {
                    file_number,
                    file_type,
                    bytes,
                } => visitor
                    .on_embedded(file_number, file_type, &bytes)
                    .map_err(WriteError::Io)?,
                Record::Raw {
                    file_number,
                    file_type,
                    size,
                } => visitor
                    .on_raw(file_number, file_type, size)
                    .map_err(WriteError::Io)?,
            }
        }
        Ok(())
    }
}

/// A raw record only carries a size; this supplies the actual bytes, a
/// source file path to copy/hard-link from (owned by the local store).
pub trait RawSource {
    fn raw_path(&self, file_number: u8) -> Option<PathBuf>;
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("failed to decode result bundle: {0}")]
    Decode(postcard::Error),
    #[error("I/O error while materializing result: {0}")]
    Io(#[from] io::Error),
}

/// Writes every record to `<out_dir>/ccache-result<suffix>`, for manual
/// inspection (`ccache --inspect` style tooling), ignoring the
/// invocation's actual requested output paths.
pub struct Extractor<'a> {
    out_dir: PathBuf,
    raw_source: &'a dyn RawSource,
}

impl<'a> Extractor<'a> {
    pub fn new(out_dir: impl Into<PathBuf>, raw_source: &'a dyn RawSource) -> Self {
        Extractor {
            out_dir: out_dir.into(),
            raw_source,
        }
    }

    fn dest_path(&self, file_type: FileType) -> PathBuf {
        self.out_dir
            .join(format!("ccache-result{}", file_type.extractor_suffix()))
    }
}

impl<'a> ResultVisitor for Extractor<'a> {
    fn on_embedded(&mut self, _file_number: u8, file_type: FileType, bytes: &[u8]) -> io::Result<()> {
        fs::write(self.dest_path(file_type), bytes)
    }

    fn on_raw(&mut self, file_number: u8, file_type: FileType, _size: u64) -> io::Result<()> {
        let src = self
            .raw_source
            .raw_path(file_number)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "raw file missing"))?;
        ccache_core::atomic::clone_hard_link_or_copy_file(&src, &self.dest_path(file_type), true)
    }
}

/// Where each `FileType` should actually land for a real invocation,
/// plus the handful of behaviours (dependency-file target rewriting,
/// streamed stdout/stderr) that depend on invocation context rather
/// than just a destination path.
pub struct RetrieverContext<'a> {
    pub destinations: std::collections::HashMap<FileType, PathBuf>,
    pub raw_source: &'a dyn RawSource,
    /// If the dependency file's leading target differs from this, the
    /// leading target name is rewritten before the first colon.
    pub requested_dep_target: Option<String>,
    pub strip_ansi: bool,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
}

pub struct Retriever<'a, 'b> {
    ctx: &'a mut RetrieverContext<'b>,
}

impl<'a, 'b> Retriever<'a, 'b> {
    pub fn new(ctx: &'a mut RetrieverContext<'b>) -> Self {
        Retriever { ctx }
    }

    fn maybe_strip_ansi(&self, bytes: &[u8]) -> Vec<u8> {
        if !self.ctx.strip_ansi {
            return bytes.to_vec();
        }
        strip_ansi_csi(bytes)
    }

    fn write_dependency_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(bytes);
        let rewritten = match &self.ctx.requested_dep_target {
            Some(target) => rewrite_dep_target(&text, target),
            None => text.to_string(),
        };
        fs::write(path, rewritten.as_bytes())
    }
}

impl<'a, 'b> ResultVisitor for Retriever<'a, 'b> {
    fn on_embedded(&mut self, _file_number: u8, file_type: FileType, bytes: &[u8]) -> io::Result<()> {
        match file_type {
            FileType::StdoutOutput => {
                self.ctx.stdout.write_all(&self.maybe_strip_ansi(bytes))
            }
            FileType::StderrOutput => {
                self.ctx.stderr.write_all(&self.maybe_strip_ansi(bytes))
            }
            FileType::Dependency => match self.ctx.destinations.get(&file_type) {
                Some(path) => self.write_dependency_file(path, bytes),
                None => Ok(()),
            },
            other => match self.ctx.destinations.get(&other) {
                Some(path) => fs::write(path, bytes),
                None => Ok(()),
            },
        }
    }

    fn on_raw(&mut self, file_number: u8, file_type: FileType, _size: u64) -> io::Result<()> {
        let dest = match self.ctx.destinations.get(&file_type) {
            Some(p) => p.clone(),
            None => return Ok(()),
        };
        let src = self
            .ctx
            .raw_source
            .raw_path(file_number)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "raw file missing"))?;
        ccache_core::atomic::clone_hard_link_or_copy_file(&src, &dest, true)
    }
}

/// Strips ANSI CSI escape sequences (`ESC [ ... letter`), used when a
/// consumer of diagnostics cannot render colour.
fn strip_ansi_csi(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'[') {
            let mut j = i + 2;
            while j < bytes.len() && !bytes[j].is_ascii_alphabetic() {
                j += 1;
            }
            i = (j + 1).min(bytes.len());
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

/// Rewrites the leading target name of a Makefile-style dependency file
/// (everything before the first colon) to `new_target`, if it differs.
fn rewrite_dep_target(text: &str, new_target: &str) -> String {
    match text.find(':') {
        Some(colon) => {
            let existing_target = text[..colon].trim();
            if existing_target == new_target {
                text.to_string()
            } else {
                format!("{}{}", new_target, &text[colon..])
            }
        }
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct NoRawFiles;
    impl RawSource for NoRawFiles {
        fn raw_path(&self, _file_number: u8) -> Option<PathBuf> {
            None
        }
    }

    #[test]
    fn serializer_round_trips_embedded_records() {
        let mut s = Serializer::new();
        s.add_embedded(FileType::Object, vec![1, 2, 3]);
        s.add_embedded(FileType::Dependency, b"foo.o: foo.c\n".to_vec());
        let bytes = s.serialize().unwrap();

        struct Collector(Vec<(FileType, Vec<u8>)>);
        impl ResultVisitor for Collector {
            fn on_embedded(&mut self, _n: u8, t: FileType, b: &[u8]) -> io::Result<()> {
                self.0.push((t, b.to_vec()));
                Ok(())
            }
            fn on_raw(&mut self, _n: u8, _t: FileType, _s: u64) -> io::Result<()> {
                Ok(())
            }
        }
        let mut collector = Collector(Vec::new());
        Deserializer::visit(&bytes, &mut collector).unwrap();
        assert_eq!(collector.0.len(), 2);
        assert_eq!(collector.0[0].0, FileType::Object);
    }

    #[test]
    fn extractor_writes_embedded_bytes_to_suffixed_file() {
        let dir = tempfile::tempdir().unwrap();
        let no_raw = NoRawFiles;
        let mut extractor = Extractor::new(dir.path(), &no_raw);
        extractor
            .on_embedded(0, FileType::Object, b"object bytes")
            .unwrap();
        let contents = fs::read(dir.path().join("ccache-result.o")).unwrap();
        assert_eq!(contents, b"object bytes");
    }

    #[test]
    fn dependency_target_is_rewritten_when_different() {
        let rewritten = rewrite_dep_target("old.o: foo.c bar.h\n", "new.o");
        assert_eq!(rewritten, "new.o: foo.c bar.h\n");
    }

    #[test]
    fn dependency_target_left_alone_when_same() {
        let text = "new.o: foo.c\n";
        assert_eq!(rewrite_dep_target(text, "new.o"), text);
    }

    #[test]
    fn strip_ansi_removes_csi_sequences() {
        let input = b"\x1b[31merror\x1b[0m: bad";
        let out = strip_ansi_csi(input);
        assert_eq!(out, b"error: bad");
    }

    #[test]
    fn retriever_routes_stdout_and_object_separately() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut destinations = HashMap::new();
        let dir = tempfile::tempdir().unwrap();
        destinations.insert(FileType::Object, dir.path().join("out.o"));
        let no_raw = NoRawFiles;
        let mut ctx = RetrieverContext {
            destinations,
            raw_source: &no_raw,
            requested_dep_target: None,
            strip_ansi: false,
            stdout: &mut stdout,
            stderr: &mut stderr,
        };
        let mut retriever = Retriever::new(&mut ctx);
        retriever
            .on_embedded(0, FileType::StdoutOutput, b"built ok\n")
            .unwrap();
        retriever.on_embedded(1, FileType::Object, b"OBJ").unwrap();
        assert_eq!(stdout, b"built ok\n");
        assert_eq!(fs::read(dir.path().join("out.o")).unwrap(), b"OBJ");
    }
}

//! Drives a single compiler invocation through the lookup/compile/store
//! state machine: `ARGS_PARSED -> PREFIX_HASHED -> {DIRECT_KEY_COMPUTED,
//! PREPROCESSING} -> ... -> WRITE_ENTRIES -> EMIT_AND_EXIT`.
//!
//! Argument classification and `#include` dependency scanning are
//! deliberately out of scope here; they are supplied by the caller as
//! trait objects so this crate stays agnostic to any one compiler's
//! command-line dialect.

use ccache_core::stats::Statistic;
use ccache_core::Digest;
use ccache_fingerprint::{
    compute_direct_key, compute_prefix_hash, compute_preprocessed_key, CompilerCheck,
    DirectModeOutcome, FileStat as InodeFileStat, IncludeDependency, InodeCache, PrefixInputs,
};
use ccache_manifest::{FileStat as ManifestFileStat, Manifest, ManifestContext};
use ccache_result::{
    Deserializer, FileType, RawSource, Retriever, RetrieverContext, Serializer, WriteError,
};
use ccache_storage::{Overwrite, StorageFacade, MANIFEST_SUFFIX, RESULT_SUFFIX};
use ccache_storage_local::LocalStore;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("running compiler or deriving a cache key: {0}")]
    Io(#[from] io::Error),
    #[error("decoding cached result: {0}")]
    Result(#[from] WriteError),
    #[error("encoding manifest or result: {0}")]
    Encode(#[from] postcard::Error),
}

pub struct ProcessOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

pub trait CompilerRunner {
    fn run(&self, args: &[String]) -> io::Result<ProcessOutput>;
}

/// Spawns the real compiler via `std::process::Command`, tracking its
/// pid so the signal handler can forward termination to it.
pub struct SystemCompilerRunner {
    pub compiler: PathBuf,
}

impl CompilerRunner for SystemCompilerRunner {
    fn run(&self, args: &[String]) -> io::Result<ProcessOutput> {
        let child = std::process::Command::new(&self.compiler)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        crate::signal::set_compiler_pid(child.id() as i32);
        let result = child.wait_with_output();
        crate::signal::clear_compiler_pid();
        let output = result?;
        Ok(ProcessOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

pub trait IncludeScanner {
    fn scan(&self, source: &Path, compile_args: &[String]) -> io::Result<Vec<IncludeDependency>>;
}

/// What the argument-parser collaborator decided about one invocation.
pub enum Classification {
    /// Not cacheable (link step, `-E` only, output to `/dev/null`, …).
    Uncached {
        reason: &'static str,
        passthrough_args: Vec<String>,
    },
    Cacheable(CacheableInvocation),
}

pub struct CacheableInvocation {
    pub source_file: PathBuf,
    pub output_file: PathBuf,
    /// Arguments mixed into the common prefix hash (already filtered to
    /// the "affects output" semantic class by the classifier).
    pub hashed_args: Vec<String>,
    pub preprocessor_args: Vec<String>,
    pub compile_args: Vec<String>,
    pub direct_mode_eligible: bool,
    pub dep_target: Option<String>,
}

pub trait ArgumentClassifier {
    fn classify(&self, raw_args: &[String]) -> Classification;
}

pub struct PrefixConfig<'a> {
    pub ccache_version: &'a str,
    pub compiler_check: CompilerCheck,
    pub cc_name: &'a str,
    pub cwd: Option<PathBuf>,
    pub extra_files_to_hash: Vec<PathBuf>,
    pub ignore_options: Vec<String>,
    pub arch_mappings: Vec<(String, String)>,
}

pub struct Context<'a> {
    pub storage: &'a StorageFacade,
    pub inode_cache: &'a InodeCache,
    pub direct_mode_enabled: bool,
    pub hard_link: bool,
    pub sloppy_file_stat: bool,
    pub current_local_date: String,
    pub source_date_epoch: Option<String>,
    /// Forces a miss on both the direct and preprocessed lookup, then
    /// overwrites whatever was already stored (`CCACHE_RECACHE`/`-o
    /// recache=true`, spec.md §6).
    pub recache: bool,
    pub prefix: PrefixConfig<'a>,
}

#[derive(Debug)]
pub enum Outcome {
    DirectHit,
    PreprocessedHit,
    Miss { wrote_direct_entry: bool },
    Uncached { reason: String, status: i32 },
}

struct IncludeManifestContext<'a> {
    included: HashMap<PathBuf, Digest>,
    sloppy: bool,
    inode_cache: &'a InodeCache,
}

impl<'a> ManifestContext for IncludeManifestContext<'a> {
    fn included_digest(&self, path: &Path) -> Option<Digest> {
        self.included.get(path).copied()
    }

    fn stat(&self, path: &Path) -> Option<ManifestFileStat> {
        let s = ccache_fingerprint::stat_file(path)?;
        Some(ManifestFileStat {
            size: s.size,
            mtime_ns: s.mtime_ns,
            ctime_ns: s.ctime_ns,
        })
    }

    fn file_stat_matches_allowed(&self) -> bool {
        self.sloppy
    }

    fn hash_file(&self, path: &Path) -> Option<Digest> {
        if let Some(stat) = ccache_fingerprint::stat_file(path) {
            if let Some(digest) = self.inode_cache.lookup_digest(stat) {
                return Some(digest);
            }
            let mut hasher = ccache_core::Hasher::new();
            hasher.hash_file(path).ok()?;
            let digest = hasher.digest();
            self.inode_cache.insert_digest(stat, digest);
            return Some(digest);
        }
        let mut hasher = ccache_core::Hasher::new();
        hasher.hash_file(path).ok()?;
        Some(hasher.digest())
    }
}

/// Maps a raw result record's file number back to the sibling raw file
/// a hard-link-mode write placed next to the entry (`<key>.<n>R`),
/// independent of any remote mirroring since raw files are
/// local-store-only (hard-linking only makes sense against the local
/// filesystem the compiler itself will read from).
struct LocalRawSource<'a> {
    local: &'a LocalStore,
    key: Digest,
}

impl<'a> RawSource for LocalRawSource<'a> {
    fn raw_path(&self, file_number: u8) -> Option<PathBuf> {
        let path = self.local.get_raw_file_path(&self.key, file_number);
        path.exists().then_some(path)
    }
}

fn inode_stat_to_file_stat(s: InodeFileStat) -> ManifestFileStat {
    ManifestFileStat {
        size: s.size,
        mtime_ns: s.mtime_ns,
        ctime_ns: s.ctime_ns,
    }
}

/// Runs the real compiler with the invocation's original arguments and
/// streams its output straight through, for the uncached/passthrough path.
fn exec_uncached(
    runner: &dyn CompilerRunner,
    args: &[String],
    reason: &'static str,
    stat: Statistic,
    storage: &StorageFacade,
    key_for_stats: Option<&Digest>,
) -> Result<Outcome, OrchestratorError> {
    if let Some(key) = key_for_stats {
        let _ = storage.local().increment_stat(key, stat, 1);
    }
    let output = runner.run(args)?;
    io::stdout().write_all(&output.stdout).ok();
    io::stderr().write_all(&output.stderr).ok();
    Ok(Outcome::Uncached {
        reason: reason.to_string(),
        status: output.status,
    })
}

fn retrieve_and_emit(
    storage: &StorageFacade,
    result_key: &Digest,
    bytes: &[u8],
    invocation: &CacheableInvocation,
) -> Result<(), OrchestratorError> {
    let mut destinations = HashMap::new();
    destinations.insert(FileType::Object, invocation.output_file.clone());

    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let raw_source = LocalRawSource {
        local: storage.local(),
        key: *result_key,
    };
    let mut ctx = RetrieverContext {
        destinations,
        raw_source: &raw_source,
        requested_dep_target: invocation.dep_target.clone(),
        strip_ansi: false,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };
    let mut retriever = Retriever::new(&mut ctx);
    Deserializer::visit(bytes, &mut retriever)?;
    Ok(())
}

pub fn run(
    ctx: &Context,
    classifier: &dyn ArgumentClassifier,
    scanner: &dyn IncludeScanner,
    runner: &dyn CompilerRunner,
    raw_args: &[String],
) -> Result<Outcome, OrchestratorError> {
    let invocation = match classifier.classify(raw_args) {
        Classification::Uncached {
            reason,
            passthrough_args,
        } => {
            return exec_uncached(
                runner,
                &passthrough_args,
                reason,
                Statistic::BadCompilerArguments,
                ctx.storage,
                None,
            );
        }
        Classification::Cacheable(inv) => inv,
    };

    let prefix = compute_prefix_hash(&PrefixInputs {
        ccache_version: ctx.prefix.ccache_version,
        compiler_check: &ctx.prefix.compiler_check,
        cc_name: ctx.prefix.cc_name,
        cwd: ctx.prefix.cwd.as_deref(),
        extra_files_to_hash: &ctx.prefix.extra_files_to_hash,
        hashed_args: &invocation.hashed_args,
        ignore_options: &ctx.prefix.ignore_options,
        arch_mappings: &ctx.prefix.arch_mappings,
    })
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    let mut direct_key_and_files: Option<(Digest, HashMap<PathBuf, (Digest, ManifestFileStat)>)> =
        None;

    if ctx.direct_mode_enabled && invocation.direct_mode_eligible {
        let includes = scanner.scan(&invocation.source_file, &invocation.compile_args)?;

        let mut included_files: HashMap<PathBuf, (Digest, ManifestFileStat)> = HashMap::new();
        let mut included_digests: HashMap<PathBuf, Digest> = HashMap::new();
        for include in &includes {
            if let Some(stat) = ccache_fingerprint::stat_file(&include.path) {
                included_files.insert(
                    include.path.clone(),
                    (include.digest, inode_stat_to_file_stat(stat)),
                );
            }
            included_digests.insert(include.path.clone(), include.digest);
        }

        let outcome = compute_direct_key(
            prefix,
            &invocation.source_file,
            ctx.inode_cache,
            &[],
            &includes,
            &ctx.current_local_date,
            ctx.source_date_epoch.as_deref(),
        )
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        if let DirectModeOutcome::Key(direct_key) = outcome {
            let manifest_ctx = IncludeManifestContext {
                included: included_digests,
                sloppy: ctx.sloppy_file_stat,
                inode_cache: ctx.inode_cache,
            };

            if !ctx.recache {
                let manifest_bytes = ctx.storage.get(&direct_key, MANIFEST_SUFFIX);
                let existing_manifest = manifest_bytes
                    .as_deref()
                    .and_then(|b| Manifest::from_bytes(b).ok());

                if let Some(manifest) = &existing_manifest {
                    if let Some(result_key) = manifest.lookup(&manifest_ctx) {
                        if let Some(result_bytes) = ctx.storage.get(&result_key, RESULT_SUFFIX) {
                            let _ = ctx
                                .storage
                                .local()
                                .increment_stat(&direct_key, Statistic::DirectCacheHit, 1);
                            retrieve_and_emit(ctx.storage, &result_key, &result_bytes, &invocation)?;
                            return Ok(Outcome::DirectHit);
                        }
                    }
                }
            }

            let miss_stat = if ctx.recache {
                Statistic::Recache
            } else {
                Statistic::DirectCacheMiss
            };
            let _ = ctx.storage.local().increment_stat(&direct_key, miss_stat, 1);
            direct_key_and_files = Some((direct_key, included_files));
        }
        // `DirectModeOutcome::Disabled` (a `__TIME__` observation) falls
        // straight through to preprocessed-mode below, as §4.10 requires.
    }

    let preprocessed = runner.run(&invocation.preprocessor_args)?;
    if preprocessed.status != 0 {
        return exec_uncached(
            runner,
            &invocation.compile_args,
            "preprocessor_error",
            Statistic::PreprocessorError,
            ctx.storage,
            direct_key_and_files.as_ref().map(|(k, _)| k),
        );
    }

    let preprocessed_key = compute_preprocessed_key(prefix, &preprocessed.stdout);

    if !ctx.recache {
        if let Some(result_bytes) = ctx.storage.get(&preprocessed_key, RESULT_SUFFIX) {
            let _ = ctx
                .storage
                .local()
                .increment_stat(&preprocessed_key, Statistic::PreprocessedCacheHit, 1);
            retrieve_and_emit(ctx.storage, &preprocessed_key, &result_bytes, &invocation)?;
            return Ok(Outcome::PreprocessedHit);
        }
    }
    let preprocessed_miss_stat = if ctx.recache {
        Statistic::Recache
    } else {
        Statistic::PreprocessedCacheMiss
    };
    let _ = ctx
        .storage
        .local()
        .increment_stat(&preprocessed_key, preprocessed_miss_stat, 1);

    let compiled = runner.run(&invocation.compile_args)?;
    if compiled.status != 0 {
        io::stdout().write_all(&compiled.stdout).ok();
        io::stderr().write_all(&compiled.stderr).ok();
        let _ = ctx
            .storage
            .local()
            .increment_stat(&preprocessed_key, Statistic::CompileFailed, 1);
        return Ok(Outcome::Uncached {
            reason: "compile_failed".to_string(),
            status: compiled.status,
        });
    }

    let object_bytes = match std::fs::read(&invocation.output_file) {
        Ok(bytes) => bytes,
        Err(_) => {
            let _ = ctx
                .storage
                .local()
                .increment_stat(&preprocessed_key, Statistic::CompilerProducedNoOutput, 1);
            return Ok(Outcome::Uncached {
                reason: "compiler_produced_no_output".to_string(),
                status: compiled.status,
            });
        }
    };
    if object_bytes.is_empty() {
        let _ = ctx
            .storage
            .local()
            .increment_stat(&preprocessed_key, Statistic::CompilerProducedEmptyOutput, 1);
        return Ok(Outcome::Uncached {
            reason: "compiler_produced_empty_output".to_string(),
            status: compiled.status,
        });
    }

    let mut serializer = Serializer::new();
    // Hard-link mode stores the object file as a sibling raw file
    // instead of embedding it in the result bundle, so retrieval can
    // hard-link (or, failing that, copy) it straight into place rather
    // than rewriting it from bytes held in memory. Falls back to the
    // usual embedded record if the raw write itself fails (e.g. the
    // cache directory is on a different filesystem than expected).
    let stored_as_raw = ctx.hard_link
        && ctx
            .storage
            .local()
            .put_raw_file(&preprocessed_key, 0, &invocation.output_file)
            .is_ok();
    if stored_as_raw {
        serializer.add_raw(FileType::Object, object_bytes.len() as u64);
    } else {
        serializer.add_embedded(FileType::Object, object_bytes);
    }
    if !compiled.stdout.is_empty() {
        serializer.add_embedded(FileType::StdoutOutput, compiled.stdout);
    }
    if !compiled.stderr.is_empty() {
        serializer.add_embedded(FileType::StderrOutput, compiled.stderr);
    }
    let result_bytes = serializer.serialize()?;
    let result_overwrite = if ctx.recache { Overwrite::Yes } else { Overwrite::No };
    ctx.storage
        .put(&preprocessed_key, RESULT_SUFFIX, &result_bytes, result_overwrite);

    let mut wrote_direct_entry = false;
    if let Some((direct_key, included_files)) = direct_key_and_files {
        let manifest_bytes = ctx.storage.get(&direct_key, MANIFEST_SUFFIX);
        let mut manifest = manifest_bytes
            .as_deref()
            .and_then(|b| Manifest::from_bytes(b).ok())
            .unwrap_or_default();
        if manifest.add_result(preprocessed_key, &included_files) {
            let manifest_bytes = manifest.to_bytes()?;
            ctx.storage
                .put(&direct_key, MANIFEST_SUFFIX, &manifest_bytes, Overwrite::Yes);
            wrote_direct_entry = true;
        }
    }

    Ok(Outcome::Miss { wrote_direct_entry })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRunner {
        preprocessor_status: i32,
        preprocessed_stdout: Vec<u8>,
        compile_status: i32,
        object_contents: Vec<u8>,
        output_path: PathBuf,
    }

    impl CompilerRunner for FixedRunner {
        fn run(&self, args: &[String]) -> io::Result<ProcessOutput> {
            if args.iter().any(|a| a == "-E") {
                Ok(ProcessOutput {
                    status: self.preprocessor_status,
                    stdout: self.preprocessed_stdout.clone(),
                    stderr: Vec::new(),
                })
            } else {
                std::fs::write(&self.output_path, &self.object_contents)?;
                Ok(ProcessOutput {
                    status: self.compile_status,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                })
            }
        }
    }

    struct AlwaysCacheable {
        source: PathBuf,
        output: PathBuf,
    }

    impl ArgumentClassifier for AlwaysCacheable {
        fn classify(&self, _raw_args: &[String]) -> Classification {
            Classification::Cacheable(CacheableInvocation {
                source_file: self.source.clone(),
                output_file: self.output.clone(),
                hashed_args: vec!["-O2".to_string()],
                preprocessor_args: vec!["-E".to_string()],
                compile_args: vec!["-c".to_string()],
                direct_mode_eligible: false,
                dep_target: None,
            })
        }
    }

    struct NoIncludes;
    impl IncludeScanner for NoIncludes {
        fn scan(&self, _source: &Path, _args: &[String]) -> io::Result<Vec<IncludeDependency>> {
            Ok(Vec::new())
        }
    }

    fn test_context<'a>(storage: &'a StorageFacade, inode_cache: &'a InodeCache) -> Context<'a> {
        Context {
            storage,
            inode_cache,
            direct_mode_enabled: false,
            hard_link: false,
            sloppy_file_stat: false,
            current_local_date: "2026-07-27".to_string(),
            source_date_epoch: None,
            recache: false,
            prefix: PrefixConfig {
                ccache_version: "4.0",
                compiler_check: CompilerCheck::Opaque("v1".into()),
                cc_name: "cc",
                cwd: None,
                extra_files_to_hash: Vec::new(),
                ignore_options: Vec::new(),
                arch_mappings: Vec::new(),
            },
        }
    }

    #[test]
    fn preprocessed_miss_then_hit_on_second_invocation() {
        let local_dir = tempfile::tempdir().unwrap();
        let local = LocalStore::new(local_dir.path()).unwrap();
        let storage = StorageFacade::new(local, false, "", "4.0", None);
        let inode_cache = InodeCache::disabled();
        let ctx = test_context(&storage, &inode_cache);

        let src_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("foo.c");
        std::fs::write(&source, b"int main(void){return 0;}").unwrap();
        let output = src_dir.path().join("foo.o");

        let classifier = AlwaysCacheable {
            source: source.clone(),
            output: output.clone(),
        };
        let scanner = NoIncludes;
        let runner = FixedRunner {
            preprocessor_status: 0,
            preprocessed_stdout: b"int main(void){return 0;}".to_vec(),
            compile_status: 0,
            object_contents: b"fake object bytes".to_vec(),
            output_path: output.clone(),
        };

        let first = run(&ctx, &classifier, &scanner, &runner, &[]).unwrap();
        assert!(matches!(first, Outcome::Miss { .. }));

        std::fs::remove_file(&output).ok();
        let second = run(&ctx, &classifier, &scanner, &runner, &[]).unwrap();
        assert!(matches!(second, Outcome::PreprocessedHit));
        assert_eq!(std::fs::read(&output).unwrap(), b"fake object bytes");
    }

    #[test]
    fn preprocessor_failure_falls_back_to_uncached() {
        let local_dir = tempfile::tempdir().unwrap();
        let local = LocalStore::new(local_dir.path()).unwrap();
        let storage = StorageFacade::new(local, false, "", "4.0", None);
        let inode_cache = InodeCache::disabled();
        let ctx = test_context(&storage, &inode_cache);

        let src_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("foo.c");
        std::fs::write(&source, b"broken(").unwrap();
        let output = src_dir.path().join("foo.o");

        let classifier = AlwaysCacheable {
            source,
            output: output.clone(),
        };
        let scanner = NoIncludes;
        let runner = FixedRunner {
            preprocessor_status: 1,
            preprocessed_stdout: Vec::new(),
            compile_status: 0,
            object_contents: Vec::new(),
            output_path: output,
        };

        let outcome = run(&ctx, &classifier, &scanner, &runner, &[]).unwrap();
        match outcome {
            Outcome::Uncached { reason, .. } => assert_eq!(reason, "preprocessor_error"),
            other => panic!("expected Uncached, got {other:?}"),
        }
    }

    #[test]
    fn hard_link_mode_stores_and_retrieves_a_raw_object() {
        let local_dir = tempfile::tempdir().unwrap();
        let local = LocalStore::new(local_dir.path()).unwrap();
        let storage = StorageFacade::new(local, false, "", "4.0", None);
        let inode_cache = InodeCache::disabled();
        let mut ctx = test_context(&storage, &inode_cache);
        ctx.hard_link = true;

        let src_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("foo.c");
        std::fs::write(&source, b"int main(void){return 0;}").unwrap();
        let output = src_dir.path().join("foo.o");

        let classifier = AlwaysCacheable {
            source,
            output: output.clone(),
        };
        let scanner = NoIncludes;
        let runner = FixedRunner {
            preprocessor_status: 0,
            preprocessed_stdout: b"int main(void){return 0;}".to_vec(),
            compile_status: 0,
            object_contents: b"raw object bytes".to_vec(),
            output_path: output.clone(),
        };

        let first = run(&ctx, &classifier, &scanner, &runner, &[]).unwrap();
        assert!(matches!(first, Outcome::Miss { .. }));

        std::fs::remove_file(&output).ok();
        let second = run(&ctx, &classifier, &scanner, &runner, &[]).unwrap();
        assert!(matches!(second, Outcome::PreprocessedHit));
        assert_eq!(std::fs::read(&output).unwrap(), b"raw object bytes");
    }

    #[test]
    fn recache_forces_a_miss_and_overwrites_the_stored_entry() {
        let local_dir = tempfile::tempdir().unwrap();
        let local = LocalStore::new(local_dir.path()).unwrap();
        let storage = StorageFacade::new(local, false, "", "4.0", None);
        let inode_cache = InodeCache::disabled();
        let mut ctx = test_context(&storage, &inode_cache);

        let src_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("foo.c");
        std::fs::write(&source, b"int main(void){return 0;}").unwrap();
        let output = src_dir.path().join("foo.o");

        let classifier = AlwaysCacheable {
            source,
            output: output.clone(),
        };
        let scanner = NoIncludes;
        let runner = FixedRunner {
            preprocessor_status: 0,
            preprocessed_stdout: b"int main(void){return 0;}".to_vec(),
            compile_status: 0,
            object_contents: b"first compile".to_vec(),
            output_path: output.clone(),
        };

        let first = run(&ctx, &classifier, &scanner, &runner, &[]).unwrap();
        assert!(matches!(first, Outcome::Miss { .. }));

        ctx.recache = true;
        let runner = FixedRunner {
            object_contents: b"recompiled bytes".to_vec(),
            ..runner
        };
        let second = run(&ctx, &classifier, &scanner, &runner, &[]).unwrap();
        assert!(
            matches!(second, Outcome::Miss { .. }),
            "recache must force a miss even though an entry already exists, got {second:?}"
        );
        assert_eq!(std::fs::read(&output).unwrap(), b"recompiled bytes");
    }
}

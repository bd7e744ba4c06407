//! A minimal, single-dialect argument classifier and include scanner.
//!
//! Real per-compiler argument dialects (GCC/Clang/MSVC/NVCC) are an
//! external collaborator this crate deliberately does not implement;
//! this is a naive stand-in good enough to exercise the orchestrator
//! end to end: it recognises `-c <src> -o <out>` and otherwise declines
//! to cache.

use ccache_fingerprint::IncludeDependency;
use ccache_orchestrator::{ArgumentClassifier, CacheableInvocation, Classification, IncludeScanner};
use std::io;
use std::path::{Path, PathBuf};

pub struct NaiveClassifier;

impl ArgumentClassifier for NaiveClassifier {
    fn classify(&self, raw_args: &[String]) -> Classification {
        let has_compile_only = raw_args.iter().any(|a| a == "-c");
        let output = raw_args
            .iter()
            .position(|a| a == "-o")
            .and_then(|i| raw_args.get(i + 1))
            .map(PathBuf::from);
        let source = raw_args
            .iter()
            .find(|a| a.ends_with(".c") || a.ends_with(".cc") || a.ends_with(".cpp"))
            .map(PathBuf::from);

        match (has_compile_only, output, source) {
            (true, Some(output_file), Some(source_file)) => {
                let hashed_args: Vec<String> = raw_args
                    .iter()
                    .filter(|a| a.as_str() != "-o" && a.as_str() != output_file.to_str().unwrap_or(""))
                    .cloned()
                    .collect();
                let mut preprocessor_args = raw_args.to_vec();
                preprocessor_args.push("-E".to_string());
                Classification::Cacheable(CacheableInvocation {
                    source_file,
                    output_file,
                    hashed_args,
                    preprocessor_args,
                    compile_args: raw_args.to_vec(),
                    direct_mode_eligible: true,
                    dep_target: None,
                })
            }
            _ => Classification::Uncached {
                reason: "unsupported_invocation_shape",
                passthrough_args: raw_args.to_vec(),
            },
        }
    }
}

pub struct NaiveIncludeScanner;

impl IncludeScanner for NaiveIncludeScanner {
    fn scan(&self, _source: &Path, _compile_args: &[String]) -> io::Result<Vec<IncludeDependency>> {
        Ok(Vec::new())
    }
}

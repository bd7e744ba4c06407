//! Drives a single compiler invocation end to end: signal handling and
//! temp-file bookkeeping (C12), and the lookup/compile/store state
//! machine that ties argument classification, the fingerprint pipeline,
//! the manifest, and storage together (C11).

pub mod signal;
pub mod state;
pub mod tempfiles;

pub use signal::{SignalGuard, SignalHandlerBlocker};
pub use state::{
    ArgumentClassifier, CacheableInvocation, Classification, CompilerRunner, Context, IncludeScanner,
    Outcome, OrchestratorError, PrefixConfig, ProcessOutput, SystemCompilerRunner,
};
pub use tempfiles::TempFileGuard;

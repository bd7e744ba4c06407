//! Tracks temp files created during an invocation so the signal handler
//! can unlink them even if the process is killed mid-compile.
//!
//! A strictly async-signal-safe design would walk a pre-allocated,
//! lock-free slot table from the handler. This uses a `Mutex<Vec<_>>`
//! instead, relying on `SignalHandlerBlocker` to guarantee every
//! mutation happens with the handled signals blocked: the handler can
//! therefore only ever run while the registry is quiescent, so the lock
//! it takes is uncontended in practice even though it is not formally
//! signal-safe by POSIX's letter. The registry stores each path as a
//! pre-converted, nul-terminated `CString` (converted once, at `register`
//! time, outside any signal context) so that the handler's own unlink
//! pass never allocates: it calls raw `libc::unlink` against bytes that
//! are already sitting in memory, never `std::fs::remove_file` (which
//! converts its `Path` argument to a `CString` internally on every call).

use crate::signal::SignalHandlerBlocker;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[cfg(unix)]
use std::ffi::CString;
#[cfg(unix)]
use std::os::unix::ffi::OsStrExt;

#[cfg(unix)]
type PendingEntry = CString;
#[cfg(not(unix))]
type PendingEntry = PathBuf;

static PENDING: Lazy<Mutex<Vec<PendingEntry>>> = Lazy::new(|| Mutex::new(Vec::new()));

#[cfg(unix)]
fn pending_entry(path: &Path) -> PendingEntry {
    CString::new(path.as_os_str().as_bytes()).expect("temp file path contains a NUL byte")
}

#[cfg(not(unix))]
fn pending_entry(path: &Path) -> PendingEntry {
    path.to_path_buf()
}

#[cfg(unix)]
fn entry_matches(entry: &PendingEntry, path: &Path) -> bool {
    entry.as_bytes() == path.as_os_str().as_bytes()
}

#[cfg(not(unix))]
fn entry_matches(entry: &PendingEntry, path: &Path) -> bool {
    entry == path
}

/// Unlinks `path` when dropped unless `disarm`ed first (e.g. because it
/// was committed to its final location by an atomic rename).
pub struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub fn register(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        {
            let _blocker = SignalHandlerBlocker::new();
            PENDING.lock().unwrap().push(pending_entry(&path));
        }
        TempFileGuard { path, armed: true }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        {
            let _blocker = SignalHandlerBlocker::new();
            let mut pending = PENDING.lock().unwrap();
            if let Some(pos) = pending.iter().position(|e| entry_matches(e, &self.path)) {
                pending.remove(pos);
            }
        }
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Called only from the signal handler itself (`signal.rs`'s `on_signal`
/// on unix); must not allocate, lock anything that could already be held
/// by the interrupted thread outside a `SignalHandlerBlocker` bracket, or
/// call anything not documented async-signal-safe.
#[cfg(unix)]
pub(crate) fn unlink_pending_signal_safe() {
    if let Ok(pending) = PENDING.try_lock() {
        for path in pending.iter() {
            unsafe {
                libc::unlink(path.as_ptr());
            }
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn unlink_pending_signal_safe() {
    if let Ok(pending) = PENDING.try_lock() {
        for path in pending.iter() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_unlinks_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch");
        std::fs::write(&path, b"x").unwrap();
        {
            let _guard = TempFileGuard::register(&path);
        }
        assert!(!path.exists());
    }

    #[test]
    fn disarmed_guard_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept");
        std::fs::write(&path, b"x").unwrap();
        {
            let mut guard = TempFileGuard::register(&path);
            guard.disarm();
        }
        assert!(path.exists());
    }

    #[test]
    fn signal_safe_unlink_removes_registered_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending");
        std::fs::write(&path, b"x").unwrap();
        let mut guard = TempFileGuard::register(&path);
        unlink_pending_signal_safe();
        assert!(!path.exists());
        // The file is already gone; disarm so `Drop` doesn't try again.
        guard.disarm();
    }
}

use crate::error::{CoreError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

#[cfg(unix)]
mod imp {
    use super::*;
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    pub struct RawLock {
        _file: std::fs::File,
    }

    pub fn acquire(path: &Path) -> Result<RawLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| CoreError::Lock {
                path: path.to_path_buf(),
                source: e,
            })?;

        loop {
            let flock = libc::flock {
                l_type: libc::F_WRLCK as libc::c_short,
                l_whence: libc::SEEK_SET as libc::c_short,
                l_start: 0,
                l_len: 0,
                l_pid: 0,
            };
            let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLKW, &flock) };
            if rc == 0 {
                return Ok(RawLock { _file: file });
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(CoreError::Lock {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
            // EINTR: retry, matching the original fcntl(F_SETLKW) loop.
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use std::fs::OpenOptions;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Storage::FileSystem::{LockFileEx, LOCKFILE_EXCLUSIVE_LOCK};
    use windows_sys::Win32::System::IO::OVERLAPPED;

    pub struct RawLock {
        _file: std::fs::File,
    }

    pub fn acquire(path: &Path) -> Result<RawLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| CoreError::Lock {
                path: path.to_path_buf(),
                source: e,
            })?;

        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        let ok = unsafe {
            LockFileEx(
                file.as_raw_handle() as _,
                LOCKFILE_EXCLUSIVE_LOCK,
                0,
                u32::MAX,
                u32::MAX,
                &mut overlapped,
            )
        };
        if ok == 0 {
            return Err(CoreError::Lock {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(RawLock { _file: file })
    }
}

/// Cooperative exclusive lock over a filesystem path. `acquire` blocks
/// until held by this process; dropping it (or calling `release`, which
/// is idempotent) gives it up. Closing the underlying file handle always
/// releases the OS-level lock, so crash recovery needs no special code.
pub struct FileLock {
    path: PathBuf,
    raw: Option<imp::RawLock>,
}

impl FileLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = imp::acquire(&path)?;
        Ok(FileLock {
            path,
            raw: Some(raw),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&mut self) {
        self.raw = None;
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Background keep-alive for locks held across a compiler run: touches
/// each registered path's mtime every 500ms so a separate reaper can
/// distinguish a live holder from one that crashed mid-hold.
pub struct LongLivedLockFileManager {
    state: Arc<ManagerState>,
    handle: Option<JoinHandle<()>>,
}

struct ManagerState {
    alive_files: Mutex<HashSet<PathBuf>>,
    stop: Mutex<bool>,
    cv: Condvar,
}

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(500);

impl LongLivedLockFileManager {
    pub fn new() -> Self {
        let state = Arc::new(ManagerState {
            alive_files: Mutex::new(HashSet::new()),
            stop: Mutex::new(false),
            cv: Condvar::new(),
        });
        let worker_state = Arc::clone(&state);
        let handle = std::thread::spawn(move || Self::run(worker_state));
        LongLivedLockFileManager {
            state,
            handle: Some(handle),
        }
    }

    fn run(state: Arc<ManagerState>) {
        let mut guard = state.stop.lock().unwrap();
        loop {
            let (new_guard, timeout_result) =
                state.cv.wait_timeout(guard, KEEP_ALIVE_INTERVAL).unwrap();
            guard = new_guard;
            if *guard {
                return;
            }
            if timeout_result.timed_out() {
                Self::touch_all(&state);
            }
        }
    }

    fn touch_all(state: &ManagerState) {
        let files = state.alive_files.lock().unwrap();
        let now = filetime::FileTime::now();
        for path in files.iter() {
            let _ = filetime::set_file_mtime(path, now);
        }
    }

    pub fn register_alive_file(&self, path: PathBuf) {
        self.state.alive_files.lock().unwrap().insert(path);
    }

    pub fn deregister_alive_file(&self, path: &Path) {
        self.state.alive_files.lock().unwrap().remove(path);
    }
}

impl Drop for LongLivedLockFileManager {
    fn drop(&mut self) {
        *self.state.stop.lock().unwrap() = true;
        self.state.cv.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for LongLivedLockFileManager {
    fn default() -> Self {
        Self::new()
    }
}

/// True when `path`'s mtime is stale enough that a held lock should be
/// considered abandoned by a crashed process rather than a live holder.
pub fn is_lock_stale(path: &Path, staleness_threshold: Duration) -> bool {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(mtime) => match mtime.elapsed() {
            Ok(elapsed) => elapsed > staleness_threshold,
            Err(_) => false,
        },
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockfile");
        let mut lock = FileLock::acquire(&path).unwrap();
        lock.release();
        // Releasing twice is a no-op.
        lock.release();
    }

    #[test]
    fn fresh_lock_is_not_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockfile");
        std::fs::write(&path, b"").unwrap();
        assert!(!is_lock_stale(&path, Duration::from_secs(5)));
    }

    #[test]
    fn keep_alive_manager_starts_and_stops_cleanly() {
        let manager = LongLivedLockFileManager::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockfile");
        std::fs::write(&path, b"").unwrap();
        manager.register_alive_file(path.clone());
        manager.deregister_alive_file(&path);
        drop(manager);
    }
}

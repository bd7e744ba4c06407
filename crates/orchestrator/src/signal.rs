//! Installs handlers for `SIGINT`, `SIGTERM`, `SIGHUP`, `SIGQUIT` that
//! forward termination to a tracked compiler child, unlink pending temp
//! files, and re-raise the signal so normal exit-status semantics
//! propagate to the parent shell.

#[cfg(unix)]
mod imp {
    use libc::c_int;
    use std::sync::atomic::{AtomicI32, Ordering};

    pub(crate) static COMPILER_PID: AtomicI32 = AtomicI32::new(0);

    const HANDLED_SIGNALS: [c_int; 4] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT];

    fn fatal_signal_mask() -> libc::sigset_t {
        unsafe {
            let mut mask: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut mask);
            for &sig in &HANDLED_SIGNALS {
                libc::sigaddset(&mut mask, sig);
            }
            mask
        }
    }

    extern "C" fn on_signal(signum: c_int) {
        unsafe {
            // Restore default disposition so the final self-kill below
            // actually terminates the process instead of re-entering us.
            libc::signal(signum, libc::SIG_DFL);
        }

        let pid = COMPILER_PID.load(Ordering::SeqCst);
        if signum == libc::SIGTERM && pid != 0 {
            unsafe {
                let mut status: c_int = 0;
                if libc::waitpid(pid, &mut status, libc::WNOHANG) == 0 {
                    libc::kill(pid, signum);
                }
            }
        }

        crate::tempfiles::unlink_pending_signal_safe();

        if pid != 0 {
            unsafe {
                let mut status: c_int = 0;
                libc::waitpid(pid, &mut status, 0);
            }
        }

        unsafe {
            libc::kill(libc::getpid(), signum);
        }
    }

    unsafe fn register(signum: c_int, mask: libc::sigset_t) {
        let mut act: libc::sigaction = std::mem::zeroed();
        act.sa_sigaction = on_signal as usize;
        act.sa_mask = mask;
        act.sa_flags = libc::SA_RESTART;
        libc::sigaction(signum, &act, std::ptr::null_mut());
    }

    pub struct SignalGuard;

    impl SignalGuard {
        pub fn install() -> Self {
            let mask = fatal_signal_mask();
            unsafe {
                for &sig in &HANDLED_SIGNALS {
                    register(sig, mask);
                }
                libc::signal(libc::SIGPIPE, libc::SIG_IGN);
            }
            SignalGuard
        }
    }

    impl Drop for SignalGuard {
        fn drop(&mut self) {
            unsafe {
                for &sig in &HANDLED_SIGNALS {
                    libc::signal(sig, libc::SIG_DFL);
                }
            }
        }
    }

    pub struct SignalHandlerBlocker;

    impl SignalHandlerBlocker {
        pub fn new() -> Self {
            let mask = fatal_signal_mask();
            unsafe {
                libc::sigprocmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut());
            }
            SignalHandlerBlocker
        }
    }

    impl Default for SignalHandlerBlocker {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for SignalHandlerBlocker {
        fn drop(&mut self) {
            unsafe {
                let mut empty: libc::sigset_t = std::mem::zeroed();
                libc::sigemptyset(&mut empty);
                libc::sigprocmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
            }
        }
    }

    pub fn set_compiler_pid(pid: i32) {
        COMPILER_PID.store(pid, Ordering::SeqCst);
    }

    pub fn clear_compiler_pid() {
        COMPILER_PID.store(0, Ordering::SeqCst);
    }
}

#[cfg(not(unix))]
mod imp {
    //! Windows has no equivalent of POSIX fatal signals delivered into
    //! arbitrary code; cancellation there is process-level (job objects,
    //! console control events) rather than an in-process handler. This
    //! stub keeps the API surface uniform; temp files are still cleaned
    //! up via ordinary `Drop` on the non-Unix path.

    pub struct SignalGuard;

    impl SignalGuard {
        pub fn install() -> Self {
            SignalGuard
        }
    }

    pub struct SignalHandlerBlocker;

    impl SignalHandlerBlocker {
        pub fn new() -> Self {
            SignalHandlerBlocker
        }
    }

    impl Default for SignalHandlerBlocker {
        fn default() -> Self {
            Self::new()
        }
    }

    pub fn set_compiler_pid(_pid: i32) {}
    pub fn clear_compiler_pid() {}
}

pub use imp::{set_compiler_pid, clear_compiler_pid, SignalGuard, SignalHandlerBlocker};

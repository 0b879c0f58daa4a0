//! Termination flag raised from POSIX signal handlers. INT and TERM request
//! a clean drain; SEGV/FPE/ABRT record the signal so the process can exit
//! with it after flushing.

use std::sync::atomic::{AtomicI32, Ordering};

static TERMINATE: AtomicI32 = AtomicI32::new(0);

extern "C" fn on_signal(signum: libc::c_int) {
    TERMINATE.store(signum, Ordering::SeqCst);
}

/// Installs the handlers; call once at startup.
pub fn install() {
    let handler = on_signal as extern "C" fn(libc::c_int);
    unsafe {
        for signum in [
            libc::SIGINT,
            libc::SIGTERM,
            libc::SIGSEGV,
            libc::SIGFPE,
            libc::SIGABRT,
        ] {
            libc::signal(signum, handler as libc::sighandler_t);
        }
    }
}

/// Non-zero once a signal arrived; the loop checks this between iterations.
pub fn pending() -> i32 {
    TERMINATE.load(Ordering::SeqCst)
}

/// Process exit code for the received signal: clean INT/TERM exits zero,
/// fatal signals propagate their number.
pub fn exit_code(signum: i32) -> i32 {
    match signum {
        s if s == libc::SIGINT || s == libc::SIGTERM => 0,
        0 => 0,
        other => other,
    }
}

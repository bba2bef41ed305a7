//! Process-wide signal multiplexer.
//!
//! POSIX signal dispositions are global, so the loop funnels them
//! through the classic self-pipe: a `sigaction` trampoline writes the
//! signal number into the pipe of whichever loop armed that signum,
//! and the loop's poller picks the byte up as ordinary readiness on
//! the pipe's read end.
//!
//! Arming the first watcher for a signum installs the trampoline and
//! saves the previous disposition; disarming the last one restores it.

use crate::reactor::poller::platform::sys_write;

use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::debug;

/// Highest signal number the multiplexer accepts (exclusive).
pub(crate) const MAX_SIGNUM: i32 = 64;

/// Per-signum wake-up pipe, written by the trampoline.
///
/// A slot holds the write end of the owning loop's signal pipe, or -1
/// when the signum is not armed. Slots are atomics because the
/// trampoline runs in signal-handler context.
static WAKE_PIPES: [AtomicI32; MAX_SIGNUM as usize] = {
    const UNARMED: AtomicI32 = AtomicI32::new(-1);
    [UNARMED; MAX_SIGNUM as usize]
};

/// The installed signal handler.
///
/// Restricted to async-signal-safe operations: one atomic load, one
/// `write(2)`, and an `errno` save/restore around the write.
extern "C" fn trampoline(signum: libc::c_int) {
    if signum < 0 || signum >= MAX_SIGNUM {
        return;
    }

    let fd = WAKE_PIPES[signum as usize].load(Ordering::SeqCst);
    if fd < 0 {
        return;
    }

    unsafe {
        let errno = libc::__errno_location();
        let saved = *errno;

        let byte = signum as u8;
        sys_write(fd, std::slice::from_ref(&byte));

        *errno = saved;
    }
}

/// Installs the trampoline for `signum`, routing deliveries into
/// `wake_fd`. Returns the previous disposition so it can be restored.
pub(crate) fn install(signum: i32, wake_fd: RawFd) -> io::Result<libc::sigaction> {
    if signum <= 0 || signum >= MAX_SIGNUM {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }

    WAKE_PIPES[signum as usize].store(wake_fd, Ordering::SeqCst);

    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = trampoline as libc::sighandler_t;
    action.sa_flags = libc::SA_RESTART;
    unsafe {
        libc::sigemptyset(&mut action.sa_mask);
    }

    let mut previous: libc::sigaction = unsafe { mem::zeroed() };
    let rc = unsafe { libc::sigaction(signum, &action, &mut previous) };
    if rc != 0 {
        WAKE_PIPES[signum as usize].store(-1, Ordering::SeqCst);
        return Err(io::Error::last_os_error());
    }

    debug!(signum, "signal disposition installed");
    Ok(previous)
}

/// Restores the disposition saved by [`install`] and disarms the
/// wake-up slot for `signum`.
pub(crate) fn restore(signum: i32, previous: &libc::sigaction) {
    if signum <= 0 || signum >= MAX_SIGNUM {
        return;
    }

    WAKE_PIPES[signum as usize].store(-1, Ordering::SeqCst);

    unsafe {
        libc::sigaction(signum, previous, ptr::null_mut());
    }

    debug!(signum, "signal disposition restored");
}

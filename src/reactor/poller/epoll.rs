//! Linux `epoll`-based poller implementation.
//!
//! This module is the platform backend of the event loop. It owns the
//! `epoll` instance and translates raw `epoll_event`s into the loop's
//! token-based readiness events.
//!
//! Responsibilities:
//! - Register file descriptors with read/write interests
//! - Block waiting for I/O readiness, bounded by the next timer deadline
//! - Surface descriptor faults (`EPOLLERR`/`EPOLLHUP`) as error events
//!
//! This backend is selected automatically on Linux targets.

use super::common::Interest;
use crate::reactor::event::Event;

use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL,
};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Linux `epoll` poller.
///
/// Owns an `epoll` instance and a reusable event buffer. Tokens handed
/// to [`register`](Self::register) are carried through the kernel
/// verbatim and come back attached to readiness events.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,
}

impl EpollPoller {
    /// Create a new `EpollPoller`.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(64),
        })
    }

    /// Register a file descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut flags = 0;

        if interest.read {
            flags |= EPOLLIN;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: token,
        };

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Remove a file descriptor from the poller.
    ///
    /// Deregistration errors are ignored: the descriptor may already
    /// have been closed by the caller.
    pub(crate) fn deregister(&self, fd: RawFd) {
        unsafe {
            epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    /// Poll for I/O readiness events.
    ///
    /// Blocks until:
    /// - at least one file descriptor becomes ready,
    /// - or the optional timeout expires.
    ///
    /// `None` blocks indefinitely. An interrupted wait returns with an
    /// empty event set.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        // Round sub-millisecond remainders up so a timer just short of
        // its deadline does not spin on zero-timeout polls.
        let timeout_ms = timeout
            .map(|t| {
                let ms = t.as_millis();
                let ms = if t > Duration::from_millis(ms as u64) {
                    ms + 1
                } else {
                    ms
                };
                ms.min(i32::MAX as u128) as i32
            })
            .unwrap_or(-1);

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            unsafe {
                self.events.set_len(0);
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                events.clear();
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        events.clear();

        for ev in &self.events {
            let token = ev.u64;

            let error = ev.events & ((EPOLLERR | EPOLLHUP) as u32) != 0;
            let readable = ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0;
            let writable = ev.events & (EPOLLOUT as u32) != 0;

            if let Some(e) = events.iter_mut().find(|e| e.token == token) {
                e.readable |= readable;
                e.writable |= writable;
                e.error |= error;
            } else {
                events.push(Event {
                    token,
                    readable,
                    writable,
                    error,
                });
            }
        }

        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        super::platform::sys_close(self.epoll);
    }
}

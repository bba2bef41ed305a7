//! Watchers: single registrations with the event loop.
//!
//! A watcher owns at most one live loop registration and remembers its
//! own parameters, so it can be stopped and re-armed without the
//! caller restating them. Re-parameterising an active watcher always
//! goes through stop, new parameters, start.
//!
//! Watchers translate the loop's low-level event mask into a call to
//! the closure given at construction, attaching the kind-specific
//! payload (the descriptor for I/O, the signal number for signals).

use crate::event::{Events, Payload};
use crate::reactor::poller::common::Interest;
use crate::reactor::{Callback, Loop};

use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

/// Closure receiving `(revents, payload)` when a watcher fires.
pub(crate) type EventHandler = Rc<dyn Fn(Events, Payload)>;

/// A watcher of any public kind.
///
/// The dispatcher stores these per target; standalone users can also
/// work with the concrete types directly.
pub enum Watcher {
    Timer(TimerWatcher),
    Io(IoWatcher),
    Signal(SignalWatcher),
}

impl Watcher {
    /// Returns `true` if this watcher is registered with the loop.
    pub fn is_active(&self) -> bool {
        match self {
            Watcher::Timer(timer) => timer.is_active(),
            Watcher::Io(io) => io.is_active(),
            Watcher::Signal(signal) => signal.is_active(),
        }
    }

    /// Starts event watching with the current parameters.
    pub fn arm(&mut self) -> bool {
        match self {
            Watcher::Timer(timer) => timer.arm(),
            Watcher::Io(io) => io.arm(),
            Watcher::Signal(signal) => signal.arm(),
        }
    }

    /// Stops event watching; idempotent.
    pub fn stop(&mut self) {
        match self {
            Watcher::Timer(timer) => timer.stop(),
            Watcher::Io(io) => io.stop(),
            Watcher::Signal(signal) => signal.stop(),
        }
    }
}

/// Timer watcher.
///
/// Fires once `after` seconds from arming, then every `repeat`
/// seconds. A `repeat` of zero makes it one-shot; one-shot timers
/// deactivate themselves when they fire.
pub struct TimerWatcher {
    ev_loop: Loop,
    handler: EventHandler,
    token: Option<u64>,
    after: f64,
    repeat: f64,
}

impl TimerWatcher {
    pub fn new(ev_loop: &Loop, on_event: impl Fn(Events, Payload) + 'static) -> Self {
        Self::with_handler(ev_loop, Rc::new(on_event))
    }

    pub(crate) fn with_handler(ev_loop: &Loop, handler: EventHandler) -> Self {
        Self {
            ev_loop: ev_loop.clone(),
            handler,
            token: None,
            after: -1.0,
            repeat: 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.token.is_some_and(|token| self.ev_loop.is_live(token))
    }

    /// Starts the timer with new parameters, stopping it first if
    /// active. Negative `after` means *do not arm*; negative `repeat`
    /// is normalised to 0. Returns whether the watcher ended up armed.
    pub fn start(&mut self, after: f64, repeat: f64) -> bool {
        let after = if after >= 0.0 { after } else { -1.0 };
        let repeat = if repeat > 0.0 { repeat } else { 0.0 };

        if self.is_active() {
            self.stop();
        }

        self.after = after;
        self.repeat = repeat;

        self.arm()
    }

    /// Starts the timer with its current parameters.
    pub fn arm(&mut self) -> bool {
        if self.is_active() {
            return true;
        }
        if self.after < 0.0 {
            return false;
        }

        let after = Duration::try_from_secs_f64(self.after).unwrap_or(Duration::MAX);
        let period = (self.repeat > 0.0)
            .then(|| Duration::try_from_secs_f64(self.repeat).unwrap_or(Duration::MAX));

        let handler = self.handler.clone();
        let callback: Callback = Rc::new(move |revents| handler(revents, Payload::None));

        self.token = Some(self.ev_loop.register_timer(after, period, callback));
        true
    }

    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            self.ev_loop.deregister(token);
        }
    }
}

impl Drop for TimerWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// I/O readiness watcher.
///
/// Watches one file descriptor for a read/write interest mask. The
/// fired event carries the descriptor as its payload.
pub struct IoWatcher {
    ev_loop: Loop,
    handler: EventHandler,
    token: Option<u64>,
    fd: RawFd,
    events: Events,
}

impl IoWatcher {
    pub fn new(ev_loop: &Loop, on_event: impl Fn(Events, Payload) + 'static) -> Self {
        Self::with_handler(ev_loop, Rc::new(on_event))
    }

    pub(crate) fn with_handler(ev_loop: &Loop, handler: EventHandler) -> Self {
        Self {
            ev_loop: ev_loop.clone(),
            handler,
            token: None,
            fd: -1,
            events: Events::NONE,
        }
    }

    /// Returns the watched file descriptor, or -1 when unbound.
    pub fn fileno(&self) -> RawFd {
        self.fd
    }

    pub fn is_active(&self) -> bool {
        self.token.is_some_and(|token| self.ev_loop.is_live(token))
    }

    /// Starts watching `fd` for `events` (`READ` and/or `WRITE`),
    /// stopping first if active. A negative fd or an empty mask leaves
    /// the watcher unarmed. Returns whether the watcher ended up armed.
    pub fn start(&mut self, fd: RawFd, events: Events) -> bool {
        let fd = if fd < 0 { -1 } else { fd };
        let events = events & (Events::READ | Events::WRITE);

        if self.is_active() {
            self.stop();
        }

        self.fd = fd;
        self.events = events;

        self.arm()
    }

    /// Starts watching with the current descriptor and mask.
    pub fn arm(&mut self) -> bool {
        if self.is_active() {
            return true;
        }
        if self.fd < 0 || self.events.is_empty() {
            return false;
        }

        let interest = Interest {
            read: self.events.contains(Events::READ),
            write: self.events.contains(Events::WRITE),
        };

        let handler = self.handler.clone();
        let fd = self.fd;
        let callback: Callback = Rc::new(move |revents| handler(revents, Payload::Fd(fd)));

        match self.ev_loop.register_io(self.fd, interest, callback) {
            Ok(token) => {
                self.token = Some(token);
                true
            }
            Err(err) => {
                debug!(fd = self.fd, %err, "io watch refused");
                false
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            self.ev_loop.deregister(token);
        }
    }
}

impl Drop for IoWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// POSIX signal watcher.
///
/// The fired event carries the signal number as its payload.
pub struct SignalWatcher {
    ev_loop: Loop,
    handler: EventHandler,
    token: Option<u64>,
    signum: i32,
}

impl SignalWatcher {
    pub fn new(ev_loop: &Loop, on_event: impl Fn(Events, Payload) + 'static) -> Self {
        Self::with_handler(ev_loop, Rc::new(on_event))
    }

    pub(crate) fn with_handler(ev_loop: &Loop, handler: EventHandler) -> Self {
        Self {
            ev_loop: ev_loop.clone(),
            handler,
            token: None,
            signum: -1,
        }
    }

    /// Returns the watched signal number, or -1 when unbound.
    pub fn signum(&self) -> i32 {
        self.signum
    }

    pub fn is_active(&self) -> bool {
        self.token.is_some_and(|token| self.ev_loop.is_live(token))
    }

    /// Starts watching `signum`, stopping first if active. A negative
    /// signum leaves the watcher unarmed. Returns whether the watcher
    /// ended up armed.
    pub fn start(&mut self, signum: i32) -> bool {
        let signum = if signum < 0 { -1 } else { signum };

        if self.is_active() {
            self.stop();
        }

        self.signum = signum;

        self.arm()
    }

    /// Starts watching with the current signal number.
    pub fn arm(&mut self) -> bool {
        if self.is_active() {
            return true;
        }
        if self.signum < 0 {
            return false;
        }

        let handler = self.handler.clone();
        let signum = self.signum;
        let callback: Callback = Rc::new(move |revents| handler(revents, Payload::Signal(signum)));

        match self.ev_loop.register_signal(self.signum, callback) {
            Ok(token) => {
                self.token = Some(token);
                true
            }
            Err(err) => {
                debug!(signum = self.signum, %err, "signal watch refused");
                false
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            self.ev_loop.deregister(token);
        }
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Internal watcher fired once as the loop is about to exit.
///
/// The dispatcher arms one of these to drive its terminal cleanup
/// scan. A fired registration is consumed; `start` arms a fresh one.
pub(crate) struct CleanupWatcher {
    ev_loop: Loop,
    handler: EventHandler,
    token: Option<u64>,
}

impl CleanupWatcher {
    pub(crate) fn with_handler(ev_loop: &Loop, handler: EventHandler) -> Self {
        Self {
            ev_loop: ev_loop.clone(),
            handler,
            token: None,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.token.is_some_and(|token| self.ev_loop.is_live(token))
    }

    pub(crate) fn start(&mut self) -> bool {
        if self.is_active() {
            return true;
        }

        let handler = self.handler.clone();
        let callback: Callback = Rc::new(move |revents| handler(revents, Payload::None));

        self.token = Some(self.ev_loop.register_cleanup(callback));
        true
    }

    pub(crate) fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            self.ev_loop.deregister(token);
        }
    }
}

impl Drop for CleanupWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

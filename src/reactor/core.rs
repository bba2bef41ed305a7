//! The event loop core.
//!
//! A [`Loop`] is a cheap clonable handle over a single-threaded core
//! that owns the poller, the timer heap, the signal multiplexer and
//! the registration table. Watchers register callbacks here and get
//! back a 64-bit token (slot index in the low half, generation in the
//! high half); every dispatch re-validates its token against the
//! table, so events for stopped or re-parameterised registrations are
//! dropped instead of being delivered stale.
//!
//! Callbacks are always invoked with the core unborrowed: a callback
//! may freely register, deregister, or start a nested [`Loop::start`]
//! frame.

use super::context::CURRENT_LOOP;
use super::event::Event;
use super::poller::common::Interest;
use super::poller::{platform, Poller};
use super::signals;
use super::timer::TimerEntry;
use crate::event::Events;
use crate::utils::Slab;

use std::cell::RefCell;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Reserved token for the signal pipe's read end.
///
/// This value must never collide with tokens produced by the
/// registration table. A real token would need slot index and
/// generation both at their maximum, which cannot happen in practice.
const SIGNAL_PIPE_TOKEN: u64 = u64::MAX;

/// How [`Loop::start`] should drive the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Run {
    /// Run until a break is requested or no live watcher remains.
    Default,
    /// Block for one poll batch, dispatch it, and return.
    Once,
    /// Poll with a zero timeout, dispatch whatever is ready, and return.
    NoWait,
}

/// How [`Loop::stop`] should unwind running [`Loop::start`] frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Break {
    /// Clear a pending break request.
    Cancel,
    /// Exit the innermost running `start` frame.
    One,
    /// Exit every nested `start` frame.
    All,
}

#[derive(Clone, Copy)]
enum BreakState {
    None,
    One,
    All,
}

/// Callback invoked when a registration fires.
pub(crate) type Callback = Rc<dyn Fn(Events)>;

/// What a registration is watching.
enum Source {
    Timer { period: Option<Duration> },
    Io { fd: RawFd, interest: Interest },
    Signal { signum: i32 },
    Cleanup,
}

/// One live registration in the table.
struct Registration {
    gen: u32,
    source: Source,
    callback: Callback,
}

/// Watchers sharing one armed signal number.
struct SignalGroup {
    tokens: Vec<u64>,
    previous: libc::sigaction,
}

fn token_for(index: usize, gen: u32) -> u64 {
    ((gen as u64) << 32) | (index as u64 & 0xffff_ffff)
}

fn split_token(token: u64) -> (usize, u32) {
    ((token & 0xffff_ffff) as usize, (token >> 32) as u32)
}

struct LoopCore {
    poller: Poller,

    regs: Slab<Registration>,
    next_gen: u32,

    timers: BinaryHeap<TimerEntry>,
    signals: HashMap<i32, SignalGroup>,
    signal_pipe: (RawFd, RawFd),
    cleanups: Vec<u64>,

    /// Number of live timer/io/signal registrations. Cleanup watchers
    /// do not keep the loop alive and are not counted.
    live: usize,

    /// Nesting depth of running `start` frames.
    depth: usize,

    brk: BreakState,
}

impl LoopCore {
    fn new() -> io::Result<Self> {
        let poller = Poller::new()?;

        let signal_pipe = platform::sys_pipe()?;
        let interest = Interest {
            read: true,
            write: false,
        };
        if let Err(err) = poller.register(signal_pipe.0, SIGNAL_PIPE_TOKEN, interest) {
            platform::sys_close(signal_pipe.0);
            platform::sys_close(signal_pipe.1);
            return Err(err);
        }

        Ok(Self {
            poller,
            regs: Slab::new(16),
            next_gen: 0,
            timers: BinaryHeap::new(),
            signals: HashMap::new(),
            signal_pipe,
            cleanups: Vec::new(),
            live: 0,
            depth: 0,
            brk: BreakState::None,
        })
    }

    fn insert(&mut self, source: Source, callback: Callback) -> u64 {
        self.next_gen = self.next_gen.wrapping_add(1);
        let gen = self.next_gen;

        let index = self.regs.insert(Registration {
            gen,
            source,
            callback,
        });

        token_for(index, gen)
    }

    fn is_live(&self, token: u64) -> bool {
        let (index, gen) = split_token(token);
        matches!(self.regs.get(index), Some(reg) if reg.gen == gen)
    }

    fn deregister(&mut self, token: u64) {
        if !self.is_live(token) {
            return;
        }

        let (index, _) = split_token(token);
        let Some(reg) = self.regs.remove(index) else {
            return;
        };

        match reg.source {
            Source::Timer { .. } => {
                // Heap entries for this token go stale and are skipped
                // on pop.
                self.live -= 1;
            }
            Source::Io { fd, .. } => {
                self.poller.deregister(fd);
                self.live -= 1;
            }
            Source::Signal { signum } => {
                self.live -= 1;

                let emptied = match self.signals.get_mut(&signum) {
                    Some(group) => {
                        group.tokens.retain(|t| *t != token);
                        group.tokens.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    if let Some(group) = self.signals.remove(&signum) {
                        signals::restore(signum, &group.previous);
                    }
                }
            }
            Source::Cleanup => {
                self.cleanups.retain(|t| *t != token);
            }
        }

        trace!(token, "registration removed");
    }

    /// Time until the nearest live timer deadline, or `None` when no
    /// timer is pending. Stale heap entries found on the way are
    /// discarded.
    fn next_timeout(&mut self) -> Option<Duration> {
        loop {
            let (token, deadline) = match self.timers.peek() {
                Some(entry) => (entry.token, entry.deadline),
                None => return None,
            };

            let (index, gen) = split_token(token);
            let live = match self.regs.get(index) {
                Some(reg) if reg.gen == gen => matches!(reg.source, Source::Timer { .. }),
                _ => false,
            };

            if !live {
                self.timers.pop();
                continue;
            }

            return Some(deadline.saturating_duration_since(Instant::now()));
        }
    }

    /// Pops the next due timer, handling re-arming of repeating timers
    /// and auto-deactivation of one-shot timers. Returns the callback
    /// to invoke, or `None` when nothing is due.
    fn pop_due_timer(&mut self, now: Instant) -> Option<Callback> {
        while let Some(entry) = self.timers.peek() {
            if entry.deadline > now {
                return None;
            }

            let entry = self.timers.pop().unwrap();

            let (index, gen) = split_token(entry.token);
            let (period, callback) = match self.regs.get(index) {
                Some(reg) if reg.gen == gen => match &reg.source {
                    Source::Timer { period } => (*period, reg.callback.clone()),
                    _ => continue,
                },
                _ => continue,
            };

            match period {
                Some(period) => self.timers.push(TimerEntry {
                    deadline: now + period,
                    token: entry.token,
                }),
                None => self.deregister(entry.token),
            }

            return Some(callback);
        }

        None
    }

    /// Matches a poller event against the registration table and
    /// translates readiness into the public event mask.
    fn io_callback(&self, event: &Event) -> Option<(Callback, Events)> {
        let (index, gen) = split_token(event.token);
        let reg = self.regs.get(index)?;
        if reg.gen != gen {
            return None;
        }

        let interest = match &reg.source {
            Source::Io { interest, .. } => *interest,
            _ => return None,
        };

        let mut revents = Events::NONE;
        if event.readable && interest.read {
            revents |= Events::READ;
        }
        if event.writable && interest.write {
            revents |= Events::WRITE;
        }
        if event.error {
            revents |= Events::ERROR;
        }

        if revents.is_empty() {
            return None;
        }

        Some((reg.callback.clone(), revents))
    }

    fn signal_callback(&self, token: u64) -> Option<Callback> {
        let (index, gen) = split_token(token);
        let reg = self.regs.get(index)?;
        if reg.gen != gen || !matches!(reg.source, Source::Signal { .. }) {
            return None;
        }

        Some(reg.callback.clone())
    }

    /// Reads pending signal numbers out of the wake-up pipe.
    fn drain_signal_pipe(&mut self) -> Vec<u8> {
        let mut signums = Vec::new();
        let mut buf = [0u8; 16];

        loop {
            let n = platform::sys_read(self.signal_pipe.0, &mut buf);
            if n <= 0 {
                break;
            }
            signums.extend_from_slice(&buf[..n as usize]);
        }

        signums
    }

    /// Removes and returns the next armed cleanup callback. Each
    /// cleanup registration fires at most once.
    fn take_cleanup(&mut self) -> Option<Callback> {
        while let Some(token) = self.cleanups.pop() {
            let (index, gen) = split_token(token);
            let callback = match self.regs.get(index) {
                Some(reg) if reg.gen == gen => reg.callback.clone(),
                _ => continue,
            };
            self.regs.remove(index);
            return Some(callback);
        }

        None
    }
}

impl Drop for LoopCore {
    fn drop(&mut self) {
        for (signum, group) in self.signals.drain() {
            signals::restore(signum, &group.previous);
        }

        platform::sys_close(self.signal_pipe.0);
        platform::sys_close(self.signal_pipe.1);
    }
}

/// A handle to an event loop.
///
/// Handles are cheap to clone and share one underlying core. The loop
/// is single-threaded: the handle is `!Send`, and watchers must be
/// driven from the thread that runs [`start`](Loop::start).
#[derive(Clone)]
pub struct Loop {
    core: Rc<RefCell<LoopCore>>,
}

impl Loop {
    /// Creates a fresh, isolated event loop.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            core: Rc::new(RefCell::new(LoopCore::new()?)),
        })
    }

    /// Returns the calling thread's default loop, created on first
    /// use.
    ///
    /// # Panics
    ///
    /// Panics if the loop's OS resources cannot be created.
    pub fn current() -> Self {
        CURRENT_LOOP.with(|cell| {
            let mut slot = cell.borrow_mut();
            match &*slot {
                Some(ev_loop) => ev_loop.clone(),
                None => {
                    let ev_loop =
                        Loop::new().expect("failed to create the thread default event loop");
                    *slot = Some(ev_loop.clone());
                    ev_loop
                }
            }
        })
    }

    /// Drives the loop.
    ///
    /// Returns `true` iff live watchers remain when the call returns.
    /// `start` may be called recursively from inside an event handler;
    /// [`Break::One`] then exits only the innermost frame.
    ///
    /// When the outermost frame exits, every armed cleanup watcher
    /// fires exactly once.
    pub fn start(&self, mode: Run) -> bool {
        {
            let mut core = self.core.borrow_mut();
            core.depth += 1;
        }
        debug!(?mode, "loop frame entered");

        loop {
            if self.core.borrow().live == 0 {
                break;
            }

            self.turn(mode);

            {
                let mut core = self.core.borrow_mut();
                match core.brk {
                    BreakState::All => break,
                    BreakState::One => {
                        core.brk = BreakState::None;
                        break;
                    }
                    BreakState::None => {}
                }
            }

            if matches!(mode, Run::Once | Run::NoWait) {
                break;
            }
        }

        let outermost = {
            let mut core = self.core.borrow_mut();
            core.depth -= 1;
            if core.depth == 0 {
                core.brk = BreakState::None;
            }
            core.depth == 0
        };

        if outermost {
            self.run_cleanups();
        }

        let pending = self.core.borrow().live > 0;
        debug!(pending, "loop frame exited");
        pending
    }

    /// Requests loop termination.
    ///
    /// Calling `stop` while the loop is not running is a no-op.
    pub fn stop(&self, how: Break) {
        let mut core = self.core.borrow_mut();
        if core.depth == 0 {
            return;
        }

        core.brk = match how {
            Break::Cancel => BreakState::None,
            Break::One => BreakState::One,
            Break::All => BreakState::All,
        };
    }

    /// One poll-and-dispatch pass.
    ///
    /// The core is never borrowed while a callback runs, and every
    /// dispatch re-validates its token first, so a callback that stops
    /// other watchers prevents their already-collected events from
    /// being delivered.
    fn turn(&self, mode: Run) {
        let mut events = Vec::new();
        {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;

            let timeout = match mode {
                Run::NoWait => Some(Duration::ZERO),
                _ => core.next_timeout(),
            };

            if let Err(err) = core.poller.poll(&mut events, timeout) {
                debug!(%err, "poll failed");
            }
        }

        for event in &events {
            if self.break_requested() {
                return;
            }

            if event.token == SIGNAL_PIPE_TOKEN {
                self.dispatch_signals();
                continue;
            }

            let ready = self.core.borrow().io_callback(event);
            if let Some((callback, revents)) = ready {
                callback(revents);
            }
        }

        loop {
            if self.break_requested() {
                return;
            }

            let due = self.core.borrow_mut().pop_due_timer(Instant::now());
            match due {
                Some(callback) => callback(Events::TIMER),
                None => break,
            }
        }
    }

    fn dispatch_signals(&self) {
        let signums = self.core.borrow_mut().drain_signal_pipe();

        for signum in signums {
            let tokens = {
                let core = self.core.borrow();
                core.signals
                    .get(&i32::from(signum))
                    .map(|group| group.tokens.clone())
                    .unwrap_or_default()
            };

            for token in tokens {
                if self.break_requested() {
                    return;
                }

                let ready = self.core.borrow().signal_callback(token);
                if let Some(callback) = ready {
                    callback(Events::SIGNAL);
                }
            }
        }
    }

    fn run_cleanups(&self) {
        loop {
            let next = self.core.borrow_mut().take_cleanup();
            match next {
                Some(callback) => callback(Events::CLEANUP),
                None => break,
            }
        }
    }

    fn break_requested(&self) -> bool {
        !matches!(self.core.borrow().brk, BreakState::None)
    }

    /// Arms a timer firing after `after`, then every `period` if
    /// given. One-shot timers deregister themselves when they fire.
    pub(crate) fn register_timer(
        &self,
        after: Duration,
        period: Option<Duration>,
        callback: Callback,
    ) -> u64 {
        let mut core = self.core.borrow_mut();

        let token = core.insert(Source::Timer { period }, callback);

        // Clamp absurd deadlines instead of overflowing Instant.
        let now = Instant::now();
        let deadline = now
            .checked_add(after)
            .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365));

        core.timers.push(TimerEntry { deadline, token });
        core.live += 1;

        trace!(token, "timer armed");
        token
    }

    /// Arms readiness watching for `fd`.
    pub(crate) fn register_io(
        &self,
        fd: RawFd,
        interest: Interest,
        callback: Callback,
    ) -> io::Result<u64> {
        let mut core = self.core.borrow_mut();

        let token = core.insert(Source::Io { fd, interest }, callback);

        if let Err(err) = core.poller.register(fd, token, interest) {
            let (index, _) = split_token(token);
            core.regs.remove(index);
            return Err(err);
        }

        core.live += 1;

        trace!(token, fd, "io watch armed");
        Ok(token)
    }

    /// Arms watching for `signum`, installing the process-wide
    /// disposition if this loop is the first to watch it.
    pub(crate) fn register_signal(&self, signum: i32, callback: Callback) -> io::Result<u64> {
        let mut core = self.core.borrow_mut();

        if signum <= 0 || signum >= signals::MAX_SIGNUM {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }

        let token = core.insert(Source::Signal { signum }, callback);

        if let Some(group) = core.signals.get_mut(&signum) {
            group.tokens.push(token);
        } else {
            let wake_fd = core.signal_pipe.1;
            match signals::install(signum, wake_fd) {
                Ok(previous) => {
                    core.signals.insert(
                        signum,
                        SignalGroup {
                            tokens: vec![token],
                            previous,
                        },
                    );
                }
                Err(err) => {
                    let (index, _) = split_token(token);
                    core.regs.remove(index);
                    return Err(err);
                }
            }
        }

        core.live += 1;

        trace!(token, signum, "signal watch armed");
        Ok(token)
    }

    /// Arms a one-shot cleanup callback fired as the outermost `start`
    /// frame exits. Cleanup registrations do not keep the loop alive.
    pub(crate) fn register_cleanup(&self, callback: Callback) -> u64 {
        let mut core = self.core.borrow_mut();

        let token = core.insert(Source::Cleanup, callback);
        core.cleanups.push(token);
        token
    }

    /// Removes a registration. Unknown or stale tokens are ignored.
    pub(crate) fn deregister(&self, token: u64) {
        self.core.borrow_mut().deregister(token);
    }

    /// Returns `true` while `token` names a live registration.
    pub(crate) fn is_live(&self, token: u64) -> bool {
        self.core.borrow().is_live(token)
    }
}

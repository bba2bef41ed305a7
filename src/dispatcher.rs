//! The target registry and event delivery.
//!
//! A [`Dispatcher`] groups watchers under caller-chosen target
//! identities and routes every fired event through a single handler.
//! Delivery follows one rule: *all* of the firing target's watchers
//! are stopped before the handler runs, and re-armed afterwards only
//! if the handler returns `true`. This gives handlers a quiescent view
//! of their target and makes it safe to mutate, disable, or release
//! the target from inside the handler.
//!
//! When the loop is about to exit, the dispatcher's internal cleanup
//! watcher fires: every target that still had an active watcher
//! receives one final `CLEANUP` event, then every registered target is
//! released and, if configured, handed to the `on_free` hook.

use crate::event::{Events, Payload};
use crate::reactor::Loop;
use crate::watcher::{
    CleanupWatcher, EventHandler, IoWatcher, SignalWatcher, TimerWatcher, Watcher,
};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::Hash;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use tracing::debug;

type OnEvent<T> = Box<dyn Fn(&T, Events, Payload) -> bool>;
type OnTarget<T> = Box<dyn Fn(&T)>;

/// Routes loop events to one handler under caller-chosen target
/// identities.
///
/// Targets are compared by value; the dispatcher never owns them in
/// the data sense. With [`with_hooks`](Dispatcher::with_hooks), the
/// `on_apply` hook runs exactly once when a target first enters the
/// registry and `on_free` exactly once when it leaves, letting callers
/// pin the target's lifetime to its observation window.
pub struct Dispatcher<T: Eq + Hash + Clone + 'static> {
    shared: Rc<Shared<T>>,
}

struct Shared<T> {
    ev_loop: Loop,
    on_event: OnEvent<T>,
    on_apply: Option<OnTarget<T>>,
    on_free: Option<OnTarget<T>>,
    cleaning: Cell<bool>,
    targets: RefCell<HashMap<T, Vec<Watcher>>>,
    sweeper: RefCell<Option<CleanupWatcher>>,
}

impl<T: Eq + Hash + Clone + 'static> Dispatcher<T> {
    /// Creates a dispatcher without apply/free hooks.
    pub fn new(ev_loop: &Loop, on_event: impl Fn(&T, Events, Payload) -> bool + 'static) -> Self {
        Self::build(ev_loop, Box::new(on_event), None, None)
    }

    /// Creates a dispatcher with apply/free handling for targets.
    pub fn with_hooks(
        ev_loop: &Loop,
        on_event: impl Fn(&T, Events, Payload) -> bool + 'static,
        on_apply: impl Fn(&T) + 'static,
        on_free: impl Fn(&T) + 'static,
    ) -> Self {
        Self::build(
            ev_loop,
            Box::new(on_event),
            Some(Box::new(on_apply)),
            Some(Box::new(on_free)),
        )
    }

    fn build(
        ev_loop: &Loop,
        on_event: OnEvent<T>,
        on_apply: Option<OnTarget<T>>,
        on_free: Option<OnTarget<T>>,
    ) -> Self {
        let shared = Rc::new(Shared {
            ev_loop: ev_loop.clone(),
            on_event,
            on_apply,
            on_free,
            cleaning: Cell::new(false),
            targets: RefCell::new(HashMap::new()),
            sweeper: RefCell::new(None),
        });

        let weak = Rc::downgrade(&shared);
        let mut sweeper = CleanupWatcher::with_handler(
            ev_loop,
            Rc::new(move |_revents, _payload| {
                if let Some(shared) = weak.upgrade() {
                    Shared::cleanup(&shared);
                }
            }),
        );
        sweeper.start();
        *shared.sweeper.borrow_mut() = Some(sweeper);

        Self { shared }
    }

    /// Returns `true` while the terminal cleanup scan is running.
    pub fn is_cleaning(&self) -> bool {
        self.shared.cleaning.get()
    }

    /// Returns a handle to the loop this dispatcher is bound to.
    pub fn event_loop(&self) -> Loop {
        self.shared.ev_loop.clone()
    }

    /// Installs (or re-parameterises) the timer watcher for a target.
    ///
    /// The timeout is used both as the initial delay and as the repeat
    /// period, so the target keeps firing while its handler keeps
    /// returning `true`.
    pub fn watch_timer(&self, target: &T, timeout: f64) -> bool {
        Shared::setup_watching(
            &self.shared,
            target,
            |watcher| match watcher {
                Watcher::Timer(timer) => Some(timer.start(timeout, timeout)),
                _ => None,
            },
            |ev_loop, handler| {
                let mut timer = TimerWatcher::with_handler(ev_loop, handler);
                let started = timer.start(timeout, timeout);
                (Watcher::Timer(timer), started)
            },
        )
    }

    /// Installs (or re-parameterises) the I/O watcher bound to `fd`
    /// for a target. `events` is a mask of `READ` and `WRITE`.
    pub fn watch_io(&self, target: &T, fd: RawFd, events: Events) -> bool {
        Shared::setup_watching(
            &self.shared,
            target,
            |watcher| match watcher {
                Watcher::Io(io) if io.fileno() == fd || io.fileno() == -1 => {
                    Some(io.start(fd, events))
                }
                _ => None,
            },
            |ev_loop, handler| {
                let mut io = IoWatcher::with_handler(ev_loop, handler);
                let started = io.start(fd, events);
                (Watcher::Io(io), started)
            },
        )
    }

    /// Installs (or re-parameterises) the watcher for `signum` for a
    /// target.
    pub fn watch_signal(&self, target: &T, signum: i32) -> bool {
        Shared::setup_watching(
            &self.shared,
            target,
            |watcher| match watcher {
                Watcher::Signal(signal) if signal.signum() == signum || signal.signum() == -1 => {
                    Some(signal.start(signum))
                }
                _ => None,
            },
            |ev_loop, handler| {
                let mut signal = SignalWatcher::with_handler(ev_loop, handler);
                let started = signal.start(signum);
                (Watcher::Signal(signal), started)
            },
        )
    }

    /// Arms every currently inactive watcher of a target.
    ///
    /// Returns whether the target was present.
    pub fn enable_watching(&self, target: &T) -> bool {
        Shared::enable(&self.shared, target)
    }

    /// Stops every watcher of a target.
    ///
    /// Returns whether the target was present.
    pub fn disable_watching(&self, target: &T) -> bool {
        Shared::disable(&self.shared, target)
    }

    /// Stops and drops every watcher of a target, removes the
    /// registry entry, and runs the `on_free` hook if configured.
    ///
    /// Returns whether the target was present; releasing an absent
    /// target is a no-op.
    pub fn release_watching(&self, target: &T) -> bool {
        Shared::release(&self.shared, target)
    }

    /// Runs the terminal cleanup scan now.
    ///
    /// Normally driven by the loop as it exits; also runs on drop if
    /// the loop never exited cleanly.
    pub fn cleanup(&self) {
        Shared::cleanup(&self.shared);
    }
}

impl<T: Eq + Hash + Clone + 'static> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        Shared::cleanup(&self.shared);

        if let Some(mut sweeper) = self.shared.sweeper.borrow_mut().take() {
            sweeper.stop();
        }
    }
}

impl<T: Eq + Hash + Clone + 'static> Shared<T> {
    /// Builds the per-watcher event handler for `target`.
    ///
    /// The closure holds only a weak reference: a watcher that
    /// outlives its dispatcher delivers nowhere.
    fn handler_for(shared: &Rc<Self>, target: &T) -> EventHandler {
        let weak: Weak<Self> = Rc::downgrade(shared);
        let target = target.clone();

        Rc::new(move |revents, payload| {
            if let Some(shared) = weak.upgrade() {
                Shared::deliver(&shared, &target, revents, payload);
            }
        })
    }

    /// Delivery: stop all of the target's watchers, run the handler,
    /// re-arm them only on a truthy return.
    ///
    /// A handler that released its own target leaves nothing to
    /// re-arm; during the cleanup scan re-arming is suppressed
    /// regardless of the return value.
    fn deliver(shared: &Rc<Self>, target: &T, revents: Events, payload: Payload) {
        Shared::disable(shared, target);

        if (shared.on_event)(target, revents, payload) {
            Shared::enable(shared, target);
        }
    }

    /// Shared install path for the `watch_*` operations.
    ///
    /// Scans the target's watchers in insertion order and hands the
    /// first compatible one (as judged by `reuse`) its new parameters;
    /// otherwise builds a fresh watcher with `make`. A fresh watcher
    /// that fails to arm never enters the registry, and the `on_apply`
    /// hook runs only once a target's first watcher is actually
    /// installed.
    fn setup_watching(
        shared: &Rc<Self>,
        target: &T,
        mut reuse: impl FnMut(&mut Watcher) -> Option<bool>,
        make: impl FnOnce(&Loop, EventHandler) -> (Watcher, bool),
    ) -> bool {
        if shared.cleaning.get() {
            return false;
        }

        Shared::ensure_sweeper(shared);

        {
            let mut targets = shared.targets.borrow_mut();
            if let Some(watchers) = targets.get_mut(target) {
                for watcher in watchers.iter_mut() {
                    if let Some(started) = reuse(watcher) {
                        return started;
                    }
                }
            }
        }

        let (watcher, started) = make(&shared.ev_loop, Shared::handler_for(shared, target));
        if !started {
            return false;
        }

        let fresh = {
            let mut targets = shared.targets.borrow_mut();
            let fresh = !targets.contains_key(target);
            targets.entry(target.clone()).or_default().push(watcher);
            fresh
        };

        if fresh {
            if let Some(on_apply) = &shared.on_apply {
                on_apply(target);
            }
        }

        true
    }

    fn enable(shared: &Rc<Self>, target: &T) -> bool {
        if shared.cleaning.get() {
            return false;
        }

        let mut targets = shared.targets.borrow_mut();
        match targets.get_mut(target) {
            Some(watchers) => {
                for watcher in watchers.iter_mut() {
                    if !watcher.is_active() {
                        watcher.arm();
                    }
                }
                true
            }
            None => false,
        }
    }

    fn disable(shared: &Rc<Self>, target: &T) -> bool {
        let mut targets = shared.targets.borrow_mut();
        match targets.get_mut(target) {
            Some(watchers) => {
                for watcher in watchers.iter_mut() {
                    watcher.stop();
                }
                true
            }
            None => false,
        }
    }

    fn release(shared: &Rc<Self>, target: &T) -> bool {
        let removed = shared.targets.borrow_mut().remove(target);

        match removed {
            Some(mut watchers) => {
                for watcher in watchers.iter_mut() {
                    watcher.stop();
                }
                drop(watchers);

                if let Some(on_free) = &shared.on_free {
                    on_free(target);
                }
                true
            }
            None => false,
        }
    }

    /// The terminal scan: one `CLEANUP` event per target that still
    /// had an active watcher, then release of every target. New
    /// registrations and re-arms are refused for the duration.
    fn cleanup(shared: &Rc<Self>) {
        if shared.cleaning.replace(true) {
            return;
        }
        debug!("dispatcher cleanup started");

        let (all, active) = {
            let targets = shared.targets.borrow();
            let mut all = Vec::with_capacity(targets.len());
            let mut active = Vec::new();

            for (target, watchers) in targets.iter() {
                all.push(target.clone());
                if watchers.iter().any(|watcher| watcher.is_active()) {
                    active.push(target.clone());
                }
            }

            (all, active)
        };

        for target in &active {
            Shared::deliver(shared, target, Events::CLEANUP, Payload::None);
        }
        for target in &all {
            Shared::release(shared, target);
        }

        shared.cleaning.set(false);
        debug!(targets = all.len(), "dispatcher cleanup finished");
    }

    /// Re-arms the cleanup watcher if a previous loop exit consumed
    /// it, so a dispatcher reused across loop runs still cleans up.
    fn ensure_sweeper(shared: &Rc<Self>) {
        let mut sweeper = shared.sweeper.borrow_mut();
        if let Some(sweeper) = sweeper.as_mut() {
            if !sweeper.is_active() {
                sweeper.start();
            }
        }
    }
}

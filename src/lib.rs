//! # Gust
//!
//! **Gust** is a cooperative, single-threaded, callback-driven event
//! dispatcher over its own epoll reactor.
//!
//! A program registers interest in events (timer expiry, file
//! descriptor readiness, POSIX signals) under *target identities* it
//! chooses itself. Every fired event is routed through a single
//! handler together with the owning target and an event mask, and the
//! handler's boolean return decides whether the target's watchers are
//! re-armed. When the loop stops, every target that was still being
//! watched receives one final `CLEANUP` event before its registrations
//! are released.
//!
//! Gust offers:
//!
//! - A **loop handle** ([`Loop`]) with run modes (`Default`, `Once`,
//!   `NoWait`), nested break semantics, and a thread-local default
//!   instance
//! - **Watchers** for timers, I/O readiness, and signals, reusable
//!   standalone or through the dispatcher
//! - A **dispatcher** ([`Dispatcher`]) keyed by caller-chosen targets,
//!   with apply/free hooks bracketing each target's observation window
//! - A **cleanup protocol** that synthesises a terminal event to every
//!   active target as the loop shuts down
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gust::{Dispatcher, Events, Loop, Run};
//!
//! let ev_loop = Loop::current();
//! let dispatcher = Dispatcher::new(&ev_loop, |target: &&str, revents, _payload| {
//!     println!("{target}: {revents:?}");
//!     !revents.contains(Events::CLEANUP)
//! });
//!
//! dispatcher.watch_timer(&"tick", 1.0);
//! ev_loop.start(Run::Default);
//! ```
//!
//! ## Modules
//!
//! - [`dispatcher`] — The target registry and delivery rules
//! - [`event`] — Event masks and payloads
//! - [`watcher`] — Timer, I/O, and signal watchers
//!
//! Gust is Unix-only and deliberately `!Send`: every loop, watcher,
//! and dispatcher stays on the thread that drives it.

mod reactor;
mod utils;

pub mod dispatcher;
pub mod event;
pub mod watcher;

pub use dispatcher::Dispatcher;
pub use event::{Events, Payload};
pub use reactor::{Break, Loop, Run};
pub use watcher::{IoWatcher, SignalWatcher, TimerWatcher, Watcher};

//! Event masks and payloads delivered to handlers.
//!
//! Every handler invocation receives an [`Events`] mask describing
//! what fired and a [`Payload`] carrying the kind-specific detail
//! (the file descriptor for I/O events, the signal number for signal
//! events, nothing otherwise).

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::os::fd::RawFd;

/// A bitwise OR of fired event kinds.
///
/// `ERROR` and `CLEANUP` are out-of-band: `ERROR` accompanies a
/// readiness event whose descriptor reported a fault, `CLEANUP` is
/// synthesised once per active target as the loop shuts down.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Events(u32);

impl Events {
    /// The empty mask.
    pub const NONE: Events = Events(0);
    /// The watched descriptor is readable.
    pub const READ: Events = Events(0x0000_0001);
    /// The watched descriptor is writable.
    pub const WRITE: Events = Events(0x0000_0002);
    /// A timer expired.
    pub const TIMER: Events = Events(0x0000_0100);
    /// A watched POSIX signal arrived.
    pub const SIGNAL: Events = Events(0x0000_0400);
    /// Terminal event delivered during loop cleanup.
    pub const CLEANUP: Events = Events(0x0004_0000);
    /// The underlying registration reported a fault.
    pub const ERROR: Events = Events(0x8000_0000);

    /// Returns `true` if no bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    pub fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if `self` and `other` share at least one bit.
    pub fn intersects(self, other: Events) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Events {
    type Output = Events;

    fn bitand(self, rhs: Events) -> Events {
        Events(self.0 & rhs.0)
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Events, &str); 6] = [
            (Events::READ, "READ"),
            (Events::WRITE, "WRITE"),
            (Events::TIMER, "TIMER"),
            (Events::SIGNAL, "SIGNAL"),
            (Events::CLEANUP, "CLEANUP"),
            (Events::ERROR, "ERROR"),
        ];

        if self.is_empty() {
            return write!(f, "NONE");
        }

        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(bit) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }

        Ok(())
    }
}

/// Kind-specific detail attached to a delivered event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payload {
    /// No detail (timer and cleanup events).
    None,
    /// The ready file descriptor (I/O events).
    Fd(RawFd),
    /// The delivered signal number (signal events).
    Signal(i32),
}

impl Payload {
    /// Returns the file descriptor if this is an I/O payload.
    pub fn fd(self) -> Option<RawFd> {
        match self {
            Payload::Fd(fd) => Some(fd),
            _ => None,
        }
    }

    /// Returns the signal number if this is a signal payload.
    pub fn signum(self) -> Option<i32> {
        match self {
            Payload::Signal(signum) => Some(signum),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_ops() {
        let mask = Events::READ | Events::WRITE;

        assert!(mask.contains(Events::READ));
        assert!(mask.contains(Events::WRITE));
        assert!(!mask.contains(Events::TIMER));
        assert!(mask.intersects(Events::READ | Events::SIGNAL));
        assert!(!mask.intersects(Events::SIGNAL));
        assert!(Events::NONE.is_empty());
    }

    #[test]
    fn debug_lists_set_bits() {
        let mask = Events::TIMER | Events::CLEANUP;

        assert_eq!(format!("{mask:?}"), "TIMER | CLEANUP");
        assert_eq!(format!("{:?}", Events::NONE), "NONE");
    }

    #[test]
    fn payload_accessors() {
        assert_eq!(Payload::Fd(3).fd(), Some(3));
        assert_eq!(Payload::Fd(3).signum(), None);
        assert_eq!(Payload::Signal(10).signum(), Some(10));
        assert_eq!(Payload::None.fd(), None);
    }
}

/// A readiness event reported by the poller.
///
/// Carries the 64-bit registration token (slot index in the low half,
/// generation in the high half) and the readiness bits observed for
/// the associated file descriptor.
pub(crate) struct Event {
    /// Token associated with the registered file descriptor.
    pub(crate) token: u64,

    /// Indicates that the file descriptor is readable.
    pub(crate) readable: bool,

    /// Indicates that the file descriptor is writable.
    pub(crate) writable: bool,

    /// Indicates that the descriptor reported a fault.
    pub(crate) error: bool,
}

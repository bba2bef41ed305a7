use super::core::Loop;

use std::cell::RefCell;

thread_local! {
    /// Thread-local default loop.
    ///
    /// Created lazily by [`Loop::current`] and shared by every
    /// `current()` call made on this thread afterwards.
    pub(crate) static CURRENT_LOOP: RefCell<Option<Loop>> = const { RefCell::new(None) };
}

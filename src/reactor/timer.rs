use std::cmp::Ordering;
use std::time::Instant;

/// One scheduled expiry in the loop's timer heap.
///
/// Ordering is inverted so `BinaryHeap` pops the nearest deadline
/// first. Entries are validated against the registration table on
/// pop; an entry whose token no longer matches a live registration
/// is stale and is skipped.
pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    pub(crate) token: u64,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline.eq(&other.deadline)
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

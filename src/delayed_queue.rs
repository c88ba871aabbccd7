//! A small ordered queue of GPIO events pending for a fixed number of DREQ cycles. See
//! [`DelayedEventQueue`] for more information.

use crate::bitstream::Event;
use alloc::vec::Vec;

/// An ordered list of `(event, remaining)` pairs, sorted ascending by `remaining`, with
/// `remaining >= 1` always.
///
/// Structural equality (not identity) between two queues is the key to loop-close detection in
/// the compiler: two queues are equal iff their pair sequences are identical, which is exactly
/// what `#[derive(PartialEq)]` gives us here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelayedEventQueue {
    pending: Vec<(Event, u32)>,
}

impl DelayedEventQueue {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Appends `event` with `remaining = delay`.
    ///
    /// This only preserves sort order because every insertion uses the same `delay`, which is
    /// always at least as large as any currently-remaining count (remaining counts only ever
    /// decrease, via [`Self::countdown`]). If a future caller ever needs varying delays, this
    /// queue must become a true priority queue instead.
    pub fn add(&mut self, event: Event, delay: u32) {
        debug_assert!(delay >= 1, "delay must be at least 1 DREQ cycle");
        self.pending.push((event, delay));
    }

    /// Collects every entry whose `remaining` equals 1, in order, removing them from the queue,
    /// then decrements the `remaining` of everything left behind by 1.
    ///
    /// After this call, every remaining entry's `remaining` is at least 1 again.
    #[must_use]
    pub fn countdown(&mut self) -> Vec<Event> {
        let due_count = self.pending.iter().take_while(|&&(_, r)| r == 1).count();
        let due = self
            .pending
            .drain(..due_count)
            .map(|(event, _)| event)
            .collect();
        for (_, remaining) in &mut self.pending {
            *remaining = remaining.saturating_sub(1);
        }
        due
    }

    /// Returns `true` if no events are currently pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_on_empty_queue_is_empty() {
        let mut queue = DelayedEventQueue::new();
        assert!(queue.countdown().is_empty());
    }

    #[test]
    fn add_then_two_countdowns_fires_event() {
        let mut queue = DelayedEventQueue::new();
        queue.add(Event::RailComCutoutStart, 2);
        assert!(queue.countdown().is_empty());
        assert_eq!(queue.countdown(), alloc::vec![Event::RailComCutoutStart]);
        assert!(queue.is_empty());
    }

    #[test]
    fn fifo_due_order_preserved() {
        let mut queue = DelayedEventQueue::new();
        queue.add(Event::RailComCutoutStart, 2);
        queue.countdown();
        queue.add(Event::DebugStart, 2);
        // RailComCutoutStart is now due (remaining 1), DebugStart just queued (remaining 2)
        let due = queue.countdown();
        assert_eq!(due, alloc::vec![Event::RailComCutoutStart]);
        assert!(!queue.is_empty());
    }

    #[test]
    fn equality_is_structural() {
        let mut a = DelayedEventQueue::new();
        let mut b = DelayedEventQueue::new();
        assert_eq!(a, b);
        a.add(Event::DebugEnd, 2);
        assert_ne!(a, b);
        b.add(Event::DebugEnd, 2);
        assert_eq!(a, b);
    }

    #[test]
    fn remaining_never_drops_below_one_after_countdown() {
        let mut queue = DelayedEventQueue::new();
        queue.add(Event::DebugStart, 2);
        queue.add(Event::DebugEnd, 2);
        queue.countdown();
        assert!(queue.pending.iter().all(|&(_, remaining)| remaining >= 1));
    }
}

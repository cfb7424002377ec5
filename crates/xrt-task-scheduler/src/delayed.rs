//! Delayed task manager: holds tasks until their run time passes.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Callback invoked when the earliest pending run time moves earlier.
pub type RunTimeUpdated = Box<dyn Fn() + Send + Sync + 'static>;

/// Entry in the delayed heap
struct DelayedEntry<T> {
    /// When the item becomes eligible
    run_at: Instant,
    /// Insertion order, keeps equal run times FIFO
    seq: u64,
    item: T,
}

// Reverse ordering for min-heap (earliest run time first)
impl<T> Ord for DelayedEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for DelayedEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for DelayedEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}

impl<T> Eq for DelayedEntry<T> {}

struct DelayedState<T> {
    pending: BinaryHeap<DelayedEntry<T>>,
    next_seq: u64,
}

/// Time-ordered set of items that are not yet eligible to run.
///
/// The manager never runs anything itself: the service thread sleeps until
/// [`next_run_time`](Self::next_run_time), then calls
/// [`drain_expired`](Self::drain_expired) and re-posts what it gets back.
pub struct DelayedTaskManager<T> {
    state: Mutex<DelayedState<T>>,
    on_run_time_updated: RunTimeUpdated,
}

impl<T> DelayedTaskManager<T> {
    pub fn new(on_run_time_updated: RunTimeUpdated) -> Self {
        Self {
            state: Mutex::new(DelayedState {
                pending: BinaryHeap::new(),
                next_seq: 0,
            }),
            on_run_time_updated,
        }
    }

    /// Add an item that becomes eligible at `run_at`.
    ///
    /// A `run_at` in the past is accepted; the item is returned by the next
    /// `drain_expired` call.
    pub fn add(&self, item: T, run_at: Instant) {
        let became_earliest = {
            let mut state = self.state.lock();
            let became_earliest = state
                .pending
                .peek()
                .map_or(true, |earliest| run_at < earliest.run_at);

            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(DelayedEntry { run_at, seq, item });
            became_earliest
        };

        // Outside the lock: the callback takes the service thread's lock,
        // which is acquired before ours on the other side.
        if became_earliest {
            (self.on_run_time_updated)();
        }
    }

    /// Remove and return every item whose run time is at or before `now`,
    /// earliest first.
    pub fn drain_expired(&self, now: Instant) -> Vec<T> {
        let mut state = self.state.lock();
        let mut expired = Vec::new();
        while state
            .pending
            .peek()
            .is_some_and(|entry| entry.run_at <= now)
        {
            if let Some(entry) = state.pending.pop() {
                expired.push(entry.item);
            }
        }
        expired
    }

    /// Earliest pending run time, or None when nothing is pending.
    pub fn next_run_time(&self) -> Option<Instant> {
        self.state.lock().pending.peek().map(|entry| entry.run_at)
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }
}

//! Sequence: an ordered queue of tasks run one at a time.
//!
//! A `Sequence` does no locking of its own. It lives inside a worker pool's
//! arena and is only touched under the pool lock; the pool hands it to at most
//! one worker at a time, which is what makes its tasks run in order and never
//! overlap.

use crate::task::Task;
use crate::traits::TaskPriority;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Stable identifier of a sequence within its pool's arena
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SequenceId(u64);

static NEXT_SEQUENCE_ID: AtomicU64 = AtomicU64::new(1);

impl SequenceId {
    /// Create a new unique sequence ID
    pub fn new() -> Self {
        Self(NEXT_SEQUENCE_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for SequenceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordering key of a ready sequence.
///
/// Higher priority wins; for equal priority the sequence that became ready
/// first wins. `ready_order` is a per-pool counter assigned on every
/// (re)insertion into a ready heap, so a sequence that just ran a task goes
/// behind sequences of the same priority that were already waiting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SequenceSortKey {
    pub priority: TaskPriority,
    pub ready_order: u64,
}

impl Ord for SequenceSortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            // lower ready_order is older, and must compare greater for the max-heap
            .then_with(|| other.ready_order.cmp(&self.ready_order))
    }
}

impl PartialOrd for SequenceSortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// FIFO queue of tasks
#[derive(Debug, Default)]
pub struct Sequence {
    tasks: VecDeque<Task>,
}

impl Sequence {
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
        }
    }

    /// Append a task. Returns true if the sequence was empty before the push.
    pub fn push(&mut self, task: Task) -> bool {
        let was_empty = self.tasks.is_empty();
        self.tasks.push_back(task);
        was_empty
    }

    /// Remove the head task.
    pub fn take(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Sort key for the head task, or None when empty.
    pub fn sort_key(&self, ready_order: u64) -> Option<SequenceSortKey> {
        self.tasks.front().map(|task| SequenceSortKey {
            priority: task.traits().priority(),
            ready_order,
        })
    }
}

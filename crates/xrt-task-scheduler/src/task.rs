//! Task structure: a unit of work plus its origin and traits

use crate::traits::TaskTraits;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Boxed work carried by a task.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a task was posted from. Used only for diagnostics.
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Source location of the posting call
    Location(&'static Location<'static>),
    /// Free-form label
    Named(&'static str),
}

impl Origin {
    /// Capture the caller's source location.
    #[track_caller]
    pub fn here() -> Self {
        Origin::Location(Location::caller())
    }

    pub const fn named(label: &'static str) -> Self {
        Origin::Named(label)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Location(loc) => write!(f, "{}:{}", loc.file(), loc.line()),
            Origin::Named(label) => f.write_str(label),
        }
    }
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A unit of work posted to the scheduler.
///
/// Immutable once created and consumed exactly once by [`Task::run`].
pub struct Task {
    id: TaskId,
    origin: Origin,
    traits: TaskTraits,
    work: Work,
    /// When the task was posted
    posted_at: Instant,
    /// Earliest time the task may run, for delayed tasks
    delayed_run_time: Option<Instant>,
}

impl Task {
    /// Create a task that is eligible to run immediately.
    pub fn new(origin: Origin, traits: TaskTraits, work: Work) -> Self {
        Self {
            id: TaskId::new(),
            origin,
            traits,
            work,
            posted_at: Instant::now(),
            delayed_run_time: None,
        }
    }

    /// Create a task that may not run before `run_at`.
    pub fn delayed(origin: Origin, traits: TaskTraits, work: Work, run_at: Instant) -> Self {
        Self {
            delayed_run_time: Some(run_at),
            ..Self::new(origin, traits, work)
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn traits(&self) -> &TaskTraits {
        &self.traits
    }

    pub fn posted_at(&self) -> Instant {
        self.posted_at
    }

    pub fn delayed_run_time(&self) -> Option<Instant> {
        self.delayed_run_time
    }

    /// Run the work, consuming the task.
    pub fn run(self) {
        (self.work)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("traits", &self.traits)
            .field("delayed_run_time", &self.delayed_run_time)
            .finish_non_exhaustive()
    }
}

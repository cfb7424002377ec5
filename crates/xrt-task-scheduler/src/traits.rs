//! Task traits: the scheduling metadata attached to every posted task.

use std::fmt;

/// How urgently a task should run relative to other ready work in its pool.
///
/// Variants are ordered: `Background < UserVisible < UserBlocking`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum TaskPriority {
    /// Work the user will not notice if it is delayed
    Background,
    /// Work whose result the user will eventually see
    UserVisible,
    /// Work the user is actively waiting on
    UserBlocking,
}

impl TaskPriority {
    /// All priorities, lowest first.
    pub const ALL: [TaskPriority; 3] = [
        TaskPriority::Background,
        TaskPriority::UserVisible,
        TaskPriority::UserBlocking,
    ];
}

/// What happens to a task when the scheduler shuts down.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TaskShutdownBehavior {
    /// May keep running after shutdown completes; never delays shutdown
    ContinueOnShutdown,
    /// Dropped if not started when shutdown begins; delays shutdown only while running
    SkipOnShutdown,
    /// Always runs; shutdown waits for it
    BlockShutdown,
}

impl TaskShutdownBehavior {
    /// All shutdown behaviors.
    pub const ALL: [TaskShutdownBehavior; 3] = [
        TaskShutdownBehavior::ContinueOnShutdown,
        TaskShutdownBehavior::SkipOnShutdown,
        TaskShutdownBehavior::BlockShutdown,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            TaskShutdownBehavior::ContinueOnShutdown => 0,
            TaskShutdownBehavior::SkipOnShutdown => 1,
            TaskShutdownBehavior::BlockShutdown => 2,
        }
    }
}

/// Scheduling metadata for a task.
///
/// Traits are plain values: the builder methods return a modified copy.
///
/// ```ignore
/// let traits = TaskTraits::new()
///     .with_priority(TaskPriority::Background)
///     .with_shutdown_behavior(TaskShutdownBehavior::BlockShutdown)
///     .may_block();
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskTraits {
    priority: TaskPriority,
    shutdown_behavior: TaskShutdownBehavior,
    may_block: bool,
}

impl TaskTraits {
    /// Default traits: user-visible, skip-on-shutdown, no blocking calls.
    pub const fn new() -> Self {
        Self {
            priority: TaskPriority::UserVisible,
            shutdown_behavior: TaskShutdownBehavior::SkipOnShutdown,
            may_block: false,
        }
    }

    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub const fn with_shutdown_behavior(mut self, behavior: TaskShutdownBehavior) -> Self {
        self.shutdown_behavior = behavior;
        self
    }

    /// Allow tasks with these traits to perform blocking calls (file I/O, waits).
    pub const fn may_block(mut self) -> Self {
        self.may_block = true;
        self
    }

    pub const fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub const fn shutdown_behavior(&self) -> TaskShutdownBehavior {
        self.shutdown_behavior
    }

    pub const fn blocking_allowed(&self) -> bool {
        self.may_block
    }
}

impl Default for TaskTraits {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskTraits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TaskTraits {{ priority: {:?}, shutdown: {:?}, may_block: {} }}",
            self.priority, self.shutdown_behavior, self.may_block
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_traits() {
        let traits = TaskTraits::default();
        assert_eq!(traits.priority(), TaskPriority::UserVisible);
        assert_eq!(
            traits.shutdown_behavior(),
            TaskShutdownBehavior::SkipOnShutdown
        );
        assert!(!traits.blocking_allowed());
    }

    #[test]
    fn test_builder_returns_new_value() {
        let base = TaskTraits::new();
        let derived = base
            .with_priority(TaskPriority::Background)
            .with_shutdown_behavior(TaskShutdownBehavior::BlockShutdown)
            .may_block();

        // base is untouched
        assert_eq!(base, TaskTraits::new());
        assert_eq!(derived.priority(), TaskPriority::Background);
        assert_eq!(
            derived.shutdown_behavior(),
            TaskShutdownBehavior::BlockShutdown
        );
        assert!(derived.blocking_allowed());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::UserBlocking > TaskPriority::UserVisible);
        assert!(TaskPriority::UserVisible > TaskPriority::Background);
    }

    #[test]
    fn test_shutdown_behavior_indices_are_distinct() {
        let mut seen = [false; 3];
        for behavior in TaskShutdownBehavior::ALL {
            assert!(!seen[behavior.index()]);
            seen[behavior.index()] = true;
        }
    }
}

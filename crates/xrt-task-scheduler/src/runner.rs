//! Task runners: handles that post tasks with fixed traits and ordering

use crate::pool::{current_sequence, SequenceToken};
use crate::scheduler::SchedulerCore;
use crate::task::Origin;
use crate::traits::TaskTraits;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How tasks posted through a [`TaskRunner`] relate to each other.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// No ordering; tasks may run concurrently.
    Parallel,
    /// One at a time, in posting order, on any worker of the pool.
    Sequenced,
    /// Like `Sequenced`, and always on the same worker thread.
    SingleThread,
}

/// Handle posting tasks with fixed traits in one [`ExecutionMode`].
///
/// Clones share the same sequence. The sequence outlives the handle until
/// its queued tasks have run.
#[derive(Clone)]
pub struct TaskRunner {
    core: Arc<SchedulerCore>,
    traits: TaskTraits,
    mode: ExecutionMode,
    sequence: Option<SequenceToken>,
}

impl TaskRunner {
    pub(crate) fn new(core: Arc<SchedulerCore>, traits: TaskTraits, mode: ExecutionMode) -> Self {
        let sequence = match mode {
            ExecutionMode::Parallel => None,
            ExecutionMode::Sequenced => Some(core.pool_for_traits(&traits).create_sequence(false)),
            ExecutionMode::SingleThread => {
                Some(core.pool_for_traits(&traits).create_sequence(true))
            }
        };

        Self {
            core,
            traits,
            mode,
            sequence,
        }
    }

    /// Post a task. Returns false if it was rejected because shutdown began.
    pub fn post_task(&self, origin: Origin, work: impl FnOnce() + Send + 'static) -> bool {
        self.post_delayed_task(origin, work, Duration::ZERO)
    }

    /// Post a task that may not run before `delay` has elapsed.
    ///
    /// In sequenced modes, the task joins the sequence when its delay
    /// expires, behind anything posted before then.
    pub fn post_delayed_task(
        &self,
        origin: Origin,
        work: impl FnOnce() + Send + 'static,
        delay: Duration,
    ) -> bool {
        let task = SchedulerCore::make_task(origin, self.traits, work, delay);
        self.core.post(task, self.sequence.as_ref())
    }

    /// Whether the calling thread is running a task of this runner's sequence.
    ///
    /// Always false for parallel runners.
    pub fn runs_tasks_in_current_sequence(&self) -> bool {
        match &self.sequence {
            Some(token) => current_sequence() == Some(token.id()),
            None => false,
        }
    }

    pub fn traits(&self) -> TaskTraits {
        self.traits
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("traits", &self.traits)
            .field("mode", &self.mode)
            .field("sequence", &self.sequence.as_ref().map(SequenceToken::id))
            .finish()
    }
}

//! Task tracker: shutdown state machine and outstanding-task accounting
//!
//! Every task passes through the tracker twice: once when it is posted
//! ([`TaskTracker::will_post`]) and once when a worker dequeues it
//! ([`TaskTracker::run_task`]). Between the two the task is "outstanding" and
//! counted under its shutdown behavior.

use crate::task::Task;
use crate::traits::{TaskShutdownBehavior, TaskTraits};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Shutdown phase. Transitions only move forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    ShuttingDown,
    ShutdownComplete,
}

struct TrackerState {
    phase: ShutdownPhase,
    /// Accepted but not yet finished, indexed by `TaskShutdownBehavior::index`
    outstanding: [usize; 3],
    /// Skip-on-shutdown tasks that started and have not finished
    running_skip_on_shutdown: usize,
}

impl TrackerState {
    /// Number of tasks shutdown still has to wait for.
    fn shutdown_gate(&self) -> usize {
        self.outstanding[TaskShutdownBehavior::BlockShutdown.index()]
            + self.running_skip_on_shutdown
    }

    fn total_outstanding(&self) -> usize {
        self.outstanding.iter().sum()
    }
}

/// How [`TaskTracker::run_task`] disposed of a task
#[derive(Debug)]
pub enum TaskRun {
    Completed,
    /// Dropped because shutdown had begun
    Skipped,
    /// The task panicked; carries the panic payload
    Panicked(Box<dyn Any + Send>),
}

impl TaskRun {
    pub fn ran(&self) -> bool {
        !matches!(self, TaskRun::Skipped)
    }
}

/// Counters exposed through scheduler stats.
#[derive(Debug, Default)]
struct TrackerCounters {
    posted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of the tracker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Tasks accepted by `will_post`
    pub tasks_posted: u64,
    /// Tasks refused by `will_post`
    pub tasks_rejected: u64,
    /// Tasks that ran (including ones that panicked)
    pub tasks_completed: u64,
    /// Accepted tasks dropped at dequeue because shutdown had begun
    pub tasks_skipped: u64,
    /// Tasks that panicked
    pub tasks_panicked: u64,
}

/// Tracks outstanding tasks and gates shutdown.
pub struct TaskTracker {
    state: Mutex<TrackerState>,
    /// Signaled when the shutdown gate or the total outstanding count hits zero
    idle: Condvar,
    counters: TrackerCounters,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                phase: ShutdownPhase::Running,
                outstanding: [0; 3],
                running_skip_on_shutdown: 0,
            }),
            idle: Condvar::new(),
            counters: TrackerCounters::default(),
        }
    }

    /// Decide whether a task with `traits` may be posted, and count it if so.
    ///
    /// Returns false iff shutdown has begun and the task is skip-on-shutdown.
    /// A rejected task must be dropped without running.
    pub fn will_post(&self, traits: &TaskTraits) -> bool {
        let behavior = traits.shutdown_behavior();
        let mut state = self.state.lock();

        match (state.phase, behavior) {
            (ShutdownPhase::Running, _) => {}
            (_, TaskShutdownBehavior::SkipOnShutdown) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            (ShutdownPhase::ShutdownComplete, TaskShutdownBehavior::BlockShutdown) => {
                debug_assert!(
                    false,
                    "block-shutdown task posted after shutdown completed"
                );
            }
            _ => {}
        }

        state.outstanding[behavior.index()] += 1;
        self.counters.posted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Run a task previously accepted by [`will_post`](Self::will_post).
    ///
    /// Skip-on-shutdown tasks are dropped instead of run once shutdown has
    /// begun. A panic raised by the task is caught here and counted in
    /// `panics` before the task's accounting is released, so a caller
    /// returning from [`flush`](Self::flush) always observes it.
    pub fn run_task(&self, task: Task, panics: &AtomicU64) -> TaskRun {
        let behavior = task.traits().shutdown_behavior();

        let can_run = {
            let mut state = self.state.lock();
            if behavior == TaskShutdownBehavior::SkipOnShutdown {
                if state.phase != ShutdownPhase::Running {
                    false
                } else {
                    state.running_skip_on_shutdown += 1;
                    true
                }
            } else {
                true
            }
        };

        let _completion = Completion {
            tracker: self,
            behavior,
            ran: can_run,
        };

        if !can_run {
            debug!(origin = %task.origin(), task = task.id().as_u64(), "Skipping task at shutdown");
            return TaskRun::Skipped;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
            Ok(()) => TaskRun::Completed,
            Err(payload) => {
                panics.fetch_add(1, Ordering::Relaxed);
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                TaskRun::Panicked(payload)
            }
        }
    }

    /// Begin shutdown and block until every block-shutdown task, and every
    /// skip-on-shutdown task already running, has finished.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn begin_shutdown(&self) {
        let mut state = self.state.lock();
        assert_eq!(
            state.phase,
            ShutdownPhase::Running,
            "shutdown may only be started once"
        );
        state.phase = ShutdownPhase::ShuttingDown;
        info!(
            pending = state.shutdown_gate(),
            "Task scheduler shutting down"
        );

        while state.shutdown_gate() > 0 {
            self.idle.wait(&mut state);
        }

        state.phase = ShutdownPhase::ShutdownComplete;
        info!("Task scheduler shutdown complete");
    }

    /// Block until no accepted task is outstanding.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        while state.total_outstanding() > 0 {
            self.idle.wait(&mut state);
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.state.lock().phase
    }

    pub fn has_shutdown_started(&self) -> bool {
        self.phase() != ShutdownPhase::Running
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.phase() == ShutdownPhase::ShutdownComplete
    }

    /// Accepted-but-unfinished tasks with the given shutdown behavior.
    pub fn outstanding(&self, behavior: TaskShutdownBehavior) -> usize {
        self.state.lock().outstanding[behavior.index()]
    }

    pub fn total_outstanding(&self) -> usize {
        self.state.lock().total_outstanding()
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            tasks_posted: self.counters.posted.load(Ordering::Relaxed),
            tasks_rejected: self.counters.rejected.load(Ordering::Relaxed),
            tasks_completed: self.counters.completed.load(Ordering::Relaxed),
            tasks_skipped: self.counters.skipped.load(Ordering::Relaxed),
            tasks_panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }

    fn on_task_finished(&self, behavior: TaskShutdownBehavior, ran: bool) {
        let counter = if ran {
            &self.counters.completed
        } else {
            &self.counters.skipped
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        state.outstanding[behavior.index()] -= 1;
        if ran && behavior == TaskShutdownBehavior::SkipOnShutdown {
            state.running_skip_on_shutdown -= 1;
        }

        if state.shutdown_gate() == 0 || state.total_outstanding() == 0 {
            self.idle.notify_all();
        }
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases a task's accounting when dropped, including during unwinding.
struct Completion<'a> {
    tracker: &'a TaskTracker,
    behavior: TaskShutdownBehavior,
    ran: bool,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.tracker.on_task_finished(self.behavior, self.ran);
    }
}

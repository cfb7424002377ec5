//! Main task scheduler coordinating worker pools, the tracker and delayed tasks

use crate::config::{
    default_pool_index_for_traits, IoRestriction, SchedulerConfig, WorkerPoolParams,
    STANDARD_POOL_COUNT,
};
use crate::delayed::DelayedTaskManager;
use crate::error::SchedulerError;
use crate::pool::{PoolStats, SequenceToken, WorkerPool};
use crate::runner::{ExecutionMode, TaskRunner};
use crate::service::{ServiceSignal, ServiceThread};
use crate::task::{Origin, Task};
use crate::tracker::TaskTracker;
use crate::traits::{TaskShutdownBehavior, TaskTraits};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Pool-selection strategy: maps traits to an index into the pool list.
pub type PoolIndexForTraits = Box<dyn Fn(&TaskTraits) -> usize + Send + Sync + 'static>;

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks accepted for execution (delayed tasks count once released)
    pub tasks_posted: u64,

    /// Tasks refused because shutdown had begun
    pub tasks_rejected: u64,

    /// Tasks that ran, including ones that panicked
    pub tasks_completed: u64,

    /// Accepted tasks dropped because shutdown began before they started
    pub tasks_skipped: u64,

    /// Tasks that panicked
    pub tasks_panicked: u64,

    /// Delayed tasks not yet released
    pub delayed_pending: usize,

    /// Per-pool counters, in pool order
    pub pools: Vec<PoolStats>,
}

/// A delayed task and the sequence it will be pushed to, if any
pub(crate) struct DelayedPost {
    task: Task,
    sequence: Option<SequenceToken>,
}

/// State shared by the scheduler, its runners and the service thread.
pub(crate) struct SchedulerCore {
    tracker: Arc<TaskTracker>,
    delayed: Arc<DelayedTaskManager<DelayedPost>>,
    /// Delayed tasks added and not yet re-posted
    delayed_pending: AtomicUsize,
    /// Written once at construction, read-only afterwards
    pools: Vec<Arc<WorkerPool>>,
    pool_index_for_traits: PoolIndexForTraits,
}

impl SchedulerCore {
    /// Resolve the pool for `traits`.
    ///
    /// # Panics
    ///
    /// Panics if the routing function returns an index out of range.
    pub(crate) fn pool_for_traits(&self, traits: &TaskTraits) -> &Arc<WorkerPool> {
        let index = (self.pool_index_for_traits)(traits);
        assert!(
            index < self.pools.len(),
            "pool routing returned index {} for {:?}, but only {} pools exist",
            index,
            traits,
            self.pools.len()
        );

        let pool = &self.pools[index];
        if traits.blocking_allowed() && pool.params().io_restriction == IoRestriction::Disallowed {
            error!(
                pool = %pool.name(),
                ?traits,
                "Blocking task routed to a pool that disallows blocking"
            );
            debug_assert!(
                false,
                "blocking task routed to pool {} which disallows blocking",
                pool.name()
            );
        }
        pool
    }

    /// Build a task for posting.
    ///
    /// Delayed tasks may not block shutdown: a delayed block-shutdown task is
    /// posted as skip-on-shutdown.
    pub(crate) fn make_task(
        origin: Origin,
        traits: TaskTraits,
        work: impl FnOnce() + Send + 'static,
        delay: Duration,
    ) -> Task {
        if delay.is_zero() {
            return Task::new(origin, traits, Box::new(work));
        }

        let traits = if traits.shutdown_behavior() == TaskShutdownBehavior::BlockShutdown {
            traits.with_shutdown_behavior(TaskShutdownBehavior::SkipOnShutdown)
        } else {
            traits
        };
        Task::delayed(origin, traits, Box::new(work), Instant::now() + delay)
    }

    /// Post a task, routed by its traits or pushed to `sequence`.
    ///
    /// Delayed tasks always return true; their acceptance is decided when
    /// they are released.
    pub(crate) fn post(&self, task: Task, sequence: Option<&SequenceToken>) -> bool {
        if let Some(run_at) = task.delayed_run_time() {
            // Resolve routing on the poster's thread: a bad index must panic
            // here, not later on the service thread.
            if sequence.is_none() {
                self.pool_for_traits(task.traits());
            }

            self.delayed_pending.fetch_add(1, Ordering::AcqRel);
            self.delayed.add(
                DelayedPost {
                    task,
                    sequence: sequence.cloned(),
                },
                run_at,
            );
            return true;
        }
        self.post_now(task, sequence)
    }

    /// Post a task that is eligible to run now.
    fn post_now(&self, task: Task, sequence: Option<&SequenceToken>) -> bool {
        let pool = match sequence {
            Some(_) => None,
            None => Some(self.pool_for_traits(task.traits())),
        };

        if !self.tracker.will_post(task.traits()) {
            debug!(
                origin = %task.origin(),
                task = task.id().as_u64(),
                "Rejected skip-on-shutdown task posted during shutdown"
            );
            return false;
        }

        match (sequence, pool) {
            (Some(token), _) => token.push(task),
            (None, Some(pool)) => pool.post_task(task),
            (None, None) => unreachable!("a routed post always resolves a pool"),
        }
        true
    }

    /// Re-post a delayed task whose run time has passed.
    fn release_delayed(&self, post: DelayedPost) {
        self.post_now(post.task, post.sequence.as_ref());
        self.delayed_pending.fetch_sub(1, Ordering::AcqRel);
    }

    fn is_drained(&self) -> bool {
        self.delayed_pending.load(Ordering::Acquire) == 0 && self.tracker.total_outstanding() == 0
    }
}

/// In-process task scheduler.
///
/// Created once at startup (see [`crate::global`]) and never destroyed in
/// production. Tests may own a private instance; it must be torn down with
/// [`shutdown`](Self::shutdown) (or a drain) then
/// [`join_for_testing`](Self::join_for_testing) before it is dropped.
pub struct TaskScheduler {
    core: Arc<SchedulerCore>,
    service: ServiceThread,
    joined: AtomicBool,
}

impl TaskScheduler {
    /// Create a scheduler with the given pools and routing function.
    ///
    /// `pool_index_for_traits` must return an index into `pools` for every
    /// traits value, including values added in the future.
    pub fn try_create<F>(
        pools: Vec<WorkerPoolParams>,
        pool_index_for_traits: F,
    ) -> Result<Self, SchedulerError>
    where
        F: Fn(&TaskTraits) -> usize + Send + Sync + 'static,
    {
        crate::config::validate_pools(&pools)?;

        let tracker = Arc::new(TaskTracker::new());
        let signal = ServiceSignal::new();
        let notify = Arc::clone(&signal);
        let delayed = Arc::new(DelayedTaskManager::new(Box::new(move || notify.notify())));

        let mut started: Vec<Arc<WorkerPool>> = Vec::with_capacity(pools.len());
        for params in pools {
            match WorkerPool::start(params, Arc::clone(&tracker)) {
                Ok(pool) => started.push(pool),
                Err(e) => {
                    started.iter().for_each(|pool| pool.join_for_testing());
                    return Err(e);
                }
            }
        }

        let core = Arc::new(SchedulerCore {
            tracker,
            delayed: Arc::clone(&delayed),
            delayed_pending: AtomicUsize::new(0),
            pools: started,
            pool_index_for_traits: Box::new(pool_index_for_traits),
        });

        let service_core = Arc::clone(&core);
        let service = match ServiceThread::start(signal, delayed, move |post| {
            service_core.release_delayed(post)
        }) {
            Ok(service) => service,
            Err(e) => {
                core.pools.iter().for_each(|pool| pool.join_for_testing());
                return Err(e);
            }
        };

        info!(pools = core.pools.len(), "Task scheduler started");
        Ok(Self {
            core,
            service,
            joined: AtomicBool::new(false),
        })
    }

    /// Create a scheduler, panicking on invalid configuration.
    pub fn create<F>(pools: Vec<WorkerPoolParams>, pool_index_for_traits: F) -> Self
    where
        F: Fn(&TaskTraits) -> usize + Send + Sync + 'static,
    {
        match Self::try_create(pools, pool_index_for_traits) {
            Ok(scheduler) => scheduler,
            Err(e) => panic!("Failed to create task scheduler: {}", e),
        }
    }

    /// Create a scheduler from a config, routed by
    /// [`default_pool_index_for_traits`].
    ///
    /// The config must follow the layout of [`SchedulerConfig::standard`];
    /// fewer pools than the default routing can return is an error.
    pub fn from_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        if config.pools.len() < STANDARD_POOL_COUNT {
            return Err(SchedulerError::MissingStandardPools {
                expected: STANDARD_POOL_COUNT,
                found: config.pools.len(),
            });
        }
        Self::try_create(config.pools, default_pool_index_for_traits)
    }

    /// Post a task. Returns false if it was rejected because shutdown began.
    pub fn post_task_with_traits(
        &self,
        origin: Origin,
        traits: TaskTraits,
        work: impl FnOnce() + Send + 'static,
    ) -> bool {
        self.post_delayed_task_with_traits(origin, traits, work, Duration::ZERO)
    }

    /// Post a task that may not run before `delay` has elapsed.
    pub fn post_delayed_task_with_traits(
        &self,
        origin: Origin,
        traits: TaskTraits,
        work: impl FnOnce() + Send + 'static,
        delay: Duration,
    ) -> bool {
        let task = SchedulerCore::make_task(origin, traits, work, delay);
        self.core.post(task, None)
    }

    /// Create a handle posting tasks with `traits` in the given mode.
    pub fn create_task_runner_with_traits(
        &self,
        traits: TaskTraits,
        mode: ExecutionMode,
    ) -> TaskRunner {
        TaskRunner::new(Arc::clone(&self.core), traits, mode)
    }

    /// Begin shutdown and block until every block-shutdown task has run.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn shutdown(&self) {
        self.core.tracker.begin_shutdown();
    }

    /// Block until every accepted task has run and no delayed task is pending.
    pub fn flush_for_testing(&self) {
        loop {
            self.core.tracker.flush();
            if self.core.is_drained() {
                return;
            }

            let pause = self
                .core
                .delayed
                .next_run_time()
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or_default()
                .max(Duration::from_millis(1));
            thread::sleep(pause);
        }
    }

    /// Join every worker thread and the service thread.
    ///
    /// Tasks still queued are dropped. Running tasks finish first.
    ///
    /// # Panics
    ///
    /// Panics if called twice, or before [`shutdown`](Self::shutdown) has
    /// returned unless the scheduler is drained.
    pub fn join_for_testing(&self) {
        assert!(
            self.core.tracker.is_shutdown_complete() || self.core.is_drained(),
            "join_for_testing requires shutdown() or a drained scheduler"
        );
        assert!(
            !self.joined.swap(true, Ordering::AcqRel),
            "join_for_testing may only be called once"
        );

        self.service.stop();
        for pool in &self.core.pools {
            pool.join_for_testing();
        }
        info!("Task scheduler joined");
    }

    /// Whether shutdown has completed.
    pub fn is_shutdown_complete(&self) -> bool {
        self.core.tracker.is_shutdown_complete()
    }

    /// Number of worker pools
    pub fn worker_pool_count(&self) -> usize {
        self.core.pools.len()
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let tracker = self.core.tracker.stats();
        let pools: Vec<PoolStats> = self.core.pools.iter().map(|pool| pool.stats()).collect();

        SchedulerStats {
            tasks_posted: tracker.tasks_posted,
            tasks_rejected: tracker.tasks_rejected,
            tasks_completed: tracker.tasks_completed,
            tasks_skipped: tracker.tasks_skipped,
            tasks_panicked: tracker.tasks_panicked,
            delayed_pending: self.core.delayed_pending.load(Ordering::Acquire),
            pools,
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if !thread::panicking() {
            debug_assert!(
                self.joined.load(Ordering::Acquire),
                "TaskScheduler dropped without join_for_testing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::TaskPriority;
    use parking_lot::Mutex;

    fn two_pool_scheduler() -> TaskScheduler {
        TaskScheduler::create(
            vec![
                WorkerPoolParams::new("background", 1),
                WorkerPoolParams::new("foreground", 2),
            ],
            |traits: &TaskTraits| match traits.priority() {
                TaskPriority::Background => 0,
                _ => 1,
            },
        )
    }

    fn teardown(scheduler: TaskScheduler) {
        scheduler.shutdown();
        scheduler.join_for_testing();
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = two_pool_scheduler();
        assert_eq!(scheduler.worker_pool_count(), 2);
        assert_eq!(scheduler.stats().pools[1].workers_spawned, 2);
        teardown(scheduler);
    }

    #[test]
    fn test_try_create_rejects_bad_config() {
        assert!(matches!(
            TaskScheduler::try_create(Vec::new(), |_: &TaskTraits| 0),
            Err(SchedulerError::NoWorkerPools)
        ));
        assert!(matches!(
            TaskScheduler::try_create(
                vec![WorkerPoolParams::new("a", 1), WorkerPoolParams::new("a", 1)],
                |_: &TaskTraits| 0
            ),
            Err(SchedulerError::DuplicatePoolName(_))
        ));
    }

    #[test]
    #[should_panic(expected = "Failed to create task scheduler")]
    fn test_create_is_fatal_on_bad_config() {
        let _ = TaskScheduler::create(vec![WorkerPoolParams::new("none", 0)], |_: &TaskTraits| 0);
    }

    #[test]
    fn test_tasks_routed_by_traits() {
        let scheduler = two_pool_scheduler();
        let threads = Arc::new(Mutex::new(Vec::new()));

        for priority in [TaskPriority::Background, TaskPriority::UserBlocking] {
            let threads = threads.clone();
            assert!(scheduler.post_task_with_traits(
                Origin::here(),
                TaskTraits::new().with_priority(priority),
                move || {
                    let name = thread::current().name().unwrap_or_default().to_owned();
                    threads.lock().push((priority, name));
                },
            ));
        }
        scheduler.flush_for_testing();

        for (priority, name) in threads.lock().iter() {
            match priority {
                TaskPriority::Background => assert!(name.starts_with("background-worker-")),
                _ => assert!(name.starts_with("foreground-worker-")),
            }
        }
        teardown(scheduler);
    }

    #[test]
    fn test_out_of_range_routing_panics() {
        let scheduler =
            TaskScheduler::create(vec![WorkerPoolParams::new("only", 1)], |_: &TaskTraits| 5);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scheduler.post_task_with_traits(Origin::here(), TaskTraits::new(), || {})
        }));
        assert!(result.is_err());
        teardown(scheduler);
    }

    #[test]
    fn test_delayed_post_with_bad_routing_panics_on_poster() {
        let scheduler = TaskScheduler::create(
            vec![WorkerPoolParams::new("delayed-routing", 1)],
            |traits: &TaskTraits| match traits.priority() {
                TaskPriority::Background => 7,
                _ => 0,
            },
        );

        let background = TaskTraits::new().with_priority(TaskPriority::Background);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scheduler.post_delayed_task_with_traits(
                Origin::here(),
                background,
                || {},
                Duration::from_millis(1),
            )
        }));
        assert!(result.is_err());
        assert_eq!(scheduler.stats().delayed_pending, 0);

        // The service thread is still releasing delayed tasks.
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        assert!(scheduler.post_delayed_task_with_traits(
            Origin::here(),
            TaskTraits::new(),
            move || *flag.lock() = true,
            Duration::from_millis(10),
        ));
        scheduler.flush_for_testing();
        assert!(*ran.lock());
        assert_eq!(scheduler.stats().delayed_pending, 0);
        teardown(scheduler);
    }

    #[test]
    fn test_from_config_rejects_missing_standard_pools() {
        let config = SchedulerConfig::new(vec![
            WorkerPoolParams::new("background", 1),
            WorkerPoolParams::new("foreground", 1),
        ]);
        assert!(matches!(
            TaskScheduler::from_config(config),
            Err(SchedulerError::MissingStandardPools {
                expected: 4,
                found: 2
            })
        ));
    }

    #[test]
    fn test_delayed_block_shutdown_is_downgraded() {
        let task = SchedulerCore::make_task(
            Origin::here(),
            TaskTraits::new().with_shutdown_behavior(TaskShutdownBehavior::BlockShutdown),
            || {},
            Duration::from_millis(10),
        );
        assert_eq!(
            task.traits().shutdown_behavior(),
            TaskShutdownBehavior::SkipOnShutdown
        );
        assert!(task.delayed_run_time().is_some());

        let immediate = SchedulerCore::make_task(
            Origin::here(),
            TaskTraits::new().with_shutdown_behavior(TaskShutdownBehavior::BlockShutdown),
            || {},
            Duration::ZERO,
        );
        assert_eq!(
            immediate.traits().shutdown_behavior(),
            TaskShutdownBehavior::BlockShutdown
        );
        assert!(immediate.delayed_run_time().is_none());
    }

    #[test]
    fn test_delayed_task_runs_after_delay() {
        let scheduler = two_pool_scheduler();
        let ran_at = Arc::new(Mutex::new(None));
        let slot = ran_at.clone();

        let posted_at = Instant::now();
        assert!(scheduler.post_delayed_task_with_traits(
            Origin::here(),
            TaskTraits::new(),
            move || *slot.lock() = Some(Instant::now()),
            Duration::from_millis(50),
        ));
        assert_eq!(scheduler.stats().delayed_pending, 1);

        scheduler.flush_for_testing();
        let ran_at = ran_at.lock().expect("delayed task should have run");
        assert!(ran_at.duration_since(posted_at) >= Duration::from_millis(50));
        assert_eq!(scheduler.stats().delayed_pending, 0);
        teardown(scheduler);
    }

    #[test]
    fn test_join_after_drain_without_shutdown() {
        let scheduler = two_pool_scheduler();
        scheduler.post_task_with_traits(Origin::here(), TaskTraits::new(), || {});
        scheduler.flush_for_testing();
        scheduler.join_for_testing();
    }

    #[test]
    #[should_panic(expected = "may only be called once")]
    fn test_double_join_panics() {
        let scheduler = two_pool_scheduler();
        scheduler.shutdown();
        scheduler.join_for_testing();
        scheduler.join_for_testing();
    }

    #[test]
    fn test_stats_count_panics() {
        let scheduler = two_pool_scheduler();
        scheduler.post_task_with_traits(Origin::here(), TaskTraits::new(), || panic!("fault"));
        scheduler.post_task_with_traits(Origin::here(), TaskTraits::new(), || {});
        scheduler.flush_for_testing();

        let stats = scheduler.stats();
        assert_eq!(stats.tasks_posted, 2);
        assert_eq!(stats.tasks_completed, 2);
        assert_eq!(stats.tasks_panicked, 1);
        assert_eq!(stats.pools[1].tasks_panicked, 1);
        teardown(scheduler);
    }
}

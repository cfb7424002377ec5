//! In-process task scheduler
//!
//! Callers post closures annotated with [`TaskTraits`] (priority, shutdown
//! behavior, whether they may block). A routing function sends each task to
//! one of a fixed set of worker pools. Tasks can be posted directly, after a
//! delay, or through a [`TaskRunner`] that runs them in parallel, in sequence,
//! or in sequence on a single thread.
//!
//! ```ignore
//! let scheduler = TaskScheduler::from_config(SchedulerConfig::standard())?;
//! scheduler.post_task_with_traits(Origin::here(), TaskTraits::new(), || {
//!     // work
//! });
//! scheduler.shutdown();
//! scheduler.join_for_testing();
//! ```
//!
//! Shutdown refuses new skip-on-shutdown work, drops queued skip-on-shutdown
//! tasks that have not started, and waits for every block-shutdown task.

mod config;
mod delayed;
mod error;
pub mod global;
mod pool;
mod runner;
mod scheduler;
mod sequence;
mod service;
mod task;
pub mod thread_restrictions;
mod tracker;
mod traits;

pub use config::{
    default_pool_index_for_traits, validate_pools, IoRestriction, SchedulerConfig, ThreadPriority,
    WorkerCreation, WorkerPoolParams, BACKGROUND_BLOCKING_POOL, BACKGROUND_POOL,
    FOREGROUND_BLOCKING_POOL, FOREGROUND_POOL, STANDARD_POOL_COUNT,
};
pub use delayed::DelayedTaskManager;
pub use error::SchedulerError;
pub use pool::{PoolStats, SequenceToken, WorkerPool};
pub use runner::{ExecutionMode, TaskRunner};
pub use scheduler::{PoolIndexForTraits, SchedulerStats, TaskScheduler};
pub use sequence::{Sequence, SequenceId, SequenceSortKey};
pub use service::{ServiceSignal, ServiceThread, SERVICE_THREAD_NAME};
pub use task::{Origin, Task, TaskId, Work};
pub use tracker::{ShutdownPhase, TaskRun, TaskTracker, TrackerStats};
pub use traits::{TaskPriority, TaskShutdownBehavior, TaskTraits};

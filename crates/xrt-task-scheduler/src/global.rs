//! Process-wide scheduler instance
//!
//! Initialized once at startup and never torn down. Components that cannot
//! be handed a scheduler reach it through [`instance`].

use crate::config::{SchedulerConfig, WorkerPoolParams};
use crate::error::SchedulerError;
use crate::runner::{ExecutionMode, TaskRunner};
use crate::scheduler::TaskScheduler;
use crate::task::Origin;
use crate::traits::TaskTraits;
use once_cell::sync::OnceCell;
use std::time::Duration;

static INSTANCE: OnceCell<TaskScheduler> = OnceCell::new();

/// Create the process-wide scheduler.
///
/// Fails with [`SchedulerError::AlreadyInitialized`] if one already exists.
pub fn initialize<F>(
    pools: Vec<WorkerPoolParams>,
    pool_index_for_traits: F,
) -> Result<&'static TaskScheduler, SchedulerError>
where
    F: Fn(&TaskTraits) -> usize + Send + Sync + 'static,
{
    let mut created = false;
    let scheduler = INSTANCE.get_or_try_init(|| {
        created = true;
        TaskScheduler::try_create(pools, pool_index_for_traits)
    })?;

    if !created {
        return Err(SchedulerError::AlreadyInitialized);
    }
    Ok(scheduler)
}

/// Create the process-wide scheduler from a config with the default routing.
pub fn initialize_with_config(
    config: SchedulerConfig,
) -> Result<&'static TaskScheduler, SchedulerError> {
    initialize(config.pools, crate::config::default_pool_index_for_traits)
}

/// The process-wide scheduler, if initialized.
pub fn instance() -> Option<&'static TaskScheduler> {
    INSTANCE.get()
}

fn expect_instance() -> &'static TaskScheduler {
    match instance() {
        Some(scheduler) => scheduler,
        None => panic!("the process-wide task scheduler is not initialized"),
    }
}

/// Post a task to the process-wide scheduler.
///
/// # Panics
///
/// Panics if [`initialize`] has not succeeded.
#[track_caller]
pub fn post_task_with_traits(traits: TaskTraits, work: impl FnOnce() + Send + 'static) -> bool {
    expect_instance().post_task_with_traits(Origin::here(), traits, work)
}

/// Post a delayed task to the process-wide scheduler.
///
/// # Panics
///
/// Panics if [`initialize`] has not succeeded.
#[track_caller]
pub fn post_delayed_task_with_traits(
    traits: TaskTraits,
    work: impl FnOnce() + Send + 'static,
    delay: Duration,
) -> bool {
    expect_instance().post_delayed_task_with_traits(Origin::here(), traits, work, delay)
}

/// Create a task runner on the process-wide scheduler.
///
/// # Panics
///
/// Panics if [`initialize`] has not succeeded.
pub fn create_task_runner_with_traits(traits: TaskTraits, mode: ExecutionMode) -> TaskRunner {
    expect_instance().create_task_runner_with_traits(traits, mode)
}

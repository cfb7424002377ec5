//! Worker pool descriptors and the standard scheduler configuration

use crate::error::SchedulerError;
use crate::traits::{TaskPriority, TaskTraits};
use rustc_hash::FxHashSet;

/// OS priority of a pool's worker threads
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ThreadPriority {
    /// Lowest priority, for work nobody waits on
    Background,
    /// Default OS priority
    Normal,
    /// Slightly raised priority, for work feeding what the user sees
    Display,
}

/// Whether tasks in a pool may perform blocking calls
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IoRestriction {
    Allowed,
    Disallowed,
}

/// When a pool creates its worker threads
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum WorkerCreation {
    /// All `max_threads` workers start with the pool
    #[default]
    Eager,
    /// Workers start one at a time, when work arrives and none is idle
    OnDemand,
}

/// Descriptor of one worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolParams {
    /// Pool name, also used to label its threads
    pub name: String,
    /// Priority of the pool's threads
    pub thread_priority: ThreadPriority,
    /// Whether blocking calls are allowed in the pool
    pub io_restriction: IoRestriction,
    /// Maximum number of threads in the pool
    pub max_threads: usize,
    /// Thread creation policy
    pub worker_creation: WorkerCreation,
}

impl WorkerPoolParams {
    /// A pool with normal-priority threads, no blocking, eager creation.
    pub fn new(name: impl Into<String>, max_threads: usize) -> Self {
        Self {
            name: name.into(),
            thread_priority: ThreadPriority::Normal,
            io_restriction: IoRestriction::Disallowed,
            max_threads,
            worker_creation: WorkerCreation::Eager,
        }
    }

    pub fn with_thread_priority(mut self, priority: ThreadPriority) -> Self {
        self.thread_priority = priority;
        self
    }

    pub fn with_io_restriction(mut self, io_restriction: IoRestriction) -> Self {
        self.io_restriction = io_restriction;
        self
    }

    pub fn with_worker_creation(mut self, worker_creation: WorkerCreation) -> Self {
        self.worker_creation = worker_creation;
        self
    }
}

/// Check a full set of pool descriptors.
pub fn validate_pools(pools: &[WorkerPoolParams]) -> Result<(), SchedulerError> {
    if pools.is_empty() {
        return Err(SchedulerError::NoWorkerPools);
    }

    let mut names = FxHashSet::default();
    for (index, pool) in pools.iter().enumerate() {
        if pool.name.is_empty() {
            return Err(SchedulerError::EmptyPoolName(index));
        }
        if pool.max_threads < 1 {
            return Err(SchedulerError::ZeroMaxThreads(pool.name.clone()));
        }
        if !names.insert(pool.name.as_str()) {
            return Err(SchedulerError::DuplicatePoolName(pool.name.clone()));
        }
    }
    Ok(())
}

/// Index of the background pool in [`SchedulerConfig::standard`]
pub const BACKGROUND_POOL: usize = 0;
/// Index of the background blocking pool in [`SchedulerConfig::standard`]
pub const BACKGROUND_BLOCKING_POOL: usize = 1;
/// Index of the foreground pool in [`SchedulerConfig::standard`]
pub const FOREGROUND_POOL: usize = 2;
/// Index of the foreground blocking pool in [`SchedulerConfig::standard`]
pub const FOREGROUND_BLOCKING_POOL: usize = 3;
/// Number of pools [`default_pool_index_for_traits`] routes to
pub const STANDARD_POOL_COUNT: usize = 4;

/// Routing function matching [`SchedulerConfig::standard`].
///
/// Total over every traits value: anything that is not explicitly background
/// priority, including priorities added later, goes to a foreground pool.
pub fn default_pool_index_for_traits(traits: &TaskTraits) -> usize {
    let background = matches!(traits.priority(), TaskPriority::Background);
    match (background, traits.blocking_allowed()) {
        (true, false) => BACKGROUND_POOL,
        (true, true) => BACKGROUND_BLOCKING_POOL,
        (false, false) => FOREGROUND_POOL,
        (false, true) => FOREGROUND_BLOCKING_POOL,
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub pools: Vec<WorkerPoolParams>,
}

impl SchedulerConfig {
    pub fn new(pools: Vec<WorkerPoolParams>) -> Self {
        Self { pools }
    }

    /// The four standard pools, sized from the number of CPUs.
    ///
    /// Use with [`default_pool_index_for_traits`].
    pub fn standard() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            pools: vec![
                WorkerPoolParams::new("background", (cpus / 2).max(1))
                    .with_thread_priority(ThreadPriority::Background)
                    .with_worker_creation(WorkerCreation::OnDemand),
                WorkerPoolParams::new("background-blocking", (cpus / 2).max(2))
                    .with_thread_priority(ThreadPriority::Background)
                    .with_io_restriction(IoRestriction::Allowed)
                    .with_worker_creation(WorkerCreation::OnDemand),
                WorkerPoolParams::new("foreground", cpus.max(2))
                    .with_worker_creation(WorkerCreation::OnDemand),
                WorkerPoolParams::new("foreground-blocking", (cpus * 2).max(4))
                    .with_io_restriction(IoRestriction::Allowed)
                    .with_worker_creation(WorkerCreation::OnDemand),
            ],
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        validate_pools(&self.pools)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

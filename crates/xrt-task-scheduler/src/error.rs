//! Scheduler error types.

/// Errors reported while building or installing a scheduler.
///
/// These are configuration mistakes caught at startup. [`TaskScheduler::create`]
/// turns any of them into a panic.
///
/// [`TaskScheduler::create`]: crate::TaskScheduler::create
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// No worker pool descriptors were supplied
    #[error("At least one worker pool is required")]
    NoWorkerPools,

    /// A pool descriptor has an empty name
    #[error("Worker pool #{0} has an empty name")]
    EmptyPoolName(usize),

    /// Two pool descriptors share a name
    #[error("Duplicate worker pool name: {0}")]
    DuplicatePoolName(String),

    /// A pool descriptor allows no threads
    #[error("Worker pool {0} must allow at least one thread")]
    ZeroMaxThreads(String),

    /// The OS refused to spawn a scheduler thread
    #[error("Failed to spawn thread {name}: {source}")]
    ThreadSpawn {
        /// Name of the thread that could not be spawned
        name: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// A config routed by the default routing lacks some standard pools
    #[error("Default routing needs {expected} worker pools, config has {found}")]
    MissingStandardPools { expected: usize, found: usize },

    /// The process-wide scheduler was already installed
    #[error("The process-wide task scheduler is already initialized")]
    AlreadyInitialized,
}

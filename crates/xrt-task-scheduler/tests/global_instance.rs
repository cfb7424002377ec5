//! The process-wide scheduler. Lives in its own test binary since the
//! instance can only be installed once per process.

use crossbeam::channel;
use std::time::Duration;
use xrt_task_scheduler::{
    global, ExecutionMode, SchedulerConfig, SchedulerError, TaskPriority, TaskTraits,
};

#[test]
fn test_global_instance_lifecycle() {
    assert!(global::instance().is_none());

    let scheduler = global::initialize_with_config(SchedulerConfig::standard())
        .expect("first initialization succeeds");
    assert_eq!(scheduler.worker_pool_count(), 4);
    assert!(std::ptr::eq(
        scheduler,
        global::instance().expect("instance is installed")
    ));

    assert!(matches!(
        global::initialize_with_config(SchedulerConfig::standard()),
        Err(SchedulerError::AlreadyInitialized)
    ));

    let (tx, rx) = channel::unbounded();
    let direct = tx.clone();
    assert!(global::post_task_with_traits(
        TaskTraits::new().with_priority(TaskPriority::Background),
        move || direct.send("direct").unwrap(),
    ));

    let delayed = tx.clone();
    assert!(global::post_delayed_task_with_traits(
        TaskTraits::new(),
        move || delayed.send("delayed").unwrap(),
        Duration::from_millis(20),
    ));

    let runner = global::create_task_runner_with_traits(
        TaskTraits::new().may_block(),
        ExecutionMode::Sequenced,
    );
    runner.post_task(xrt_task_scheduler::Origin::here(), move || {
        tx.send("runner").unwrap()
    });

    let mut received: Vec<&str> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    received.sort_unstable();
    assert_eq!(received, vec!["delayed", "direct", "runner"]);

    scheduler.flush_for_testing();
    assert_eq!(scheduler.stats().tasks_completed, 3);
}

//! Teardown: after `join_for_testing` no scheduler thread is left. Kept in
//! its own test binary so thread counts only see this scheduler.

use crossbeam::channel;
use std::cell::RefCell;
use std::time::Duration;
use xrt_task_scheduler::{
    ExecutionMode, Origin, TaskScheduler, TaskTraits, WorkerCreation, WorkerPoolParams,
};

struct ExitCanary(channel::Sender<()>);

impl Drop for ExitCanary {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

thread_local! {
    static CANARY: RefCell<Option<ExitCanary>> = const { RefCell::new(None) };
}

/// Threads of this process whose name starts with `prefix`. Linux truncates
/// thread names to 15 bytes.
#[cfg(target_os = "linux")]
fn live_threads_named(prefix: &str) -> usize {
    std::fs::read_dir("/proc/self/task")
        .map(|tasks| {
            tasks
                .filter_map(Result::ok)
                .filter_map(|task| std::fs::read_to_string(task.path().join("comm")).ok())
                .filter(|comm| comm.starts_with(prefix))
                .count()
        })
        .unwrap_or(0)
}

/// The kernel drops a thread's entry shortly after `join` returns.
#[cfg(target_os = "linux")]
fn settled_threads_named(prefix: &str) -> usize {
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    loop {
        let live = live_threads_named(prefix);
        if live == 0 || std::time::Instant::now() >= deadline {
            return live;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_join_leaves_no_scheduler_thread_alive() {
    let scheduler = TaskScheduler::create(
        vec![WorkerPoolParams::new("zjoin", 3).with_worker_creation(WorkerCreation::Eager)],
        |_: &TaskTraits| 0,
    );
    let (exit_tx, exit_rx) = channel::unbounded();

    // Single-thread runners are pinned round-robin, one per worker.
    let runners: Vec<_> = (0..3)
        .map(|_| {
            scheduler.create_task_runner_with_traits(TaskTraits::new(), ExecutionMode::SingleThread)
        })
        .collect();
    for runner in &runners {
        let exit_tx = exit_tx.clone();
        runner.post_task(Origin::here(), move || {
            CANARY.with(|canary| *canary.borrow_mut() = Some(ExitCanary(exit_tx)));
        });
    }
    drop(exit_tx);
    scheduler.flush_for_testing();

    #[cfg(target_os = "linux")]
    {
        assert_eq!(live_threads_named("zjoin-worker"), 3);
        assert_eq!(live_threads_named("task-scheduler-"), 1);
    }

    scheduler.shutdown();
    scheduler.join_for_testing();

    // Every worker thread has exited, running its thread-local destructors.
    let exits = (0..3)
        .filter(|_| exit_rx.recv_timeout(Duration::from_secs(1)).is_ok())
        .count();
    assert_eq!(exits, 3);

    #[cfg(target_os = "linux")]
    {
        assert_eq!(settled_threads_named("zjoin-worker"), 0);
        assert_eq!(settled_threads_named("task-scheduler-"), 0);
    }

    let stats = scheduler.stats();
    assert_eq!(stats.pools[0].running, 0);
    drop(runners);
}

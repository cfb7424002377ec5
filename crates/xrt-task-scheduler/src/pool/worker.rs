//! Worker thread main loop
//!
//! Workers pick the best ready sequence visible to them (their private heap or
//! the pool's shared heap), run its head task with the pool lock released, then
//! hand the sequence back to the pool.

use super::WorkerPool;
use crate::config::{IoRestriction, ThreadPriority};
use crate::sequence::SequenceId;
use crate::task::Task;
use crate::thread_restrictions::ScopedBlockingPolicy;
use crate::tracker::TaskRun;
use parking_lot::MutexGuard;
use std::any::Any;
use std::cell::Cell;
use std::sync::Arc;
use tracing::{debug, error, warn};

thread_local! {
    static CURRENT_SEQUENCE: Cell<Option<SequenceId>> = const { Cell::new(None) };
}

/// Sequence whose task is running on the current thread, if any.
pub(crate) fn current_sequence() -> Option<SequenceId> {
    CURRENT_SEQUENCE.with(Cell::get)
}

struct ScopedCurrentSequence {
    previous: Option<SequenceId>,
}

impl ScopedCurrentSequence {
    fn new(id: SequenceId) -> Self {
        let previous = CURRENT_SEQUENCE.with(|cell| cell.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for ScopedCurrentSequence {
    fn drop(&mut self) {
        CURRENT_SEQUENCE.with(|cell| cell.set(self.previous));
    }
}

/// Worker thread main loop
pub(super) fn run(pool: Arc<WorkerPool>, index: usize) {
    if let Err(e) = set_current_thread_priority(pool.params.thread_priority) {
        warn!(
            pool = %pool.params.name,
            worker = index,
            priority = ?pool.params.thread_priority,
            error = %e,
            "Could not set worker thread priority"
        );
    }
    debug!(pool = %pool.params.name, worker = index, "Worker started");

    let mut state = pool.state.lock();
    loop {
        if state.join_requested {
            break;
        }

        let Some(id) = state.pop_ready(index) else {
            // Nothing to do: park until a poster or join wakes this worker
            state.idle_workers.push(index);
            pool.wakers[index].wait(&mut state);
            state.idle_workers.retain(|&worker| worker != index);
            continue;
        };

        let Some(task) = state.begin_run(id) else {
            continue;
        };

        MutexGuard::unlocked(&mut state, || run_task(&pool, id, task));
        state.end_run(id);
    }
    drop(state);

    debug!(pool = %pool.params.name, worker = index, "Worker shutting down");
}

/// Run one task outside the pool lock. The tracker contains panics.
fn run_task(pool: &WorkerPool, sequence: SequenceId, task: Task) {
    let origin = task.origin();
    let task_id = task.id();
    let may_block =
        pool.params.io_restriction == IoRestriction::Allowed && task.traits().blocking_allowed();

    let _sequence = ScopedCurrentSequence::new(sequence);
    let _blocking = ScopedBlockingPolicy::new(may_block);

    if let TaskRun::Panicked(payload) = pool.tracker.run_task(task, &pool.tasks_panicked) {
        error!(
            pool = %pool.params.name,
            origin = %origin,
            task = task_id.as_u64(),
            panic = panic_message(payload.as_ref()),
            "Task panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(target_os = "linux")]
fn set_current_thread_priority(priority: ThreadPriority) -> std::io::Result<()> {
    let nice = match priority {
        ThreadPriority::Background => 10,
        ThreadPriority::Normal => return Ok(()),
        ThreadPriority::Display => -4,
    };

    // SAFETY: gettid has no preconditions. With a thread id, setpriority only
    // changes the calling thread.
    let rc = unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        libc::setpriority(libc::PRIO_PROCESS, tid, nice)
    };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_current_thread_priority(_priority: ThreadPriority) -> std::io::Result<()> {
    Ok(())
}

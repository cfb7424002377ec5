//! Worker pool: a bounded set of threads running ready sequences
//!
//! All of a pool's sequences live in an arena inside the pool state, keyed by
//! [`SequenceId`]. A sequence is in one of three states:
//!
//! - `Idle`: empty, or not yet made ready; not in any ready heap
//! - `Ready`: non-empty and in exactly one ready heap
//! - `Running`: a worker took its head task and is running it
//!
//! A worker pops a `Ready` sequence, marks it `Running`, takes its head task
//! and runs it with the pool lock released. Tasks posted meanwhile are only
//! appended. When the task finishes, the worker puts the sequence back in a
//! ready heap if it still has tasks. Because only the worker that marked a
//! sequence `Running` can move it out of that state, two tasks of the same
//! sequence never run at the same time, and they run in push order.
//!
//! Ready heaps are ordered by the head task's priority, then by the order in
//! which sequences became ready (oldest first). Sequences pinned to a worker
//! (single-thread mode) use that worker's private heap.

mod worker;

pub(crate) use worker::current_sequence;

use crate::config::{WorkerCreation, WorkerPoolParams};
use crate::error::SchedulerError;
use crate::sequence::{Sequence, SequenceId, SequenceSortKey};
use crate::task::Task;
use crate::tracker::TaskTracker;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Entry in a ready heap
struct ReadyEntry {
    key: SequenceSortKey,
    id: SequenceId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ReadyEntry {}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SlotState {
    Idle,
    Ready,
    Running,
}

/// Arena slot holding one sequence
struct SequenceSlot {
    sequence: Sequence,
    /// Live `SequenceToken`s for this sequence
    refs: usize,
    state: SlotState,
    /// Worker index for single-thread sequences
    pinned_worker: Option<usize>,
}

impl SequenceSlot {
    fn is_collectable(&self) -> bool {
        self.refs == 0 && self.state == SlotState::Idle && self.sequence.is_empty()
    }
}

struct PoolState {
    sequences: FxHashMap<SequenceId, SequenceSlot>,
    shared_ready: BinaryHeap<ReadyEntry>,
    /// Private ready heap of each worker, indexed by worker
    pinned_ready: Vec<BinaryHeap<ReadyEntry>>,
    /// Workers waiting for work (LIFO)
    idle_workers: Vec<usize>,
    /// Workers are numbered `0..workers_spawned`
    workers_spawned: usize,
    next_ready_order: u64,
    next_pinned_worker: usize,
    running: usize,
    peak_running: usize,
    join_requested: bool,
}

impl PoolState {
    fn new(max_threads: usize) -> Self {
        Self {
            sequences: FxHashMap::default(),
            shared_ready: BinaryHeap::new(),
            pinned_ready: (0..max_threads).map(|_| BinaryHeap::new()).collect(),
            idle_workers: Vec::with_capacity(max_threads),
            workers_spawned: 0,
            next_ready_order: 0,
            next_pinned_worker: 0,
            running: 0,
            peak_running: 0,
            join_requested: false,
        }
    }

    /// Put a non-empty sequence in its ready heap.
    ///
    /// Returns the worker the sequence is pinned to, if any.
    fn make_ready(&mut self, id: SequenceId) -> Option<usize> {
        let ready_order = self.next_ready_order;
        self.next_ready_order += 1;

        let slot = self.sequences.get_mut(&id)?;
        let key = slot.sequence.sort_key(ready_order)?;
        slot.state = SlotState::Ready;

        let entry = ReadyEntry { key, id };
        match slot.pinned_worker {
            Some(worker) => {
                self.pinned_ready[worker].push(entry);
                Some(worker)
            }
            None => {
                self.shared_ready.push(entry);
                None
            }
        }
    }

    /// Pop the best ready sequence visible to `worker`.
    fn pop_ready(&mut self, worker: usize) -> Option<SequenceId> {
        let pinned_first = match (self.pinned_ready[worker].peek(), self.shared_ready.peek()) {
            (Some(pinned), Some(shared)) => pinned > shared,
            (Some(_), None) => true,
            (None, _) => false,
        };

        let entry = if pinned_first {
            self.pinned_ready[worker].pop()
        } else {
            self.shared_ready.pop()
        };
        entry.map(|entry| entry.id)
    }

    /// Mark a popped sequence running and take its head task.
    fn begin_run(&mut self, id: SequenceId) -> Option<Task> {
        let slot = self.sequences.get_mut(&id)?;
        match slot.sequence.take() {
            Some(task) => {
                slot.state = SlotState::Running;
                self.running += 1;
                self.peak_running = self.peak_running.max(self.running);
                Some(task)
            }
            None => {
                slot.state = SlotState::Idle;
                if slot.is_collectable() {
                    self.sequences.remove(&id);
                }
                None
            }
        }
    }

    /// Hand a sequence back after its task ran: re-enqueue, idle, or free it.
    fn end_run(&mut self, id: SequenceId) {
        self.running -= 1;

        let Some(slot) = self.sequences.get_mut(&id) else {
            return;
        };
        if !slot.sequence.is_empty() {
            self.make_ready(id);
            return;
        }

        slot.state = SlotState::Idle;
        if slot.is_collectable() {
            self.sequences.remove(&id);
        }
    }

    fn ready_sequences(&self) -> usize {
        self.shared_ready.len() + self.pinned_ready.iter().map(BinaryHeap::len).sum::<usize>()
    }
}

/// Snapshot of a pool's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub name: String,
    /// Worker threads started so far
    pub workers_spawned: usize,
    /// Tasks running right now
    pub running: usize,
    /// Highest number of tasks ever running at once
    pub peak_running: usize,
    /// Sequences waiting in ready heaps
    pub ready_sequences: usize,
    /// Tasks that panicked in this pool
    pub tasks_panicked: u64,
}

/// A bounded set of worker threads sharing one ready structure.
pub struct WorkerPool {
    params: WorkerPoolParams,
    tracker: Arc<TaskTracker>,
    state: Mutex<PoolState>,
    /// One condvar per worker, all paired with `state`
    wakers: Vec<Condvar>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    tasks_panicked: AtomicU64,
}

impl WorkerPool {
    /// Create a pool. With [`WorkerCreation::Eager`] all workers start now.
    pub fn start(
        params: WorkerPoolParams,
        tracker: Arc<TaskTracker>,
    ) -> Result<Arc<Self>, SchedulerError> {
        let max_threads = params.max_threads;
        let pool = Arc::new(Self {
            state: Mutex::new(PoolState::new(max_threads)),
            wakers: (0..max_threads).map(|_| Condvar::new()).collect(),
            threads: Mutex::new(Vec::with_capacity(max_threads)),
            tasks_panicked: AtomicU64::new(0),
            params,
            tracker,
        });

        if pool.params.worker_creation == WorkerCreation::Eager {
            let spawned = {
                let mut state = pool.state.lock();
                (0..max_threads).try_for_each(|_| pool.spawn_worker(&mut state))
            };
            if let Err(e) = spawned {
                pool.join_for_testing();
                return Err(e);
            }
        }

        info!(
            pool = %pool.params.name,
            max_threads,
            creation = ?pool.params.worker_creation,
            io = ?pool.params.io_restriction,
            "Worker pool started"
        );
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn params(&self) -> &WorkerPoolParams {
        &self.params
    }

    /// Post a task as its own one-task sequence.
    pub fn post_task(self: &Arc<Self>, task: Task) {
        let id = SequenceId::new();
        let mut sequence = Sequence::new();
        sequence.push(task);

        let mut state = self.state.lock();
        state.sequences.insert(
            id,
            SequenceSlot {
                sequence,
                refs: 0,
                state: SlotState::Idle,
                pinned_worker: None,
            },
        );
        let pinned = state.make_ready(id);
        self.wake_for(&mut state, pinned);
    }

    /// Create a sequence shared by everything holding the returned token.
    ///
    /// A pinned sequence only ever runs on one worker, chosen round-robin.
    pub fn create_sequence(self: &Arc<Self>, pinned: bool) -> SequenceToken {
        let id = SequenceId::new();
        let mut state = self.state.lock();
        let pinned_worker = if pinned {
            let worker = state.next_pinned_worker % self.params.max_threads;
            state.next_pinned_worker += 1;
            Some(worker)
        } else {
            None
        };

        state.sequences.insert(
            id,
            SequenceSlot {
                sequence: Sequence::new(),
                refs: 1,
                state: SlotState::Idle,
                pinned_worker,
            },
        );

        SequenceToken {
            pool: Arc::clone(self),
            id,
            pinned_worker,
        }
    }

    /// Append a task to a shared sequence.
    fn push_to_sequence(self: &Arc<Self>, id: SequenceId, task: Task) {
        let mut state = self.state.lock();
        let Some(slot) = state.sequences.get_mut(&id) else {
            debug_assert!(false, "sequence {:?} is not in its pool", id);
            return;
        };

        slot.sequence.push(task);
        if slot.state == SlotState::Idle {
            let pinned = state.make_ready(id);
            self.wake_for(&mut state, pinned);
        }
    }

    /// Wake (or start) a worker for newly ready work.
    fn wake_for(self: &Arc<Self>, state: &mut PoolState, pinned: Option<usize>) {
        if state.join_requested {
            return;
        }

        match pinned {
            Some(worker) => {
                while state.workers_spawned <= worker {
                    if let Err(e) = self.spawn_worker(state) {
                        error!(
                            pool = %self.params.name,
                            error = %e,
                            "Could not start pinned worker"
                        );
                        return;
                    }
                }
                if let Some(pos) = state.idle_workers.iter().position(|&w| w == worker) {
                    state.idle_workers.remove(pos);
                    self.wakers[worker].notify_one();
                }
            }
            None => {
                if let Some(worker) = state.idle_workers.pop() {
                    self.wakers[worker].notify_one();
                } else if self.params.worker_creation == WorkerCreation::OnDemand
                    && state.workers_spawned < self.params.max_threads
                {
                    if let Err(e) = self.spawn_worker(state) {
                        warn!(pool = %self.params.name, error = %e, "Could not start worker");
                    }
                }
            }
        }
    }

    /// Start the next worker thread. Called with the state lock held.
    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState) -> Result<(), SchedulerError> {
        let index = state.workers_spawned;
        debug_assert!(index < self.params.max_threads);

        let name = format!("{}-worker-{}", self.params.name, index);
        let pool = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker::run(pool, index))
            .map_err(|source| SchedulerError::ThreadSpawn { name, source })?;

        state.workers_spawned += 1;
        self.threads.lock().push(handle);
        Ok(())
    }

    /// Stop every worker after its current task and wait for it to exit.
    ///
    /// Sequences still queued are dropped with the pool.
    pub fn join_for_testing(&self) {
        {
            let mut state = self.state.lock();
            state.join_requested = true;
            for waker in &self.wakers {
                waker.notify_all();
            }
        }

        let handles = std::mem::take(&mut *self.threads.lock());
        let count = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                error!(pool = %self.params.name, "Worker thread terminated abnormally");
            }
        }
        debug!(pool = %self.params.name, workers = count, "Worker pool joined");
    }

    /// Whether no task is queued or running in this pool.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.running == 0 && state.ready_sequences() == 0
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            name: self.params.name.clone(),
            workers_spawned: state.workers_spawned,
            running: state.running,
            peak_running: state.peak_running,
            ready_sequences: state.ready_sequences(),
            tasks_panicked: self.tasks_panicked.load(AtomicOrdering::Relaxed),
        }
    }
}

/// Counted reference to a shared sequence in a pool.
///
/// Cloning adds a reference; the sequence is freed once every token is gone
/// and its last task has run.
pub struct SequenceToken {
    pool: Arc<WorkerPool>,
    id: SequenceId,
    pinned_worker: Option<usize>,
}

impl SequenceToken {
    pub fn id(&self) -> SequenceId {
        self.id
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Worker this sequence is pinned to, for single-thread sequences.
    pub fn pinned_worker(&self) -> Option<usize> {
        self.pinned_worker
    }

    /// Append a task already accepted by the tracker.
    pub fn push(&self, task: Task) {
        self.pool.push_to_sequence(self.id, task);
    }
}

impl Clone for SequenceToken {
    fn clone(&self) -> Self {
        if let Some(slot) = self.pool.state.lock().sequences.get_mut(&self.id) {
            slot.refs += 1;
        }
        Self {
            pool: Arc::clone(&self.pool),
            id: self.id,
            pinned_worker: self.pinned_worker,
        }
    }
}

impl Drop for SequenceToken {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        if let Some(slot) = state.sequences.get_mut(&self.id) {
            slot.refs -= 1;
            if slot.is_collectable() {
                state.sequences.remove(&self.id);
            }
        }
    }
}

impl std::fmt::Debug for SequenceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceToken")
            .field("pool", &self.pool.params.name)
            .field("id", &self.id)
            .field("pinned_worker", &self.pinned_worker)
            .finish()
    }
}

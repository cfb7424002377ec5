//! Service thread: releases delayed tasks when their run time arrives
//!
//! Instead of polling, the service thread waits on a condvar until the
//! earliest delayed run time. The delayed task manager wakes it early through
//! [`ServiceSignal::notify`] when an earlier task is added.

use crate::delayed::DelayedTaskManager;
use crate::error::SchedulerError;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error};

/// Name of the service thread
pub const SERVICE_THREAD_NAME: &str = "task-scheduler-service";

struct ServiceState {
    /// Stop signal
    stop: bool,
    /// Set by `notify`; cleared when the loop re-reads the deadline
    wake_requested: bool,
}

/// Wake-up channel into the service thread.
///
/// Created before the delayed task manager so the manager's "earliest run
/// time changed" callback can hold it.
pub struct ServiceSignal {
    state: Mutex<ServiceState>,
    wake: Condvar,
}

impl ServiceSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServiceState {
                stop: false,
                wake_requested: false,
            }),
            wake: Condvar::new(),
        })
    }

    /// Ask the service thread to recompute its deadline.
    pub fn notify(&self) {
        let mut state = self.state.lock();
        state.wake_requested = true;
        self.wake.notify_one();
    }
}

/// Single background thread draining the delayed task manager.
pub struct ServiceThread {
    signal: Arc<ServiceSignal>,
    /// Thread handle
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceThread {
    /// Start the service thread.
    ///
    /// `on_expired` receives every delayed item once its run time has passed.
    pub fn start<T, F>(
        signal: Arc<ServiceSignal>,
        delayed: Arc<DelayedTaskManager<T>>,
        on_expired: F,
    ) -> Result<Self, SchedulerError>
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let loop_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name(SERVICE_THREAD_NAME.to_string())
            .spawn(move || run_loop(&loop_signal, &delayed, on_expired))
            .map_err(|source| SchedulerError::ThreadSpawn {
                name: SERVICE_THREAD_NAME.to_string(),
                source,
            })?;

        Ok(Self {
            signal,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the service thread and wait for it to exit. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.signal.state.lock();
            state.stop = true;
            self.signal.wake.notify_one();
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("Service thread terminated abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for ServiceThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Service thread main loop
fn run_loop<T, F>(signal: &ServiceSignal, delayed: &DelayedTaskManager<T>, mut on_expired: F)
where
    F: FnMut(T),
{
    debug!("Service thread started");
    let mut state = signal.state.lock();

    loop {
        if state.stop {
            break;
        }
        state.wake_requested = false;

        // Release everything that is due, without holding our lock while
        // re-posting.
        MutexGuard::unlocked(&mut state, || {
            for item in delayed.drain_expired(Instant::now()) {
                on_expired(item);
            }
        });

        // Re-check after the unlocked section: stop() or notify() may have
        // run in the meantime.
        if state.stop {
            break;
        }
        if state.wake_requested {
            continue;
        }

        // Read the deadline while holding our lock: a notify() racing with
        // this read blocks until wait releases the lock, so it is not lost.
        match delayed.next_run_time() {
            Some(deadline) => {
                signal.wake.wait_until(&mut state, deadline);
            }
            None => signal.wake.wait(&mut state),
        }
    }

    debug!("Service thread shutting down");
}

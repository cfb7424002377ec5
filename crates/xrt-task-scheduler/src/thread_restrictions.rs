//! Per-thread blocking-call policy.
//!
//! Worker threads mark, for the duration of each task, whether that task may
//! block. Code about to make a blocking call (file I/O, waiting on another
//! thread) calls [`assert_blocking_allowed`] so a task running in a pool that
//! disallows blocking is diagnosed instead of silently stalling the pool.
//! Threads the scheduler does not own are always allowed to block.

use std::cell::Cell;

thread_local! {
    static BLOCKING_ALLOWED: Cell<bool> = const { Cell::new(true) };
}

/// Whether the current thread may perform blocking calls.
pub fn is_blocking_allowed() -> bool {
    BLOCKING_ALLOWED.with(Cell::get)
}

/// Panic if the current thread may not block.
///
/// Inside a scheduler task the panic is caught and reported by the worker.
#[track_caller]
pub fn assert_blocking_allowed() {
    assert!(
        is_blocking_allowed(),
        "blocking call from a task that is not allowed to block \
         (post it with TaskTraits::may_block() to a pool that allows I/O)"
    );
}

/// Sets the current thread's blocking policy until dropped.
pub(crate) struct ScopedBlockingPolicy {
    previous: bool,
}

impl ScopedBlockingPolicy {
    pub(crate) fn new(allowed: bool) -> Self {
        let previous = BLOCKING_ALLOWED.with(|cell| cell.replace(allowed));
        Self { previous }
    }
}

impl Drop for ScopedBlockingPolicy {
    fn drop(&mut self) {
        BLOCKING_ALLOWED.with(|cell| cell.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unowned_threads_may_block() {
        assert!(is_blocking_allowed());
        assert_blocking_allowed();
    }

    #[test]
    fn test_scoped_policy_restores_previous() {
        {
            let _policy = ScopedBlockingPolicy::new(false);
            assert!(!is_blocking_allowed());
            {
                let _inner = ScopedBlockingPolicy::new(true);
                assert!(is_blocking_allowed());
            }
            assert!(!is_blocking_allowed());
        }
        assert!(is_blocking_allowed());
    }

    #[test]
    #[should_panic(expected = "not allowed to block")]
    fn test_assert_panics_when_disallowed() {
        let _policy = ScopedBlockingPolicy::new(false);
        assert_blocking_allowed();
    }
}

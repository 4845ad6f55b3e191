//! Parallel map over independent inputs with per-item outcome capture.
//!
//! The worker pool applies one function to every input with a shared read-only
//! context. Outcomes come back in input order regardless of completion order.
//! Under fail-fast the first failure cancels the shared token; tasks already
//! running finish, tasks not yet started are skipped. Failures that are not
//! confined to their input cancel the token under every policy.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::errors::{Result, SerStitchError};

/// Result of one mapped task.
#[derive(Debug)]
pub enum TaskOutcome<R> {
    /// The task produced a value
    Completed {
        /// Produced value
        value: R,
        /// Attempts used, including the successful one
        attempts: usize,
    },
    /// Every attempt failed
    Failed {
        /// Error of the last attempt
        error: SerStitchError,
        /// Attempts used
        attempts: usize,
    },
    /// Cancellation was observed before the task started
    Skipped,
}

impl<R> TaskOutcome<R> {
    /// Attempts spent on the task
    pub fn attempts(&self) -> usize {
        match self {
            Self::Completed { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
            Self::Skipped => 0,
        }
    }
}

/// Failure handling for a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutPolicy {
    /// Cancel remaining tasks after the first failure
    pub fail_fast: bool,
    /// Extra attempts per task
    pub retries: usize,
}

impl Default for FanOutPolicy {
    fn default() -> Self {
        Self {
            fail_fast: true,
            retries: 0,
        }
    }
}

/// Dedicated thread pool for per-file work.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    /// Build a pool; `threads == 0` uses one thread per core
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("serstitch-export-{index}"))
            .build()
            .map_err(|e| SerStitchError::internal(format!("cannot start worker pool: {e}")))?;
        Ok(Self { pool })
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Apply `task` to every item, returning outcomes in item order.
    pub fn map<T, R, F>(
        &self,
        items: &[T],
        policy: FanOutPolicy,
        cancel: &CancellationToken,
        task: F,
    ) -> Vec<TaskOutcome<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync,
    {
        self.pool.install(|| {
            items
                .par_iter()
                .enumerate()
                .map(|(index, item)| run_task(index, item, policy, cancel, &task))
                .collect()
        })
    }
}

fn run_task<T, R, F>(
    index: usize,
    item: &T,
    policy: FanOutPolicy,
    cancel: &CancellationToken,
    task: &F,
) -> TaskOutcome<R>
where
    F: Fn(&T) -> Result<R>,
{
    if cancel.is_cancelled() {
        debug!("Task {index} skipped after cancellation");
        return TaskOutcome::Skipped;
    }

    let max_attempts = policy.retries + 1;
    let mut attempts = 0;
    loop {
        attempts += 1;
        match task(item) {
            Ok(value) => return TaskOutcome::Completed { value, attempts },
            Err(error) => {
                let retryable = !error.is_cancellation() && !cancel.is_cancelled();
                if retryable && attempts < max_attempts {
                    warn!("Task {index} failed (attempt {attempts}/{max_attempts}), retrying: {error}");
                    continue;
                }
                if policy.fail_fast || !error.is_skippable() {
                    cancel.cancel();
                }
                return TaskOutcome::Failed { error, attempts };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_outcomes_keep_input_order() {
        let pool = WorkerPool::new(4).unwrap();
        let items: Vec<u64> = (0..64).collect();
        let outcomes = pool.map(&items, FanOutPolicy::default(), &CancellationToken::new(), |n| {
            Ok(n * 2)
        });

        let values: Vec<u64> = outcomes
            .into_iter()
            .map(|outcome| match outcome {
                TaskOutcome::Completed { value, .. } => value,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, items.iter().map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_fail_fast_cancels_token_and_skips_unstarted() {
        let pool = WorkerPool::new(1).unwrap();
        let cancel = CancellationToken::new();
        let items: Vec<usize> = (0..16).collect();
        let started = AtomicUsize::new(0);

        let outcomes = pool.map(&items, FanOutPolicy::default(), &cancel, |n| {
            started.fetch_add(1, Ordering::SeqCst);
            if *n == 0 {
                Err(SerStitchError::load("0.ser", "corrupt"))
            } else {
                Ok(*n)
            }
        });

        assert!(cancel.is_cancelled());
        assert!(matches!(outcomes[0], TaskOutcome::Failed { .. }));
        let skipped = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, TaskOutcome::Skipped))
            .count();
        assert_eq!(skipped + started.load(Ordering::SeqCst), items.len());
    }

    #[test]
    fn test_skip_policy_runs_everything() {
        let pool = WorkerPool::new(2).unwrap();
        let cancel = CancellationToken::new();
        let items = vec![1, 2, 3, 4];
        let policy = FanOutPolicy {
            fail_fast: false,
            retries: 0,
        };

        let outcomes = pool.map(&items, policy, &cancel, |n| {
            if n % 2 == 0 {
                Err(SerStitchError::load("x.ser", "even"))
            } else {
                Ok(*n)
            }
        });

        assert!(!cancel.is_cancelled());
        assert!(outcomes.iter().all(|o| !matches!(o, TaskOutcome::Skipped)));
        assert!(matches!(outcomes[1], TaskOutcome::Failed { .. }));
        assert!(matches!(outcomes[2], TaskOutcome::Completed { value: 3, .. }));
    }

    #[test]
    fn test_fatal_error_cancels_under_skip_policy() {
        let pool = WorkerPool::new(1).unwrap();
        let cancel = CancellationToken::new();
        let policy = FanOutPolicy {
            fail_fast: false,
            retries: 0,
        };

        let outcomes = pool.map(&[0, 1, 2], policy, &cancel, |n| {
            if *n == 0 {
                Err(SerStitchError::internal("disk vanished"))
            } else {
                Ok(*n)
            }
        });

        assert!(cancel.is_cancelled());
        assert!(matches!(outcomes[0], TaskOutcome::Failed { .. }));
    }

    #[test]
    fn test_retries_until_success() {
        let pool = WorkerPool::new(1).unwrap();
        let calls = AtomicUsize::new(0);
        let policy = FanOutPolicy {
            fail_fast: true,
            retries: 2,
        };

        let outcomes = pool.map(&[()], policy, &CancellationToken::new(), |_| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SerStitchError::internal("flaky"))
            } else {
                Ok("done")
            }
        });

        assert_eq!(outcomes[0].attempts(), 3);
        assert!(matches!(outcomes[0], TaskOutcome::Completed { value: "done", .. }));
    }

    #[test]
    fn test_pre_cancelled_token_skips_all() {
        let pool = WorkerPool::new(2).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = pool.map(&[1, 2, 3], FanOutPolicy::default(), &cancel, |n| Ok(*n));
        assert!(outcomes.iter().all(|o| matches!(o, TaskOutcome::Skipped)));
    }
}

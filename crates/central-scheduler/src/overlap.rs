//! Overlap policy for controlling concurrent job execution.
//!
//! A rollup sweep that takes longer than its cadence must not pile up on
//! itself: the work queue is shared state, and redundant concurrent drains
//! are wasted work. The overlap policy decides whether a firing that lands
//! while the previous run is still active is skipped or allowed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Policy for handling overlapping job executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OverlapPolicy {
    /// Skip execution if the previous run is still active (recommended).
    #[default]
    Skip,

    /// Allow concurrent executions.
    Concurrent,
}

/// Tracks whether a job is currently running.
pub struct OverlapGuard {
    is_running: Arc<AtomicBool>,
    policy: OverlapPolicy,
}

impl OverlapGuard {
    pub fn new(policy: OverlapPolicy) -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            policy,
        }
    }

    /// Attempt to acquire the guard for execution.
    ///
    /// Returns `None` when the overlap policy says this firing should be
    /// skipped.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        match self.policy {
            OverlapPolicy::Skip => {
                if self
                    .is_running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    Some(RunGuard {
                        flag: self.is_running.clone(),
                    })
                } else {
                    None
                }
            }
            OverlapPolicy::Concurrent => Some(RunGuard {
                flag: Arc::new(AtomicBool::new(true)),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }
}

/// RAII guard that clears the running flag when dropped, so a panicking job
/// does not wedge subsequent firings.
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_prevents_concurrent() {
        let guard = OverlapGuard::new(OverlapPolicy::Skip);

        let run1 = guard.try_acquire();
        assert!(run1.is_some());
        assert!(guard.is_running());

        assert!(guard.try_acquire().is_none());

        drop(run1);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_concurrent_allows_multiple() {
        let guard = OverlapGuard::new(OverlapPolicy::Concurrent);
        let run1 = guard.try_acquire();
        let run2 = guard.try_acquire();
        assert!(run1.is_some() && run2.is_some());
    }

    #[test]
    fn test_run_guard_releases_on_drop() {
        let guard = OverlapGuard::new(OverlapPolicy::Skip);
        {
            let _run = guard.try_acquire().unwrap();
            assert!(guard.is_running());
        }
        assert!(!guard.is_running());
    }

    #[test]
    fn test_default_policy_is_skip() {
        assert_eq!(OverlapPolicy::default(), OverlapPolicy::Skip);
    }
}

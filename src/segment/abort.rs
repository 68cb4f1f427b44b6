//! Cooperative cancellation accounting for long-running merges.
//!
//! Checking an atomic flag on every document would cost more than the work
//! it guards; checking rarely would delay shutdown. The checker batches
//! heuristic work units and only reads the flag when the accumulated work
//! crosses [`ABORT_WORK_THRESHOLD`], which bounds cancellation latency to
//! roughly one threshold's worth of work regardless of merge size.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{PilumError, Result};

/// Work units accumulated between checks of the cancellation flag.
pub const ABORT_WORK_THRESHOLD: f64 = 10000.0;

/// A cancellation flag shared between a merge and its owner.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag {
    flag: Arc<AtomicBool>,
}

impl AbortFlag {
    /// Create a flag in the not-aborted state.
    pub fn new() -> Self {
        AbortFlag::default()
    }

    /// Request cancellation of the merge using this flag.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Accumulates work units and observes the abort flag at checkpoints.
#[derive(Debug, Default)]
pub struct AbortChecker {
    flag: Option<AbortFlag>,
    work_count: f64,
}

impl AbortChecker {
    /// A checker wired to `flag`.
    pub fn new(flag: AbortFlag) -> Self {
        AbortChecker {
            flag: Some(flag),
            work_count: 0.0,
        }
    }

    /// A checker that never aborts, for merges nobody can cancel.
    pub fn disabled() -> Self {
        AbortChecker::default()
    }

    /// Record that roughly `units` of work happened since the last call.
    ///
    /// Returns [`PilumError::MergeAborted`] once cancellation is observed.
    /// Callers sprinkle this into every loop doing non-trivial work; unit
    /// values are tuned so checkpoints land about once a second.
    pub fn work(&mut self, units: f64) -> Result<()> {
        let Some(flag) = &self.flag else {
            return Ok(());
        };

        self.work_count += units;
        if self.work_count >= ABORT_WORK_THRESHOLD {
            if flag.is_aborted() {
                return Err(PilumError::MergeAborted);
            }
            self.work_count = 0.0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_checker_never_aborts() {
        let mut checker = AbortChecker::disabled();
        for _ in 0..100 {
            checker.work(ABORT_WORK_THRESHOLD).unwrap();
        }
    }

    #[test]
    fn test_abort_observed_at_threshold() {
        let flag = AbortFlag::new();
        let mut checker = AbortChecker::new(flag.clone());

        checker.work(ABORT_WORK_THRESHOLD / 2.0).unwrap();
        flag.abort();
        // Still below threshold: flag not yet observed.
        checker.work(1.0).unwrap();

        let err = checker.work(ABORT_WORK_THRESHOLD).unwrap_err();
        assert!(err.is_aborted());
    }

    #[test]
    fn test_counter_resets_after_checkpoint() {
        let flag = AbortFlag::new();
        let mut checker = AbortChecker::new(flag.clone());

        checker.work(ABORT_WORK_THRESHOLD).unwrap();
        flag.abort();
        // A fresh accumulation window must fill before the next check.
        checker.work(1.0).unwrap();
        assert!(checker.work(ABORT_WORK_THRESHOLD).unwrap_err().is_aborted());
    }
}

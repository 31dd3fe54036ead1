// ─────────────────────────────────────────────────────────────────────
// SCPN Therapy Core — Run Control
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Cooperative cancellation and wall-clock budgets for long operations.
//!
//! Dose calculation, optimization and Monte Carlo observe the shared flag
//! at coarse checkpoints: between beams, between control points, between
//! iterations/generations and between particle batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag. Cloning is cheap; all clones observe the
/// same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next checkpoint.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Optional wall-clock budget for a long operation.
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    deadline: Option<Instant>,
}

impl RunBudget {
    /// Unbounded budget.
    pub fn unlimited() -> Self {
        RunBudget { deadline: None }
    }

    /// Budget expiring `limit` from now.
    pub fn with_limit(limit: Duration) -> Self {
        RunBudget {
            deadline: Some(Instant::now() + limit),
        }
    }

    pub fn expired(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

impl Default for RunBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// How a long operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Ran to completion.
    Completed,
    /// Stopped at a checkpoint after external cancellation.
    Cancelled,
    /// Stopped at a checkpoint after the wall-clock budget expired.
    TimedOut,
}

impl RunStatus {
    /// True when the associated result is the most recent consistent
    /// state rather than a finished computation.
    pub fn is_partial(&self) -> bool {
        !matches!(self, RunStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_unlimited_budget_never_expires() {
        let budget = RunBudget::unlimited();
        assert!(!budget.expired());
    }

    #[test]
    fn test_zero_budget_expires_immediately() {
        let budget = RunBudget::with_limit(Duration::from_secs(0));
        assert!(budget.expired());
    }

    #[test]
    fn test_partial_status() {
        assert!(!RunStatus::Completed.is_partial());
        assert!(RunStatus::Cancelled.is_partial());
        assert!(RunStatus::TimedOut.is_partial());
    }
}

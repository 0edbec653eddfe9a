//! Soft execution deadline for a dispatch cycle.
//!
//! The guard is cooperative: it is consulted before each batch and after each
//! send, and never interrupts a send already in progress.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct ExecutionGuard {
    started: Instant,
    budget: Duration,
}

impl ExecutionGuard {
    /// Start measuring now
    #[must_use]
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// `true` once the budget is spent; no further send should start
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.elapsed() >= self.budget
    }
}

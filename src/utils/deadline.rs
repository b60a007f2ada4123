use std::time::{Duration, Instant};

use crate::utils::ScraperError;

/// Caller supplied time bound for one query. `Deadline::none()` never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Deadline { at: None }
    }

    pub fn after(budget: Duration) -> Self {
        Deadline {
            at: Some(Instant::now() + budget),
        }
    }

    pub fn at(instant: Instant) -> Self {
        Deadline { at: Some(instant) }
    }

    /// A deadline no later than this one and at most `budget` from now.
    pub fn tightened(&self, budget: Duration) -> Self {
        let candidate = Instant::now() + budget;
        Deadline {
            at: Some(match self.at {
                Some(at) => at.min(candidate),
                None => candidate,
            }),
        }
    }

    /// Time left, or `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }

    pub fn check(&self) -> Result<(), ScraperError> {
        if self.is_expired() {
            return Err(ScraperError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Clamp a per-call timeout so it never outlives the deadline.
    pub fn clamp(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(left) => timeout.min(left),
            None => timeout,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}

use std::thread;
use std::time::Duration;

use log::debug;

use crate::utils::Deadline;

/// Bounded retry policy: how many attempts and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Zero-delay policy, used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Attempt numbers, starting at 1.
    pub fn attempts(&self) -> std::ops::RangeInclusive<u32> {
        1..=self.max_attempts
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Wait between attempts, never past the deadline.
    pub fn pause(&self, deadline: &Deadline) {
        let wait = deadline.clamp(self.delay);
        if wait.is_zero() {
            return;
        }
        debug!("Waiting {:?} before next attempt", wait);
        thread::sleep(wait);
    }
}

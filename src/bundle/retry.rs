//! Packaging retry policy.
//!
//! The decision is a pure function of the attempt number and its outcome so
//! the assembler's loop stays a thin effect layer.

use std::time::Duration;

/// Result of one packaging attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
}

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The attempt succeeded
    Done,
    /// Wait, then try again
    RetryAfter(Duration),
    /// No attempts left
    GiveUp,
}

/// Fixed-delay retry with a bounded number of total attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `attempts` counts the first try; a value of 0 is treated as 1.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Total attempts, including the first.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Decides what follows attempt number `attempt` (1-based).
    ///
    /// There is never a delay after the final attempt.
    pub fn decide(&self, attempt: u32, outcome: AttemptOutcome) -> RetryDecision {
        match outcome {
            AttemptOutcome::Succeeded => RetryDecision::Done,
            AttemptOutcome::Failed if attempt < self.attempts => {
                RetryDecision::RetryAfter(self.delay)
            }
            AttemptOutcome::Failed => RetryDecision::GiveUp,
        }
    }
}

//! Backoff schedule for receipt jobs that fail with a retryable error.

use std::time::Duration;

use rand::Rng;
use slipscan_core::SlipError;

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts allowed per job, counting the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Spread each delay by up to a quarter either way.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            jitter: true,
        }
    }

    /// Wait before the next attempt, once `attempts` attempts have failed.
    /// Doubles from `base_delay` and stops at `max_delay`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay));
        if self.jitter {
            spread(delay)
        } else {
            delay
        }
    }

    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Permanent errors and exhausted jobs give up; everything else waits.
    pub fn decide(&self, attempts: u32, err: &SlipError) -> RetryDecision {
        if err.is_retryable() && self.should_retry(attempts) {
            RetryDecision::RetryAfter(self.delay_for(attempts))
        } else {
            RetryDecision::GiveUp
        }
    }
}

fn spread(delay: Duration) -> Duration {
    let quarter = delay.as_millis() as u64 / 4;
    if quarter == 0 {
        return delay;
    }
    let roll = rand::thread_rng().gen_range(0..=quarter * 2);
    let millis = delay.as_millis() as u64 - quarter + roll;
    Duration::from_millis(millis)
}

//! Step, time, and attempt budgets for the agent loop.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("task deadline passed"));
    }
    Ok(remaining)
}

/// Per-key attempt counter for external calls that must not be retried forever.
///
/// Once a key is exhausted (by hitting the limit or by an explicit
/// [`AttemptLimiter::exhaust`]) every later [`AttemptLimiter::try_acquire`] for
/// that key fails without side effects.
#[derive(Debug, Clone)]
pub struct AttemptLimiter {
    max_attempts: u32,
    attempts: std::collections::BTreeMap<String, u32>,
}

impl AttemptLimiter {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: Default::default(),
        }
    }

    /// Record an attempt for `key`; returns false if the key is exhausted.
    pub fn try_acquire(&mut self, key: &str) -> bool {
        let count = self.attempts.entry(key.to_string()).or_insert(0);
        if *count >= self.max_attempts {
            return false;
        }
        *count += 1;
        true
    }

    /// Mark `key` as permanently exhausted (the kill-switch).
    pub fn exhaust(&mut self, key: &str) {
        self.attempts.insert(key.to_string(), self.max_attempts);
    }

    pub fn is_exhausted(&self, key: &str) -> bool {
        self.attempts
            .get(key)
            .is_some_and(|count| *count >= self.max_attempts)
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.get(key).copied().unwrap_or(0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_budget_errors_after_deadline() {
        let past = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(remaining_budget(past).is_err());
        assert!(remaining_budget(Instant::now() + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn limiter_stops_after_max_attempts() {
        let mut limiter = AttemptLimiter::new(2);
        assert!(limiter.try_acquire("PAY-1"));
        assert!(limiter.try_acquire("PAY-1"));
        assert!(!limiter.try_acquire("PAY-1"));
        assert!(limiter.is_exhausted("PAY-1"));
        assert!(limiter.try_acquire("PAY-2"));
        assert_eq!(limiter.attempts("PAY-2"), 1);
    }

    #[test]
    fn exhaust_is_a_kill_switch() {
        let mut limiter = AttemptLimiter::new(5);
        assert!(limiter.try_acquire("PAY-999"));
        limiter.exhaust("PAY-999");
        assert!(limiter.is_exhausted("PAY-999"));
        assert!(!limiter.try_acquire("PAY-999"));
    }
}

//! Retry policy with capped exponential backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// How often a job is attempted and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Growth factor applied per retry
    pub backoff_multiplier: f64,

    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default backoff curve.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Set the initial delay.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the delay cap.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Delay to wait after the `attempt`-th failure.
    ///
    /// `min(initial * multiplier^(attempt - 1), max_backoff)`; attempt 0 is
    /// treated like attempt 1.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let cap = self.max_backoff.as_secs_f64();
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        if !secs.is_finite() || secs >= cap {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Check the policy invariants. `field` prefixes error paths.
    pub fn validate(&self, field: &str) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(ConfigError::invalid(
                format!("{field}.max_attempts"),
                "must be at least 1",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                format!("{field}.backoff_multiplier"),
                format!("must be >= 1.0, got {}", self.backoff_multiplier),
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::invalid(
                format!("{field}.max_backoff_seconds"),
                "must not be smaller than backoff_seconds",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence_is_capped() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|n| policy.backoff_for(n).as_secs()).collect();
        assert_eq!(delays, vec![60, 120, 240, 480, 600, 600, 600]);
    }

    #[test]
    fn test_backoff_attempt_zero_uses_initial() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::default().with_multiplier(10.0);
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn test_constant_backoff() {
        let policy = RetryPolicy::new(4)
            .with_initial_backoff(Duration::from_secs(5))
            .with_multiplier(1.0);
        assert_eq!(policy.backoff_for(1), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RetryPolicy::new(0).validate("retry").is_err());
        assert!(RetryPolicy::default().with_multiplier(0.5).validate("retry").is_err());
        assert!(RetryPolicy::default()
            .with_max_backoff(Duration::from_secs(1))
            .validate("retry")
            .is_err());
        assert!(RetryPolicy::default().validate("retry").is_ok());
        assert!(RetryPolicy::no_retry().validate("retry").is_ok());
    }
}

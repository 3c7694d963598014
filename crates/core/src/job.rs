//! Per-platform job definition.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::retry::RetryPolicy;

/// Default per-job timeout (30 minutes).
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(1800);

/// Default priority; lower runs earlier within a wave.
pub const DEFAULT_PRIORITY: i32 = 1;

/// Static description of one platform extraction job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job name
    pub name: String,

    /// Disabled jobs are ignored by the orchestrator
    pub enabled: bool,

    /// Tie-break inside a wave, ascending
    pub priority: i32,

    /// Per-attempt time limit
    pub timeout: Duration,

    /// Retry behaviour
    pub retry: RetryPolicy,

    /// Jobs that must complete first
    pub dependencies: BTreeSet<String>,

    /// Job-specific settings handed to the job's config loader
    pub settings: serde_json::Value,
}

impl JobConfig {
    /// Create an enabled job with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            priority: DEFAULT_PRIORITY,
            timeout: DEFAULT_JOB_TIMEOUT,
            retry: RetryPolicy::default(),
            dependencies: BTreeSet::new(),
            settings: serde_json::Value::Null,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Add dependencies.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Set job-specific settings.
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    /// Enable or disable the job.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check the fields that do not depend on other jobs.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid(
                format!("platforms.{}.timeout", self.name),
                "must be greater than zero",
            ));
        }
        if self.dependencies.contains(&self.name) {
            return Err(ConfigError::DependencyCycle {
                job: self.name.clone(),
                path: vec![self.name.clone(), self.name.clone()],
            });
        }
        self.retry.validate(&format!("platforms.{}.retry", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_defaults() {
        let job = JobConfig::new("facebook");
        assert!(job.enabled);
        assert_eq!(job.priority, 1);
        assert_eq!(job.timeout, Duration::from_secs(1800));
        assert_eq!(job.retry.max_attempts, 3);
        assert!(job.dependencies.is_empty());
    }

    #[test]
    fn test_job_builder() {
        let job = JobConfig::new("google_ads")
            .with_priority(5)
            .with_dependencies(["facebook", "tiktok"])
            .enabled(false);

        assert_eq!(job.priority, 5);
        assert!(!job.enabled);
        assert!(job.dependencies.contains("facebook"));
        assert!(job.dependencies.contains("tiktok"));
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        assert!(matches!(JobConfig::new("  ").validate(), Err(ConfigError::EmptyName)));
    }

    #[test]
    fn test_validate_rejects_self_dependency() {
        let job = JobConfig::new("a").with_dependencies(["a"]);
        assert!(matches!(job.validate(), Err(ConfigError::DependencyCycle { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let job = JobConfig::new("a").with_timeout(Duration::ZERO);
        assert!(matches!(job.validate(), Err(ConfigError::InvalidValue { .. })));
    }
}

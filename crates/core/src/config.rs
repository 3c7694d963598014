//! Orchestrator configuration and its YAML representation.
//!
//! The YAML document has three top-level sections:
//!
//! ```yaml
//! orchestrator: {parallel_execution: true, max_parallel: 3, continue_on_failure: true, global_timeout: 7200}
//! platforms:
//!   - name: facebook
//!     retry: {max_attempts: 3, backoff_seconds: 60, backoff_multiplier: 2.0, max_backoff_seconds: 600}
//!   - name: google_ads
//!     dependencies: [facebook]
//! parallel_groups: [[facebook, tiktok]]
//! ```
//!
//! Parsing goes through private raw structs carrying the serde defaults and is
//! then validated into [`OrchestratorConfig`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::job::JobConfig;
use crate::retry::RetryPolicy;

/// Default run-wide time limit (2 hours).
pub const DEFAULT_GLOBAL_TIMEOUT: Duration = Duration::from_secs(7200);

/// Default worker cap for parallel waves.
pub const DEFAULT_MAX_PARALLEL: usize = 3;

/// Validated, immutable description of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Jobs in declaration order
    pub jobs: Vec<JobConfig>,

    /// Run wave members concurrently
    pub parallel_execution: bool,

    /// Worker cap per wave
    pub max_parallel: usize,

    /// Keep going after a job exhausts its retries
    pub continue_on_failure: bool,

    /// Time limit for the whole run
    pub global_timeout: Duration,

    /// Caller-declared groups whose members must not depend on each other
    pub parallel_groups: Vec<Vec<String>>,
}

impl OrchestratorConfig {
    /// Create a sequential configuration over `jobs`.
    pub fn new(jobs: Vec<JobConfig>) -> Self {
        Self {
            jobs,
            parallel_execution: false,
            max_parallel: DEFAULT_MAX_PARALLEL,
            continue_on_failure: true,
            global_timeout: DEFAULT_GLOBAL_TIMEOUT,
            parallel_groups: Vec::new(),
        }
    }

    /// Enable parallel waves with the given worker cap.
    pub fn with_parallel(mut self, max_parallel: usize) -> Self {
        self.parallel_execution = true;
        self.max_parallel = max_parallel;
        self
    }

    /// Set whether a failed job aborts the run.
    pub fn with_continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        self.continue_on_failure = continue_on_failure;
        self
    }

    /// Set the run-wide time limit.
    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = timeout;
        self
    }

    /// Set predefined parallel groups.
    pub fn with_parallel_groups(mut self, groups: Vec<Vec<String>>) -> Self {
        self.parallel_groups = groups;
        self
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(yaml)?;
        let config = raw.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Look up a job by name.
    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Enabled jobs in declaration order.
    pub fn enabled_jobs(&self) -> Vec<&JobConfig> {
        self.jobs.iter().filter(|j| j.enabled).collect()
    }

    /// Check every invariant that does not need graph traversal.
    ///
    /// Cycles and intra-group dependencies are checked by the scheduler.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel < 1 {
            return Err(ConfigError::invalid(
                "orchestrator.max_parallel",
                "must be at least 1",
            ));
        }
        if self.global_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "orchestrator.global_timeout",
                "must be greater than zero",
            ));
        }

        let mut names = HashSet::with_capacity(self.jobs.len());
        for job in &self.jobs {
            job.validate()?;
            if !names.insert(job.name.as_str()) {
                return Err(ConfigError::DuplicateJob(job.name.clone()));
            }
        }

        for job in &self.jobs {
            if let Some(dep) = job.dependencies.iter().find(|d| !names.contains(d.as_str())) {
                return Err(ConfigError::UnknownDependency {
                    job: job.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        for (group, members) in self.parallel_groups.iter().enumerate() {
            if let Some(unknown) = members.iter().find(|m| !names.contains(m.as_str())) {
                return Err(ConfigError::UnknownGroupMember {
                    group,
                    job: unknown.clone(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    orchestrator: RawOrchestrator,
    #[serde(default)]
    platforms: Vec<RawPlatform>,
    #[serde(default)]
    parallel_groups: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawOrchestrator {
    #[serde(default)]
    parallel_execution: bool,
    #[serde(default = "default_max_parallel")]
    max_parallel: usize,
    #[serde(default = "default_true")]
    continue_on_failure: bool,
    #[serde(default = "default_global_timeout")]
    global_timeout: u64,
}

impl Default for RawOrchestrator {
    fn default() -> Self {
        Self {
            parallel_execution: false,
            max_parallel: default_max_parallel(),
            continue_on_failure: true,
            global_timeout: default_global_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPlatform {
    name: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_priority")]
    priority: i32,
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default)]
    retry: RawRetry,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    settings: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawRetry {
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_backoff_seconds")]
    backoff_seconds: u64,
    #[serde(default = "default_backoff_multiplier")]
    backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_seconds")]
    max_backoff_seconds: u64,
}

impl Default for RawRetry {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_seconds: default_backoff_seconds(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_seconds: default_max_backoff_seconds(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}

fn default_global_timeout() -> u64 {
    DEFAULT_GLOBAL_TIMEOUT.as_secs()
}

fn default_priority() -> i32 {
    crate::job::DEFAULT_PRIORITY
}

fn default_timeout() -> u64 {
    crate::job::DEFAULT_JOB_TIMEOUT.as_secs()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_seconds() -> u64 {
    60
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_seconds() -> u64 {
    600
}

impl RawConfig {
    fn into_config(self) -> OrchestratorConfig {
        let jobs = self
            .platforms
            .into_iter()
            .map(|p| JobConfig {
                name: p.name,
                enabled: p.enabled,
                priority: p.priority,
                timeout: Duration::from_secs(p.timeout),
                retry: RetryPolicy {
                    max_attempts: p.retry.max_attempts,
                    initial_backoff: Duration::from_secs(p.retry.backoff_seconds),
                    backoff_multiplier: p.retry.backoff_multiplier,
                    max_backoff: Duration::from_secs(p.retry.max_backoff_seconds),
                },
                dependencies: p.dependencies.into_iter().collect::<BTreeSet<_>>(),
                settings: p.settings,
            })
            .collect();

        OrchestratorConfig {
            jobs,
            parallel_execution: self.orchestrator.parallel_execution,
            max_parallel: self.orchestrator.max_parallel,
            continue_on_failure: self.orchestrator.continue_on_failure,
            global_timeout: Duration::from_secs(self.orchestrator.global_timeout),
            parallel_groups: self.parallel_groups,
        }
    }
}

//! The job capability implemented by platform extractors.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::monitor::ExecutionMonitor;

/// Tables written by one job run, mapped to their row counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    /// Rows per table
    pub tables: BTreeMap<String, u64>,
}

impl JobOutput {
    /// Create an empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table.
    pub fn with_table(mut self, table: impl Into<String>, rows: u64) -> Self {
        self.add_table(table, rows);
        self
    }

    /// Add a table, accumulating rows if it was already reported.
    pub fn add_table(&mut self, table: impl Into<String>, rows: u64) {
        *self.tables.entry(table.into()).or_insert(0) += rows;
    }

    /// Total rows over all tables.
    pub fn rows_processed(&self) -> u64 {
        self.tables.values().sum()
    }

    /// Number of tables.
    pub fn tables_processed(&self) -> u64 {
        self.tables.len() as u64
    }
}

/// Failure reported by a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Worth retrying (network, rate limits, upstream hiccups)
    #[error("{0:#}")]
    Transient(anyhow::Error),

    /// Retrying cannot help (bad credentials, invalid account)
    #[error("{0:#}")]
    Fatal(anyhow::Error),
}

impl JobError {
    /// Transient error from a message.
    pub fn transient(message: impl Into<String>) -> Self {
        JobError::Transient(anyhow::anyhow!(message.into()))
    }

    /// Fatal error from a message.
    pub fn fatal(message: impl Into<String>) -> Self {
        JobError::Fatal(anyhow::anyhow!(message.into()))
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::Transient(err)
    }
}

/// Lets a running job publish intermediate counts.
#[derive(Clone)]
pub struct ProgressHandle {
    monitor: Arc<ExecutionMonitor>,
    job_name: String,
}

impl ProgressHandle {
    pub(crate) fn new(monitor: Arc<ExecutionMonitor>, job_name: impl Into<String>) -> Self {
        Self {
            monitor,
            job_name: job_name.into(),
        }
    }

    /// Update row and/or table counts without changing status.
    pub fn update(&self, rows: Option<u64>, tables: Option<u64>) {
        self.monitor.update_progress(&self.job_name, rows, tables);
    }
}

impl std::fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHandle")
            .field("job_name", &self.job_name)
            .finish()
    }
}

/// Per-attempt information passed to a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job name
    pub job_name: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// Attempts allowed by the retry policy
    pub max_attempts: u32,
    /// Time the attempt may take before it is cancelled
    pub time_limit: Duration,
    /// Progress reporting
    pub progress: ProgressHandle,
}

/// A named, runnable extraction unit.
#[async_trait]
pub trait Job: Send + Sync {
    /// Extract and load the platform's data.
    async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError>;
}

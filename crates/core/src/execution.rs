//! Per-job execution records and the run summary derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Time;

/// Lifecycle of one job within a run.
///
/// `Pending -> Running -> {Completed, Failed, Skipped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Registered, not started
    Pending,
    /// An attempt is in flight
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Never run
    Skipped,
}

impl ExecutionStatus {
    /// Whether no further transition happens within a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Skipped
        )
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution record for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    /// Job name
    pub job_name: String,

    /// Current status
    pub status: ExecutionStatus,

    /// Start of the latest attempt
    pub start_time: Option<Time>,

    /// When a terminal state was reached
    pub end_time: Option<Time>,

    /// `end_time - start_time` in seconds
    pub duration_seconds: Option<f64>,

    /// Rows extracted and loaded
    pub rows_processed: u64,

    /// Tables written
    pub tables_processed: u64,

    /// Failure or skip reason
    pub error_message: Option<String>,

    /// Retries performed (attempts minus one)
    pub retry_count: u32,
}

impl JobExecution {
    /// Create a pending record.
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            status: ExecutionStatus::Pending,
            start_time: None,
            end_time: None,
            duration_seconds: None,
            rows_processed: 0,
            tables_processed: 0,
            error_message: None,
            retry_count: 0,
        }
    }

    /// Enter `Running`. Counts restart at zero for the new attempt.
    pub fn mark_running(&mut self, now: Time) {
        self.status = ExecutionStatus::Running;
        self.start_time = Some(now);
        self.end_time = None;
        self.duration_seconds = None;
        self.rows_processed = 0;
        self.tables_processed = 0;
        self.error_message = None;
    }

    /// Enter `Completed` with final counts.
    pub fn mark_completed(&mut self, now: Time, rows: u64, tables: u64) {
        self.status = ExecutionStatus::Completed;
        self.rows_processed = rows;
        self.tables_processed = tables;
        self.error_message = None;
        self.finish(now);
    }

    /// Enter `Failed` with partial counts.
    pub fn mark_failed(&mut self, now: Time, error: impl Into<String>, rows: u64, tables: u64) {
        self.status = ExecutionStatus::Failed;
        self.rows_processed = rows;
        self.tables_processed = tables;
        self.error_message = Some(error.into());
        self.finish(now);
    }

    /// Enter `Skipped`; timing stays unset.
    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.status = ExecutionStatus::Skipped;
        self.error_message = Some(reason.into());
    }

    fn finish(&mut self, now: Time) {
        let start = *self.start_time.get_or_insert(now);
        self.end_time = Some(now);
        let elapsed = (now - start).num_milliseconds().max(0);
        self.duration_seconds = Some(elapsed as f64 / 1000.0);
    }
}

/// Aggregate over every execution record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Registered jobs
    pub total_jobs: usize,
    /// Jobs still pending
    pub pending: usize,
    /// Jobs in flight
    pub running: usize,
    /// Jobs completed
    pub completed: usize,
    /// Jobs failed
    pub failed: usize,
    /// Jobs skipped
    pub skipped: usize,
    /// Sum of rows over all jobs
    pub total_rows: u64,
    /// Sum of tables over all jobs
    pub total_tables: u64,
    /// Sum of retries over all jobs
    pub total_retries: u64,
    /// `completed / total * 100`, zero for an empty run
    pub success_rate: f64,
    /// Earliest start time
    pub start_time: Option<Time>,
    /// Latest end time
    pub end_time: Option<Time>,
    /// Wall-clock span between `start_time` and `end_time`
    pub total_duration_seconds: f64,
}

impl ExecutionSummary {
    /// Fold a set of records into a summary.
    pub fn from_executions<'a, I>(executions: I) -> Self
    where
        I: IntoIterator<Item = &'a JobExecution>,
    {
        let mut summary = ExecutionSummary {
            total_jobs: 0,
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
            total_rows: 0,
            total_tables: 0,
            total_retries: 0,
            success_rate: 0.0,
            start_time: None,
            end_time: None,
            total_duration_seconds: 0.0,
        };

        for exec in executions {
            summary.total_jobs += 1;
            match exec.status {
                ExecutionStatus::Pending => summary.pending += 1,
                ExecutionStatus::Running => summary.running += 1,
                ExecutionStatus::Completed => summary.completed += 1,
                ExecutionStatus::Failed => summary.failed += 1,
                ExecutionStatus::Skipped => summary.skipped += 1,
            }
            summary.total_rows += exec.rows_processed;
            summary.total_tables += exec.tables_processed;
            summary.total_retries += u64::from(exec.retry_count);

            if let Some(start) = exec.start_time {
                summary.start_time = Some(summary.start_time.map_or(start, |s| s.min(start)));
            }
            if let Some(end) = exec.end_time {
                summary.end_time = Some(summary.end_time.map_or(end, |e| e.max(end)));
            }
        }

        if summary.total_jobs > 0 {
            summary.success_rate = summary.completed as f64 / summary.total_jobs as f64 * 100.0;
        }
        if let (Some(start), Some(end)) = (summary.start_time, summary.end_time) {
            summary.total_duration_seconds = (end - start).num_milliseconds().max(0) as f64 / 1000.0;
        }

        summary
    }
}

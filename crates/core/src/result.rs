//! Final outcome of an orchestrator run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::execution::{ExecutionStatus, ExecutionSummary, JobExecution};

/// Process exit code for a fully successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: i32 = 1;
/// Process exit code when some jobs completed and some did not.
pub const EXIT_PARTIAL_SUCCESS: i32 = 2;
/// Process exit code when no job completed.
pub const EXIT_TOTAL_FAILURE: i32 = 3;
/// Process exit code for unexpected orchestrator errors.
pub const EXIT_UNEXPECTED_ERROR: i32 = 4;

/// Outcome of one run, built from the monitor's final state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorResult {
    /// No failures and every job completed
    pub success: bool,

    /// Completed jobs, in registration order
    pub completed: Vec<String>,

    /// Failed jobs, in registration order
    pub failed: Vec<String>,

    /// Skipped jobs, in registration order
    pub skipped: Vec<String>,

    /// Waves that were scheduled for the run
    pub waves: Vec<Vec<String>>,

    /// Wall-clock duration of the run
    pub total_duration_seconds: f64,

    /// Rows over all jobs
    pub total_rows_processed: u64,

    /// Tables over all jobs
    pub total_tables_processed: u64,

    /// Failure reason per failed job
    pub error_summary: BTreeMap<String, String>,

    /// Aggregate counts
    pub summary: ExecutionSummary,
}

impl OrchestratorResult {
    /// Build a result from execution records.
    pub fn from_executions(
        executions: &[JobExecution],
        waves: Vec<Vec<String>>,
        total_duration_seconds: f64,
    ) -> Self {
        let summary = ExecutionSummary::from_executions(executions);

        let names_with = |status: ExecutionStatus| -> Vec<String> {
            executions
                .iter()
                .filter(|e| e.status == status)
                .map(|e| e.job_name.clone())
                .collect()
        };

        let error_summary = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Failed)
            .map(|e| {
                let message = e.error_message.clone().unwrap_or_else(|| "unknown error".to_string());
                (e.job_name.clone(), message)
            })
            .collect();

        Self {
            success: summary.failed == 0 && summary.completed == summary.total_jobs,
            completed: names_with(ExecutionStatus::Completed),
            failed: names_with(ExecutionStatus::Failed),
            skipped: names_with(ExecutionStatus::Skipped),
            waves,
            total_duration_seconds,
            total_rows_processed: summary.total_rows,
            total_tables_processed: summary.total_tables,
            error_summary,
            summary,
        }
    }

    /// Exit code for a driving process: 0 success, 2 partial, 3 total failure.
    pub fn exit_code(&self) -> i32 {
        if self.success {
            EXIT_SUCCESS
        } else if !self.completed.is_empty() {
            EXIT_PARTIAL_SUCCESS
        } else {
            EXIT_TOTAL_FAILURE
        }
    }
}

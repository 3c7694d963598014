//! Execution monitoring: per-job status transitions, run summary and reports.
//!
//! One [`JobExecution`] record exists per job name. Records are created on
//! first reference and mutated only through the transition methods below.
//! The record store sits behind a mutex so a mid-wave [`ExecutionMonitor::summary`]
//! sees each record either before or after a transition, never half-written.

use adsync_core::{ExecutionStatus, ExecutionSummary, JobExecution};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Header row of the CSV report.
pub const CSV_COLUMNS: [&str; 9] = [
    "name",
    "status",
    "start_time",
    "end_time",
    "duration_seconds",
    "rows_processed",
    "tables_processed",
    "retry_count",
    "error_message",
];

/// Errors while exporting a report.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File extension is neither `.json` nor `.csv`
    #[error("unsupported report format: {0}")]
    UnsupportedFormat(String),
}

/// JSON report layout: `{summary: {...}, jobs: [{...}]}`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Aggregate counts
    pub summary: ExecutionSummary,
    /// Every record in registration order
    pub jobs: Vec<JobExecution>,
}

#[derive(Debug, Default)]
struct MonitorState {
    order: Vec<String>,
    records: HashMap<String, JobExecution>,
}

impl MonitorState {
    /// Record for `name`, created on first reference. The flag is true when
    /// the record was just created.
    fn entry(&mut self, name: &str) -> (&mut JobExecution, bool) {
        match self.records.entry(name.to_string()) {
            Entry::Occupied(slot) => (slot.into_mut(), false),
            Entry::Vacant(slot) => {
                self.order.push(name.to_string());
                (slot.insert(JobExecution::new(name)), true)
            }
        }
    }

    fn ordered(&self) -> Vec<JobExecution> {
        self.order
            .iter()
            .filter_map(|name| self.records.get(name).cloned())
            .collect()
    }
}

/// Tracks the state of every job in one orchestrator run.
///
/// Transitions hold the lock only while mutating a record; tracing events
/// are emitted after it is released.
#[derive(Debug, Default)]
pub struct ExecutionMonitor {
    state: Mutex<MonitorState>,
}

impl ExecutionMonitor {
    /// Create an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to the record for `name` under the lock and return its output.
    fn with_record<R>(&self, name: &str, f: impl FnOnce(&mut JobExecution) -> R) -> R {
        let (output, created) = {
            let mut state = self.state.lock();
            let (exec, created) = state.entry(name);
            (f(exec), created)
        };
        if created {
            debug!(job = name, "Registering job execution");
        }
        output
    }

    /// Register a job as pending. Existing records are left untouched.
    pub fn register(&self, name: &str) {
        self.with_record(name, |_| ());
    }

    /// Move a job to running and record its start time.
    pub fn start(&self, name: &str) {
        let retry = self.with_record(name, |exec| {
            exec.mark_running(Utc::now());
            exec.retry_count
        });
        info!(job = name, retry, "Job started");
    }

    /// Move a job to completed with its final counts.
    pub fn complete(&self, name: &str, rows: u64, tables: u64) {
        let duration_secs = self.with_record(name, |exec| {
            exec.mark_completed(Utc::now(), rows, tables);
            exec.duration_seconds.unwrap_or_default()
        });
        info!(job = name, rows, tables, duration_secs, "Job completed");
    }

    /// Move a job to failed with partial counts.
    pub fn fail(&self, name: &str, error: &str, rows: u64, tables: u64) {
        let retries = self.with_record(name, |exec| {
            exec.mark_failed(Utc::now(), error, rows, tables);
            exec.retry_count
        });
        error!(job = name, retries, error, "Job failed");
    }

    /// Move a job to skipped.
    pub fn skip(&self, name: &str, reason: &str) {
        self.with_record(name, |exec| exec.mark_skipped(reason));
        warn!(job = name, reason, "Job skipped");
    }

    /// Update counts without changing status.
    pub fn update_progress(&self, name: &str, rows: Option<u64>, tables: Option<u64>) {
        let (rows, tables) = self.with_record(name, |exec| {
            if let Some(rows) = rows {
                exec.rows_processed = rows;
            }
            if let Some(tables) = tables {
                exec.tables_processed = tables;
            }
            (exec.rows_processed, exec.tables_processed)
        });
        debug!(job = name, rows, tables, "Progress updated");
    }

    /// Count one more retry.
    pub fn increment_retry(&self, name: &str) {
        let retry = self.with_record(name, |exec| {
            exec.retry_count += 1;
            exec.retry_count
        });
        warn!(job = name, retry, "Retrying job");
    }

    /// Snapshot of one record.
    pub fn get(&self, name: &str) -> Option<JobExecution> {
        self.state.lock().records.get(name).cloned()
    }

    /// Snapshot of every record in registration order.
    pub fn executions(&self) -> Vec<JobExecution> {
        self.state.lock().ordered()
    }

    fn names_with(&self, status: ExecutionStatus) -> Vec<String> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter(|name| state.records.get(*name).map(|e| e.status) == Some(status))
            .cloned()
            .collect()
    }

    /// Names of completed jobs.
    pub fn completed_jobs(&self) -> HashSet<String> {
        self.names_with(ExecutionStatus::Completed).into_iter().collect()
    }

    /// Names of failed jobs, in registration order.
    pub fn failed_jobs(&self) -> Vec<String> {
        self.names_with(ExecutionStatus::Failed)
    }

    /// Names of running jobs, in registration order.
    pub fn running_jobs(&self) -> Vec<String> {
        self.names_with(ExecutionStatus::Running)
    }

    /// Names of pending jobs, in registration order.
    pub fn pending_jobs(&self) -> Vec<String> {
        self.names_with(ExecutionStatus::Pending)
    }

    /// Aggregate over all records.
    pub fn summary(&self) -> ExecutionSummary {
        let state = self.state.lock();
        ExecutionSummary::from_executions(state.records.values())
    }

    /// Emit the summary and every failure through `tracing`.
    pub fn log_summary(&self) {
        let summary = self.summary();
        info!(
            total = summary.total_jobs,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            rows = summary.total_rows,
            tables = summary.total_tables,
            retries = summary.total_retries,
            success_rate = summary.success_rate,
            duration_secs = summary.total_duration_seconds,
            "Execution summary"
        );

        for exec in self.executions() {
            if exec.status == ExecutionStatus::Failed {
                error!(
                    job = %exec.job_name,
                    error = exec.error_message.as_deref().unwrap_or_default(),
                    "Failed job"
                );
            }
        }
    }

    /// Summary plus every record.
    pub fn report(&self) -> ExecutionReport {
        let state = self.state.lock();
        ExecutionReport {
            summary: ExecutionSummary::from_executions(state.records.values()),
            jobs: state.ordered(),
        }
    }

    /// Report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(&self.report())?)
    }

    /// Report as CSV, one row per job.
    pub fn to_csv(&self) -> Result<String, ExportError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(CSV_COLUMNS)?;

        for exec in self.executions() {
            writer.write_record(csv_row(&exec))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| ExportError::Io(e.into_error()))?;
        String::from_utf8(bytes)
            .map_err(|e| ExportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// Write the JSON report to `path`.
    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        info!(path = %path.as_ref().display(), "Exported JSON report");
        Ok(())
    }

    /// Write the CSV report to `path`.
    pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        std::fs::write(path.as_ref(), self.to_csv()?)?;
        info!(path = %path.as_ref().display(), "Exported CSV report");
        Ok(())
    }

    /// Write a report, choosing the format from the file extension.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "json" => self.export_json(path),
            "csv" => self.export_csv(path),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

fn csv_row(exec: &JobExecution) -> [String; 9] {
    [
        exec.job_name.clone(),
        exec.status.to_string(),
        exec.start_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
        exec.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
        exec.duration_seconds.map(|d| d.to_string()).unwrap_or_default(),
        exec.rows_processed.to_string(),
        exec.tables_processed.to_string(),
        exec.retry_count.to_string(),
        exec.error_message.clone().unwrap_or_default(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    #[test]
    fn test_start_then_complete() {
        let monitor = ExecutionMonitor::new();
        monitor.register("facebook");
        assert_eq!(monitor.get("facebook").unwrap().status, ExecutionStatus::Pending);

        monitor.start("facebook");
        assert_eq!(monitor.running_jobs(), vec!["facebook"]);

        monitor.complete("facebook", 100, 3);
        let exec = monitor.get("facebook").unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.rows_processed, 100);
        assert_eq!(exec.tables_processed, 3);
        assert!(exec.duration_seconds.unwrap() >= 0.0);
        assert!(monitor.completed_jobs().contains("facebook"));
    }

    #[test]
    fn test_unknown_names_auto_register() {
        let monitor = ExecutionMonitor::new();
        monitor.increment_retry("ghost");
        monitor.fail("phantom", "boom", 1, 0);
        monitor.skip("spectre", "disabled upstream");

        assert_eq!(monitor.get("ghost").unwrap().retry_count, 1);
        assert_eq!(monitor.failed_jobs(), vec!["phantom"]);
        assert_eq!(monitor.get("spectre").unwrap().status, ExecutionStatus::Skipped);
        assert_eq!(monitor.executions().len(), 3);
    }

    #[test]
    fn test_register_is_idempotent() {
        let monitor = ExecutionMonitor::new();
        monitor.start("a");
        monitor.register("a");

        assert_eq!(monitor.get("a").unwrap().status, ExecutionStatus::Running);
        assert_eq!(monitor.executions().len(), 1);
    }

    #[test]
    fn test_progress_and_retry_keep_status() {
        let monitor = ExecutionMonitor::new();
        monitor.start("tiktok");
        monitor.update_progress("tiktok", Some(10), None);
        monitor.update_progress("tiktok", None, Some(1));
        monitor.increment_retry("tiktok");

        let exec = monitor.get("tiktok").unwrap();
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert_eq!(exec.rows_processed, 10);
        assert_eq!(exec.tables_processed, 1);
        assert_eq!(exec.retry_count, 1);
    }

    #[test]
    fn test_empty_summary() {
        let summary = ExecutionMonitor::new().summary();
        assert_eq!(summary.total_jobs, 0);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[test]
    fn test_summary_success_rate() {
        let monitor = ExecutionMonitor::new();
        for name in ["a", "b", "c", "d"] {
            monitor.register(name);
        }
        monitor.start("a");
        monitor.complete("a", 5, 1);
        monitor.start("b");
        monitor.fail("b", "bad gateway", 0, 0);
        monitor.skip("c", "run aborted");

        let summary = monitor.summary();
        assert_eq!(summary.total_jobs, 4);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.success_rate, 25.0);
    }

    #[test]
    fn test_json_report_layout() {
        let monitor = ExecutionMonitor::new();
        monitor.start("bing");
        monitor.complete("bing", 7, 1);

        let json: serde_json::Value = serde_json::from_str(&monitor.to_json().unwrap()).unwrap();
        assert_eq!(json["summary"]["total_jobs"], 1);
        assert_eq!(json["jobs"][0]["job_name"], "bing");
        assert_eq!(json["jobs"][0]["status"], "completed");

        // Exporting does not mutate state.
        assert_eq!(monitor.get("bing").unwrap().rows_processed, 7);
    }

    #[test]
    fn test_csv_report_layout() {
        let monitor = ExecutionMonitor::new();
        monitor.register("pending_job");
        monitor.start("failed_job");
        monitor.fail("failed_job", "quota, exceeded", 3, 1);

        let csv = monitor.to_csv().unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), CSV_COLUMNS.join(","));
        assert_eq!(lines.next().unwrap(), "pending_job,pending,,,,0,0,0,");

        let failed = lines.next().unwrap();
        assert!(failed.starts_with("failed_job,failed,"));
        assert!(failed.ends_with(",3,1,0,\"quota, exceeded\""));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_export_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = ExecutionMonitor::new();
        monitor.start("a");
        monitor.complete("a", 1, 1);

        let json_path = dir.path().join("report.json");
        let csv_path = dir.path().join("report.CSV");
        monitor.export(&json_path).unwrap();
        monitor.export(&csv_path).unwrap();

        assert!(std::fs::read_to_string(json_path).unwrap().contains("\"summary\""));
        assert!(std::fs::read_to_string(csv_path).unwrap().starts_with("name,status"));
        assert!(matches!(
            monitor.export(dir.path().join("report.xml")),
            Err(ExportError::UnsupportedFormat(ext)) if ext == "xml"
        ));
    }

    #[test]
    fn test_concurrent_transitions() {
        let monitor = Arc::new(ExecutionMonitor::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let monitor = monitor.clone();
                std::thread::spawn(move || {
                    let name = format!("job-{i}");
                    monitor.start(&name);
                    let _ = monitor.summary();
                    monitor.complete(&name, i, 1);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let summary = monitor.summary();
        assert_eq!(summary.completed, 8);
        assert_eq!(summary.total_rows, (0..8).sum::<u64>());
    }

    /// Counts events emitted while the monitor lock is held.
    struct LockCheck {
        monitor: Arc<ExecutionMonitor>,
        events: Arc<AtomicUsize>,
        under_lock: Arc<AtomicUsize>,
    }

    impl<S: tracing::Subscriber> Layer<S> for LockCheck {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            self.events.fetch_add(1, Ordering::SeqCst);
            if self.monitor.state.try_lock().is_none() {
                self.under_lock.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_events_are_emitted_after_unlock() {
        let monitor = Arc::new(ExecutionMonitor::new());
        let events = Arc::new(AtomicUsize::new(0));
        let under_lock = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(LockCheck {
            monitor: monitor.clone(),
            events: events.clone(),
            under_lock: under_lock.clone(),
        });

        tracing::subscriber::with_default(subscriber, || {
            monitor.register("pinterest");
            monitor.start("pinterest");
            monitor.update_progress("pinterest", Some(3), Some(1));
            monitor.fail("pinterest", "rate limited", 3, 1);
            monitor.increment_retry("pinterest");
            monitor.start("pinterest");
            monitor.complete("pinterest", 9, 2);
            monitor.skip("snapchat", "upstream failed");
        });

        assert!(events.load(Ordering::SeqCst) >= 8);
        assert_eq!(under_lock.load(Ordering::SeqCst), 0);
    }
}

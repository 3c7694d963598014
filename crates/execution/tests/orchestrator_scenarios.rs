//! End-to-end runs through the public API: config, registry, orchestrator, report.

use adsync_core::{ExecutionStatus, JobConfig, OrchestratorConfig, RetryPolicy};
use adsync_execution::{
    ExecutionMonitor, Job, JobContext, JobError, JobOutput, JobRegistry, JobSpec, Orchestrator,
    OrchestratorError,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stand-in for warehouse credentials handed to every extractor.
struct Warehouse {
    dataset: String,
}

struct PlatformJob {
    table_prefix: String,
    fail: bool,
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl Job for PlatformJob {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(JobError::transient(format!(
                "{}: API quota exhausted (attempt {}/{})",
                ctx.job_name, ctx.attempt, ctx.max_attempts
            )));
        }
        Ok(JobOutput::new()
            .with_table(format!("{}_campaigns", self.table_prefix), 12)
            .with_table(format!("{}_insights", self.table_prefix), 88))
    }
}

fn registry_for(jobs: &[&str], failing: &[&str], attempts: &Arc<AtomicU32>) -> JobRegistry<Warehouse> {
    let mut registry = JobRegistry::new();
    for name in jobs {
        let fail = failing.contains(name);
        let attempts = attempts.clone();
        registry.register(
            *name,
            move |spec: JobSpec<'_, Warehouse>| -> anyhow::Result<Arc<dyn Job>> {
                let prefix = spec.settings["prefix"].as_str().unwrap_or(spec.name);
                Ok(Arc::new(PlatformJob {
                    table_prefix: format!("{}.{}", spec.shared.dataset, prefix),
                    fail,
                    attempts: attempts.clone(),
                }))
            },
            |name: &str| Ok(json!({ "prefix": name.to_uppercase() })),
            serde_json::Map::new(),
        );
    }
    registry
}

fn warehouse() -> Arc<Warehouse> {
    Arc::new(Warehouse {
        dataset: "marketing".to_string(),
    })
}

fn names(list: &[String]) -> BTreeSet<&str> {
    list.iter().map(String::as_str).collect()
}

#[tokio::test(start_paused = true)]
async fn dependent_jobs_run_in_separate_waves() {
    let config = OrchestratorConfig::from_yaml_str(
        r#"
orchestrator:
  parallel_execution: true
  max_parallel: 2
platforms:
  - name: a
    retry: {max_attempts: 1}
  - name: b
    dependencies: [a]
    retry: {max_attempts: 1}
"#,
    )
    .unwrap();
    let attempts = Arc::new(AtomicU32::new(0));
    let registry = registry_for(&["a", "b"], &[], &attempts);
    let orchestrator = Orchestrator::new(config, registry, warehouse()).unwrap();

    let result = orchestrator.run_all().await.unwrap();

    assert_eq!(result.waves, vec![vec!["a".to_string()], vec!["b".to_string()]]);
    assert!(result.success);
    assert_eq!(names(&result.completed), BTreeSet::from(["a", "b"]));
    assert_eq!(result.total_rows_processed, 200);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failing_sibling_is_isolated_when_continuing() {
    let retry = RetryPolicy::new(2).with_initial_backoff(Duration::from_secs(2));
    let config = OrchestratorConfig::new(vec![
        JobConfig::new("c").with_retry(retry),
        JobConfig::new("d").with_retry(retry),
    ])
    .with_parallel(2)
    .with_continue_on_failure(true);
    let attempts = Arc::new(AtomicU32::new(0));
    let registry = registry_for(&["c", "d"], &["c"], &attempts);
    let orchestrator = Orchestrator::new(config, registry, warehouse()).unwrap();

    let result = orchestrator.run_all().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.completed, vec!["d".to_string()]);
    assert_eq!(result.failed, vec!["c".to_string()]);
    assert!(result.error_summary["c"].contains("API quota exhausted (attempt 2/2)"));
    // two attempts for c, one for d
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn first_failure_aborts_when_not_continuing() {
    let config = OrchestratorConfig::new(vec![
        JobConfig::new("first").with_retry(RetryPolicy::new(2).with_initial_backoff(Duration::from_secs(1))),
        JobConfig::new("second").with_dependencies(["first"]),
        JobConfig::new("third").with_dependencies(["second"]),
    ])
    .with_continue_on_failure(false);
    let attempts = Arc::new(AtomicU32::new(0));
    let registry = registry_for(&["first", "second", "third"], &["first"], &attempts);
    let orchestrator = Orchestrator::new(config, registry, warehouse()).unwrap();

    let err = orchestrator.run_all().await.unwrap_err();

    let OrchestratorError::RunAborted { job, result, .. } = err else {
        panic!("expected the run to abort");
    };
    assert_eq!(job, "first");
    assert_eq!(names(&result.skipped), BTreeSet::from(["second", "third"]));
    assert!(result.completed.is_empty());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn report_is_exported_after_run() {
    let config = OrchestratorConfig::new(vec![
        JobConfig::new("google").with_retry(RetryPolicy::no_retry()),
        JobConfig::new("tiktok").with_retry(RetryPolicy::no_retry()),
        JobConfig::new("bing").enabled(false),
    ]);
    let attempts = Arc::new(AtomicU32::new(0));
    let registry = registry_for(&["google", "tiktok"], &["tiktok"], &attempts);
    let orchestrator = Orchestrator::new(config, registry, warehouse()).unwrap();

    let monitor = Arc::new(ExecutionMonitor::new());
    let result = orchestrator.run_with_monitor(monitor.clone()).await.unwrap();
    assert_eq!(result.exit_code(), adsync_core::EXIT_PARTIAL_SUCCESS);
    assert!(monitor.get("bing").is_none());

    let dir = tempfile::tempdir().unwrap();
    let json_path = dir.path().join("report.json");
    let csv_path = dir.path().join("report.CSV");
    monitor.export(&json_path).unwrap();
    monitor.export(&csv_path).unwrap();

    let report: Value = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(report["summary"]["total_jobs"], 2);
    assert_eq!(report["jobs"][0]["job_name"], "google");
    assert_eq!(report["jobs"][1]["status"], "failed");

    let csv = std::fs::read_to_string(&csv_path).unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("name,status,start_time"));
    assert!(lines.next().unwrap().starts_with("google,completed,"));
    assert_eq!(lines.count(), 1);

    assert_eq!(monitor.get("tiktok").unwrap().status, ExecutionStatus::Failed);
    assert!(monitor.export(dir.path().join("report.txt")).is_err());
}

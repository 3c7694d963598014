//! Top-level coordinator.
//!
//! Runs the scheduled waves in order:
//! ```text
//! schedule -> wave 1 -> barrier -> wave 2 -> ... -> result
//! ```
//! Each wave runs sequentially or under a bounded worker pool. Each job is
//! attempted per its retry policy with capped exponential backoff.

use adsync_core::{ConfigError, JobConfig, OrchestratorConfig, OrchestratorResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::job::{JobContext, JobError, JobOutput, ProgressHandle};
use crate::monitor::ExecutionMonitor;
use crate::registry::JobRegistry;
use crate::scheduler::Scheduler;

/// Skip reason for jobs left behind by the run deadline.
pub const GLOBAL_TIMEOUT_REASON: &str = "global timeout exceeded";

/// Stand-in deadline for budgets too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Errors that end a run without a normal result.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Configuration is invalid; no job ran
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A job exhausted its retries with `continue_on_failure = false`
    #[error("run aborted: job '{job}' failed: {message}")]
    RunAborted {
        /// Job that triggered the abort
        job: String,
        /// Its final error
        message: String,
        /// Result built from the state at abort time
        result: Box<OrchestratorResult>,
    },

    /// The orchestrator itself failed (worker panic, closed semaphore)
    #[error("internal orchestrator error: {message}")]
    Internal {
        /// What went wrong
        message: String,
        /// Result built from the state when the run stopped
        result: Box<OrchestratorResult>,
    },
}

impl OrchestratorError {
    /// Partial result, when the run got far enough to have one.
    pub fn partial_result(&self) -> Option<&OrchestratorResult> {
        match self {
            OrchestratorError::RunAborted { result, .. }
            | OrchestratorError::Internal { result, .. } => Some(result),
            OrchestratorError::Configuration(_) => None,
        }
    }
}

/// Outcome of a single attempt, tagged so retry logic can branch on kind.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The job finished
    Completed(JobOutput),
    /// Listed dependencies have not completed
    DependencyUnmet(Vec<String>),
    /// Retryable failure
    Transient(String),
    /// Non-retryable failure
    Fatal(String),
    /// The attempt exceeded its time limit
    TimedOut {
        /// Limit that was applied
        limit: Duration,
        /// The limit came from the run deadline, not the job timeout
        global: bool,
    },
}

impl AttemptOutcome {
    /// Whether another attempt is allowed after this outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::Transient(_) | AttemptOutcome::TimedOut { global: false, .. }
        )
    }

    fn message(&self) -> String {
        match self {
            AttemptOutcome::Completed(_) => String::new(),
            AttemptOutcome::DependencyUnmet(deps) => {
                format!("dependencies not met: {}", deps.join(", "))
            }
            AttemptOutcome::Transient(msg) | AttemptOutcome::Fatal(msg) => msg.clone(),
            AttemptOutcome::TimedOut { global: true, .. } => GLOBAL_TIMEOUT_REASON.to_string(),
            AttemptOutcome::TimedOut { limit, .. } => {
                format!("timed out after {}s", limit.as_secs_f64())
            }
        }
    }
}

/// Final state of one job after all its attempts.
#[derive(Debug, Clone, PartialEq)]
enum JobRunResult {
    Succeeded,
    Skipped,
    Failed { message: String, abort: bool },
}

/// Everything a worker needs to run one job, cheap to clone into a task.
struct Dispatch<D> {
    config: Arc<OrchestratorConfig>,
    registry: Arc<JobRegistry<D>>,
    shared: Arc<D>,
    scheduler: Arc<Scheduler>,
    monitor: Arc<ExecutionMonitor>,
    deadline: Instant,
}

impl<D> Clone for Dispatch<D> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            registry: self.registry.clone(),
            shared: self.shared.clone(),
            scheduler: self.scheduler.clone(),
            monitor: self.monitor.clone(),
            deadline: self.deadline,
        }
    }
}

impl<D: Send + Sync + 'static> Dispatch<D> {
    /// Attempt a job until it succeeds or its retry policy is exhausted.
    async fn run_one(&self, job: &JobConfig) -> JobRunResult {
        let name = job.name.as_str();
        let max_attempts = job.retry.max_attempts.max(1);

        if Instant::now() >= self.deadline {
            self.monitor.skip(name, GLOBAL_TIMEOUT_REASON);
            return JobRunResult::Skipped;
        }

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = job.retry.backoff_for(attempt - 1);
                debug!(job = name, attempt, delay_secs = delay.as_secs_f64(), "Backing off before retry");
                tokio::time::sleep(delay).await;
                self.monitor.increment_retry(name);
            }

            self.monitor.start(name);

            let unmet = self
                .scheduler
                .unmet_dependencies(name, &self.monitor.completed_jobs());
            if !unmet.is_empty() {
                return self.record_failure(name, &AttemptOutcome::DependencyUnmet(unmet), false);
            }

            let outcome = self.attempt(job, attempt, max_attempts).await;
            match outcome {
                AttemptOutcome::Completed(output) => {
                    self.monitor
                        .complete(name, output.rows_processed(), output.tables_processed());
                    return JobRunResult::Succeeded;
                }
                ref failed if failed.is_retryable() && attempt < max_attempts => {
                    warn!(
                        job = name,
                        attempt,
                        max_attempts,
                        error = %failed.message(),
                        "Attempt failed, will retry"
                    );
                }
                failed => {
                    let abort = !self.config.continue_on_failure;
                    return self.record_failure(name, &failed, abort);
                }
            }
        }

        // max_attempts >= 1, so the loop always returns.
        JobRunResult::Failed {
            message: "no attempts made".to_string(),
            abort: !self.config.continue_on_failure,
        }
    }

    fn record_failure(&self, name: &str, outcome: &AttemptOutcome, abort: bool) -> JobRunResult {
        let message = outcome.message();
        let (rows, tables) = self
            .monitor
            .get(name)
            .map(|e| (e.rows_processed, e.tables_processed))
            .unwrap_or_default();
        self.monitor.fail(name, &message, rows, tables);
        JobRunResult::Failed { message, abort }
    }

    /// One bounded attempt. The job runs in its own task so a timeout can
    /// cancel it and a panic is contained to this job.
    async fn attempt(&self, job: &JobConfig, attempt: u32, max_attempts: u32) -> AttemptOutcome {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return AttemptOutcome::TimedOut {
                limit: self.config.global_timeout,
                global: true,
            };
        }
        let global = remaining < job.timeout;
        let limit = remaining.min(job.timeout);

        let instance = match self.registry.get_job(&job.name, &self.shared) {
            Ok(instance) => instance,
            Err(err) => return AttemptOutcome::Fatal(err.to_string()),
        };

        let ctx = JobContext {
            job_name: job.name.clone(),
            attempt,
            max_attempts,
            time_limit: limit,
            progress: ProgressHandle::new(self.monitor.clone(), job.name.clone()),
        };

        let mut handle = tokio::spawn(async move { instance.run(&ctx).await });

        let finished = tokio::time::timeout(limit, &mut handle).await;
        match finished {
            Ok(Ok(Ok(output))) => AttemptOutcome::Completed(output),
            Ok(Ok(Err(JobError::Transient(err)))) => AttemptOutcome::Transient(format!("{err:#}")),
            Ok(Ok(Err(JobError::Fatal(err)))) => AttemptOutcome::Fatal(format!("{err:#}")),
            Ok(Err(join_err)) => AttemptOutcome::Fatal(format!("job task failed: {join_err}")),
            Err(_elapsed) => {
                handle.abort();
                AttemptOutcome::TimedOut { limit, global }
            }
        }
    }
}

/// Coordinates a run over the configured jobs.
pub struct Orchestrator<D> {
    config: Arc<OrchestratorConfig>,
    registry: Arc<JobRegistry<D>>,
    shared: Arc<D>,
}

impl<D: Send + Sync + 'static> Orchestrator<D> {
    /// Validate the configuration against the registry and build an orchestrator.
    ///
    /// Cycles, invalid parallel groups and unregistered enabled jobs are
    /// rejected here, before any job runs.
    pub fn new(
        config: OrchestratorConfig,
        registry: JobRegistry<D>,
        shared: Arc<D>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut scheduler = Scheduler::new();
        scheduler.schedule(&config.jobs)?;
        scheduler.validate_parallel_groups(&config.parallel_groups)?;

        registry.ensure_registered(config.enabled_jobs().into_iter().map(|j| j.name.as_str()))?;

        info!(
            jobs = config.jobs.len(),
            enabled = config.enabled_jobs().len(),
            parallel = config.parallel_execution,
            max_parallel = config.max_parallel,
            "Orchestrator initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            shared,
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Enabled jobs, optionally restricted to `only`, ordered by priority.
    fn selected_jobs(&self, only: Option<&[String]>) -> Result<Vec<JobConfig>, ConfigError> {
        if let Some(names) = only {
            if let Some(unknown) = names.iter().find(|n| self.config.job(n).is_none()) {
                return Err(ConfigError::invalid("jobs", format!("unknown job '{unknown}'")));
            }
        }

        let mut jobs: Vec<JobConfig> = self
            .config
            .enabled_jobs()
            .into_iter()
            .filter(|j| only.map_or(true, |names| names.contains(&j.name)))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.priority);
        Ok(jobs)
    }

    /// Waves that [`Orchestrator::run_all`] would execute, without running anything.
    pub fn plan(&self) -> Result<Vec<Vec<String>>, ConfigError> {
        let jobs = self.selected_jobs(None)?;
        Scheduler::new().schedule(&jobs)
    }

    /// Run every enabled job with a fresh monitor.
    pub async fn run_all(&self) -> Result<OrchestratorResult, OrchestratorError> {
        self.run_with_monitor(Arc::new(ExecutionMonitor::new())).await
    }

    /// Run a subset of enabled jobs. Dependencies outside the subset count as met.
    pub async fn run_jobs(&self, names: &[String]) -> Result<OrchestratorResult, OrchestratorError> {
        self.run_jobs_with_monitor(names, Arc::new(ExecutionMonitor::new())).await
    }

    /// [`Orchestrator::run_jobs`], recording into `monitor`.
    pub async fn run_jobs_with_monitor(
        &self,
        names: &[String],
        monitor: Arc<ExecutionMonitor>,
    ) -> Result<OrchestratorResult, OrchestratorError> {
        self.execute(Some(names), monitor).await
    }

    /// Run every enabled job, recording into `monitor` so the caller can
    /// export a report afterwards.
    pub async fn run_with_monitor(
        &self,
        monitor: Arc<ExecutionMonitor>,
    ) -> Result<OrchestratorResult, OrchestratorError> {
        self.execute(None, monitor).await
    }

    async fn execute(
        &self,
        only: Option<&[String]>,
        monitor: Arc<ExecutionMonitor>,
    ) -> Result<OrchestratorResult, OrchestratorError> {
        let started = Instant::now();
        let jobs = self.selected_jobs(only)?;

        for job in &jobs {
            monitor.register(&job.name);
        }

        let mut scheduler = Scheduler::new();
        let waves = scheduler.schedule(&jobs)?;
        info!(jobs = jobs.len(), waves = waves.len(), "Starting orchestrator run");

        let dispatch = Dispatch {
            config: self.config.clone(),
            registry: self.registry.clone(),
            shared: self.shared.clone(),
            scheduler: Arc::new(scheduler),
            monitor: monitor.clone(),
            deadline: run_deadline(started, self.config.global_timeout),
        };

        let mut aborted: Option<(String, String)> = None;
        let mut internal: Option<String> = None;

        for (index, wave) in waves.iter().enumerate() {
            if Instant::now() >= dispatch.deadline {
                warn!(wave = index + 1, "Global timeout reached, skipping remaining jobs");
                skip_pending(&monitor, GLOBAL_TIMEOUT_REASON);
                break;
            }

            let members: Vec<JobConfig> = wave
                .iter()
                .filter_map(|name| jobs.iter().find(|j| &j.name == name).cloned())
                .collect();

            info!(wave = index + 1, jobs = ?wave, "Starting wave");

            let outcome = if self.config.parallel_execution && members.len() > 1 {
                self.run_parallel(&dispatch, members).await
            } else {
                Ok(run_sequential(&dispatch, &members).await)
            };

            match outcome {
                Ok(None) => {}
                Ok(Some((job, message))) => {
                    error!(job = %job, "Aborting run after job failure");
                    skip_pending(&monitor, &format!("run aborted after failure of '{job}'"));
                    aborted = Some((job, message));
                    break;
                }
                Err(message) => {
                    error!(error = %message, "Stopping run after internal failure");
                    contain_internal_failure(&monitor, &message);
                    internal = Some(message);
                    break;
                }
            }
        }

        monitor.log_summary();
        let result = OrchestratorResult::from_executions(
            &monitor.executions(),
            waves,
            started.elapsed().as_secs_f64(),
        );

        if let Some(message) = internal {
            return Err(OrchestratorError::Internal {
                message,
                result: Box::new(result),
            });
        }

        match aborted {
            Some((job, message)) => Err(OrchestratorError::RunAborted {
                job,
                message,
                result: Box::new(result),
            }),
            None => {
                info!(
                    success = result.success,
                    completed = result.completed.len(),
                    failed = result.failed.len(),
                    skipped = result.skipped.len(),
                    "Orchestrator run finished"
                );
                Ok(result)
            }
        }
    }

    /// Dispatch a wave under `min(wave_size, max_parallel)` workers and wait
    /// for every member. Sibling failures do not cancel each other.
    ///
    /// `Err` carries an internal failure, reported only after every
    /// dispatched member has finished.
    async fn run_parallel(
        &self,
        dispatch: &Dispatch<D>,
        members: Vec<JobConfig>,
    ) -> Result<Option<(String, String)>, String> {
        let workers = members.len().min(self.config.max_parallel).max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set: JoinSet<(String, JobRunResult)> = JoinSet::new();
        let mut internal = None;

        debug!(workers, jobs = members.len(), "Dispatching parallel wave");

        for job in members {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    internal = Some(format!("semaphore closed: {e}"));
                    break;
                }
            };
            let dispatch = dispatch.clone();

            join_set.spawn(async move {
                let _permit = permit;
                let result = dispatch.run_one(&job).await;
                (job.name, result)
            });
        }

        let drained = drain_wave(&mut join_set).await;
        match internal {
            Some(message) => Err(message),
            None => drained,
        }
    }
}

/// Wait for every worker in a wave. The first job that requested an abort
/// wins; a failed worker task turns the whole wave into an internal error.
async fn drain_wave(
    join_set: &mut JoinSet<(String, JobRunResult)>,
) -> Result<Option<(String, String)>, String> {
    let mut aborted = None;
    let mut internal = None;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((job, JobRunResult::Failed { message, abort: true })) => {
                if aborted.is_none() {
                    aborted = Some((job, message));
                }
            }
            Ok(_) => {}
            Err(join_err) => {
                error!(error = %join_err, "Worker task failed");
                if internal.is_none() {
                    internal = Some(format!("worker task failed: {join_err}"));
                }
            }
        }
    }

    match internal {
        Some(message) => Err(message),
        None => Ok(aborted),
    }
}

async fn run_sequential<D: Send + Sync + 'static>(
    dispatch: &Dispatch<D>,
    members: &[JobConfig],
) -> Option<(String, String)> {
    for job in members {
        if let JobRunResult::Failed { message, abort: true } = dispatch.run_one(job).await {
            return Some((job.name.clone(), message));
        }
    }
    None
}

fn run_deadline(started: Instant, budget: Duration) -> Instant {
    started
        .checked_add(budget)
        .unwrap_or_else(|| started + FAR_FUTURE)
}

/// Close out records left open by an internal failure: running jobs fail
/// with `message` and pending jobs are skipped.
fn contain_internal_failure(monitor: &ExecutionMonitor, message: &str) {
    for name in monitor.running_jobs() {
        let (rows, tables) = monitor
            .get(&name)
            .map(|e| (e.rows_processed, e.tables_processed))
            .unwrap_or_default();
        monitor.fail(&name, message, rows, tables);
    }
    skip_pending(monitor, &format!("run stopped after internal error: {message}"));
}

fn skip_pending(monitor: &ExecutionMonitor, reason: &str) {
    for name in monitor.pending_jobs() {
        monitor.skip(&name, reason);
    }
}

//! Built-in job that runs an external extractor process.
//!
//! Settings:
//! ```yaml
//! settings:
//!   command: ["python", "-m", "extractors.facebook"]
//!   working_dir: /opt/extractors   # optional
//!   table: facebook_ads             # optional, defaults to the job name
//! ```
//! Exit status 0 is success and every non-empty stdout line counts as one
//! row. A non-zero exit is a transient failure.

use adsync_execution::{Job, JobContext, JobError, JobOutput, JobRegistry, JobSpec};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 5;

/// Runs `argv` and reports its stdout line count.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandJob {
    argv: Vec<String>,
    working_dir: Option<PathBuf>,
    table: String,
}

impl CommandJob {
    /// Build from job settings.
    pub fn from_settings(name: &str, settings: &Value) -> anyhow::Result<Self> {
        let argv: Vec<String> = settings
            .get("command")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("settings.command must be a list of strings"))?
            .iter()
            .map(|arg| {
                arg.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("settings.command contains a non-string argument"))
            })
            .collect::<anyhow::Result<_>>()?;

        if argv.is_empty() {
            return Err(anyhow!("settings.command is empty"));
        }

        Ok(Self {
            argv,
            working_dir: settings
                .get("working_dir")
                .and_then(Value::as_str)
                .map(PathBuf::from),
            table: settings
                .get("table")
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string(),
        })
    }
}

#[async_trait]
impl Job for CommandJob {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
        let mut command = Command::new(&self.argv[0]);
        command
            .args(&self.argv[1..])
            .env("ADSYNC_JOB", &ctx.job_name)
            .env("ADSYNC_ATTEMPT", ctx.attempt.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(job = %ctx.job_name, command = ?self.argv, "Spawning extractor");

        let output = command
            .output()
            .await
            .with_context(|| format!("failed to run '{}'", self.argv[0]))
            .map_err(JobError::Fatal)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(JobError::transient(format!(
                "'{}' exited with {}: {}",
                self.argv[0], output.status, tail
            )));
        }

        let rows = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count() as u64;
        ctx.progress.update(Some(rows), Some(1));

        Ok(JobOutput::new().with_table(self.table.clone(), rows))
    }
}

/// Register a [`CommandJob`] for each name, loading settings from `settings`.
pub fn command_registry(settings: HashMap<String, Value>) -> JobRegistry<()> {
    let names: Vec<String> = settings.keys().cloned().collect();
    let settings = Arc::new(settings);
    let mut registry = JobRegistry::new();

    for name in names {
        let settings = settings.clone();
        registry.register(
            name,
            |spec: JobSpec<'_, ()>| -> anyhow::Result<Arc<dyn Job>> {
                Ok(Arc::new(CommandJob::from_settings(spec.name, &spec.settings)?))
            },
            move |name: &str| Ok(settings.get(name).cloned().unwrap_or(Value::Null)),
            serde_json::Map::new(),
        );
    }

    registry
}

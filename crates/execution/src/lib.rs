//! Execution layer - wave scheduling, job dispatch, retries and monitoring.

#![warn(missing_docs)]

pub mod job;
pub mod scheduler;
pub mod monitor;
pub mod registry;
pub mod orchestrator;

pub use job::{Job, JobContext, JobError, JobOutput, ProgressHandle};
pub use scheduler::Scheduler;
pub use monitor::{ExecutionMonitor, ExecutionReport, ExportError, CSV_COLUMNS};
pub use registry::{ConfigLoader, JobFactory, JobRegistry, JobSpec};
pub use orchestrator::{AttemptOutcome, Orchestrator, OrchestratorError, GLOBAL_TIMEOUT_REASON};

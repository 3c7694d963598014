//! adsync core data models.
//!
//! This crate defines the configuration model and the execution records
//! shared by the scheduler, monitor and orchestrator.

#![warn(missing_docs)]

// Configuration
mod config;
mod job;
mod retry;

// Execution state
mod execution;
mod result;

mod error;

pub use config::{OrchestratorConfig, DEFAULT_GLOBAL_TIMEOUT, DEFAULT_MAX_PARALLEL};
pub use job::{JobConfig, DEFAULT_JOB_TIMEOUT, DEFAULT_PRIORITY};
pub use retry::RetryPolicy;

pub use execution::{ExecutionStatus, ExecutionSummary, JobExecution};
pub use result::{
    OrchestratorResult, EXIT_CONFIG_ERROR, EXIT_PARTIAL_SUCCESS, EXIT_SUCCESS,
    EXIT_TOTAL_FAILURE, EXIT_UNEXPECTED_ERROR,
};

pub use error::{ConfigError, Result};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

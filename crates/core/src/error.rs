//! Configuration error taxonomy.

/// Result alias for configuration-level operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Invalid or contradictory configuration.
///
/// Always fatal at startup and never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A job was declared without a name
    #[error("job name must not be empty")]
    EmptyName,

    /// Two jobs share the same name
    #[error("duplicate job name: {0}")]
    DuplicateJob(String),

    /// A dependency points at a job that is not configured
    #[error("job '{job}' depends on unknown job '{dependency}'")]
    UnknownDependency {
        /// Declaring job
        job: String,
        /// Missing dependency
        dependency: String,
    },

    /// The dependency graph contains a cycle
    #[error("circular dependency detected involving job '{job}' ({})", path.join(" -> "))]
    DependencyCycle {
        /// Job at which the cycle was closed
        job: String,
        /// Traversal path that forms the cycle
        path: Vec<String>,
    },

    /// A predefined parallel group hides an ordering requirement
    #[error("parallel group {group} contains '{job}' together with its dependency '{dependency}'")]
    InvalidParallelGroup {
        /// Index of the offending group
        group: usize,
        /// Member that declares the dependency
        job: String,
        /// Dependency that is in the same group
        dependency: String,
    },

    /// A predefined parallel group names a job that does not exist
    #[error("parallel group {group} references unknown job '{job}'")]
    UnknownGroupMember {
        /// Index of the offending group
        group: usize,
        /// Unknown member
        job: String,
    },

    /// A numeric or structural setting is out of range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the setting
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Leveling did not place every job in a wave
    #[error("scheduled {scheduled} of {expected} jobs; dependency graph is inconsistent")]
    UnscheduledJobs {
        /// Input job count
        expected: usize,
        /// Jobs that made it into a wave
        scheduled: usize,
    },

    /// No factory is registered for an enabled job
    #[error("no job registered under '{0}'")]
    UnregisteredJob(String),

    /// Loading job settings or constructing the job failed
    #[error("failed to set up job '{job}': {source}")]
    JobSetup {
        /// Job being constructed
        job: String,
        /// Underlying failure
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// YAML could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration file could not be read
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

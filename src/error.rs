use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum BosunError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested profile, alarm or occurrence does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write was rejected because it would break an invariant
    #[error("Validation error: {0}")]
    Validation(String),

    /// Imported profile text is missing required fields
    #[error("Invalid profile structure: {0}")]
    InvalidProfile(String),

    /// Snooze request refused by policy
    #[error("Snooze rejected: {0}")]
    SnoozeRejected(String),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable state could not be written or read back
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Audio collaborator failure
    #[error("Audio error: {0}")]
    Audio(String),

    /// Error while parsing or producing JSON documents
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BosunError {
    /// True for errors that reject caller input rather than signal a fault
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BosunError::Validation(_) | BosunError::InvalidProfile(_) | BosunError::SnoozeRejected(_)
        )
    }
}

/// Convenient alias over [`Result`] using [`BosunError`]
pub type Result<T> = std::result::Result<T, BosunError>;

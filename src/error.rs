//! Error types for the analysis pipeline

use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, SentinelError>;

/// Which round of profile generation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    Rules,
    Rubric,
}

impl GenerationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStage::Rules => "rules",
            GenerationStage::Rubric => "rubric",
        }
    }
}

impl std::fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline errors
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("All {attempts} attempts failed. Last error: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<SentinelError>,
    },

    #[error("Profile generation failed during {stage} round: {source}")]
    GenerationFailed {
        stage: GenerationStage,
        #[source]
        source: Box<SentinelError>,
    },

    #[error("Result rejected: {0}")]
    Rejected(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Session is not active")]
    SessionUnavailable,

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

impl SentinelError {
    /// Whether this error came from the model call exceeding its deadline
    pub fn is_timeout(&self) -> bool {
        match self {
            SentinelError::Timeout(_) => true,
            SentinelError::RetryExhausted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SentinelError::Timeout(_) => "timeout",
            SentinelError::InvalidResponse(_) => "invalid_response",
            SentinelError::RetryExhausted { .. } => "retry_exhausted",
            SentinelError::GenerationFailed { .. } => "generation_failed",
            SentinelError::Rejected(_) => "rejected",
            SentinelError::Model(_) => "model",
            SentinelError::SessionUnavailable => "session_unavailable",
            SentinelError::ProfileNotFound(_) => "profile_not_found",
            SentinelError::InvalidProfile(_) => "invalid_profile",
            SentinelError::Storage(_) => "storage",
            SentinelError::Configuration(_) => "configuration",
            SentinelError::Serialization(_) => "serialization",
            SentinelError::Parse(_) => "parse",
        }
    }
}

/// Key-value store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt store document: {0}")]
    Corrupt(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Structural problems in a generated rule list or rubric
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected more than {required} rules, found {found}")]
    TooFewRules { found: usize, required: usize },

    #[error("rubric is missing ranges: {}", .0.join(", "))]
    MissingRanges(Vec<String>),

    #[error("rubric line does not start with a known range: {0}")]
    UnexpectedRange(String),
}

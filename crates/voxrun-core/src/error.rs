//! Error types for voxrun

use thiserror::Error;

/// Main error type for voxrun
#[derive(Error, Debug)]
pub enum VoxrunError {
    /// Container runtime binary missing or daemon not responding
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Image neither present locally nor pullable
    #[error("Image unavailable: {image}")]
    ImageUnavailable { image: String },

    /// A run is already active on this runner
    #[error("Runner busy: a run is already active")]
    RunnerBusy,

    /// Container exited abnormally
    #[error("Container process failed (exit code: {})", display_code(.code))]
    ProcessFailure { code: Option<i32> },

    /// An expected output could not be found or decoded
    #[error("Output '{binding}' could not be resolved: {reason}")]
    OutputResolution { binding: String, reason: String },

    /// Run cancelled by the caller
    #[error("Run cancelled by user")]
    UserCancelled,

    /// Job descriptor or inputs are inconsistent
    #[error("Invalid job descriptor: {0}")]
    InvalidDescriptor(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Staging directory error
    #[error("Staging error: {0}")]
    Staging(String),

    /// Output file decoding error
    #[error("Decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VoxrunError {
    /// Cancellation is an expected outcome and should not be shown as a failure
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, VoxrunError::UserCancelled)
    }

    /// Shorthand for a per-binding resolution failure
    pub fn output(binding: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        VoxrunError::OutputResolution {
            binding: binding.into(),
            reason: reason.to_string(),
        }
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "terminated by signal".to_string(),
    }
}

/// Result type for voxrun operations
pub type VoxrunResult<T> = Result<T, VoxrunError>;

impl From<serde_json::Error> for VoxrunError {
    fn from(err: serde_json::Error) -> Self {
        VoxrunError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for VoxrunError {
    fn from(err: toml::de::Error) -> Self {
        VoxrunError::Config(err.to_string())
    }
}

//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, MdsError>;

/// Errors that are not tied to one sync source
#[derive(Error, Debug)]
pub enum MdsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A required environment variable is absent or empty
    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl MdsError {
    pub fn config(msg: impl Into<String>) -> Self {
        MdsError::Config(msg.into())
    }
}

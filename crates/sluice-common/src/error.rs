//! Error types shared across Sluice crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported time format: {0}")]
    UnsupportedTimeFormat(String),

    #[error("Unsupported or unknown time format for value {0}")]
    UnknownTimeFormat(String),

    #[error("Invalid date string or format: \"{input}\" ({format})")]
    InvalidTime { input: String, format: String },

    #[error("Invalid epoch input: {0}")]
    InvalidEpoch(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

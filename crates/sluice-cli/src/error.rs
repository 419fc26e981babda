//! Error types for the Sluice CLI
//!
//! Messages are user-facing and say what to check next.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Required file is missing
    #[error("File not found: '{0}'. Verify the path exists and is readable.")]
    FileNotFound(String),

    /// File extension is neither JSON nor YAML
    #[error("Unsupported file type: '{0}'. Use a .json, .yml or .yaml file.")]
    UnsupportedFormat(String),

    /// Pipeline or job definition is structurally valid but unusable
    #[error("Invalid definition in '{path}': {message}")]
    InvalidDefinition { path: String, message: String },

    /// Engine reported a fatal error
    #[error(transparent)]
    Engine(#[from] sluice_engine::EtlError),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// YAML parsing failed
    #[error("Failed to parse YAML: {0}. Check the file syntax at the indicated line/column.")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}. Check the file syntax.")]
    JsonParse(#[from] serde_json::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        CliError::InvalidDefinition {
            path: path.into(),
            message: message.into(),
        }
    }
}

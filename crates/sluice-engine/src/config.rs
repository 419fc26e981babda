//! Engine configuration

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EtlError, Result};

// ============================================================================
// Engine Configuration Constants
// ============================================================================

/// Default number of rows written per load batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default number of rows kept per destination table in preview runs.
pub const DEFAULT_PREVIEW_LIMIT: usize = 25;

/// Default connect timeout for native drivers in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default request timeout for HTTP sources in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// What `create_task` does when the job already has a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Cancel the existing registration and register again
    #[default]
    Replace,
    /// Refuse with `EtlError::DuplicateJob`
    Reject,
}

impl DuplicatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Replace => "replace",
            DuplicatePolicy::Reject => "reject",
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(DuplicatePolicy::Replace),
            "reject" => Ok(DuplicatePolicy::Reject),
            other => Err(EtlError::Config(format!(
                "unknown duplicate policy '{}', expected replace or reject",
                other
            ))),
        }
    }
}

/// Runtime settings shared by the orchestrator and scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub preview_limit: usize,
    pub connect_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `.env` and `SLUICE_*` environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            batch_size: std::env::var("SLUICE_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BATCH_SIZE),
            preview_limit: std::env::var("SLUICE_PREVIEW_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PREVIEW_LIMIT),
            connect_timeout_secs: std::env::var("SLUICE_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            http_timeout_secs: std::env::var("SLUICE_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            duplicate_policy: match std::env::var("SLUICE_DUPLICATE_POLICY") {
                Ok(raw) => raw.parse()?,
                Err(_) => DuplicatePolicy::default(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EtlError::Config("batch_size must be greater than 0".into()));
        }
        if self.preview_limit == 0 {
            return Err(EtlError::Config("preview_limit must be greater than 0".into()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(EtlError::Config(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

//! Scheduled jobs

use serde::{Deserialize, Serialize};

/// A pipeline bound to a cron schedule
///
/// `time_threshold` is the watermark: the epoch-millisecond start time of the
/// last run that completed without a fatal error. It only moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub pipeline_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub cron: String,
    #[serde(default)]
    pub time_threshold: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Job {
    /// Watermark passed to filters, `None` before the first successful run
    pub fn watermark(&self) -> Option<i64> {
        Some(self.time_threshold).filter(|threshold| *threshold > 0)
    }
}

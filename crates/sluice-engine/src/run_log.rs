//! Run log records

use serde::{Deserialize, Serialize};
use sluice_common::time;
use uuid::Uuid;

use crate::error::EtlError;

pub const SUCCESS_MESSAGE: &str = "ETL executed successfully";

/// Outcome of one table in one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    /// Some load batches landed, some failed
    Partial,
    Error,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::Partial => "partial",
            StageStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub status: StageStatus,
    pub name: String,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl LogEntry {
    /// Build an entry, deriving its status from the row count and errors
    pub fn new(stage: Stage, name: impl Into<String>, count: usize, errors: &[EtlError]) -> Self {
        let status = if errors.is_empty() {
            StageStatus::Success
        } else if stage == Stage::Load && count > 0 {
            StageStatus::Partial
        } else {
            StageStatus::Error
        };

        Self {
            status,
            name: name.into(),
            count,
            errors: errors.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Record of one execution, written once per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: Uuid,
    pub message: String,
    pub start_time: i64,
    pub end_time: i64,
    pub extract_log: Vec<LogEntry>,
    pub transform_log: Vec<LogEntry>,
    pub load_log: Vec<LogEntry>,
}

impl RunLog {
    pub fn start() -> Self {
        Self::starting_at(time::now_epoch())
    }

    pub fn starting_at(start_time: i64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            message: SUCCESS_MESSAGE.to_string(),
            start_time,
            end_time: start_time,
            extract_log: Vec::new(),
            transform_log: Vec::new(),
            load_log: Vec::new(),
        }
    }

    /// Log for a run that ended before any stage produced entries
    pub fn failed(start_time: i64, error: &EtlError) -> Self {
        let mut log = Self::starting_at(start_time);
        log.message = error.to_string();
        log.finish();
        log
    }

    pub fn entries(&self, stage: Stage) -> &[LogEntry] {
        match stage {
            Stage::Extract => &self.extract_log,
            Stage::Transform => &self.transform_log,
            Stage::Load => &self.load_log,
        }
    }

    pub fn push(&mut self, stage: Stage, entry: LogEntry) {
        match stage {
            Stage::Extract => self.extract_log.push(entry),
            Stage::Transform => self.transform_log.push(entry),
            Stage::Load => self.load_log.push(entry),
        }
    }

    pub fn error_count(&self) -> usize {
        [Stage::Extract, Stage::Transform, Stage::Load]
            .iter()
            .flat_map(|stage| self.entries(*stage))
            .filter(|entry| entry.status != StageStatus::Success)
            .count()
    }

    /// Stamp the end time and summarize table-level failures in the message
    pub fn finish(&mut self) {
        self.end_time = time::now_epoch().max(self.start_time);
        let failed = self.error_count();
        if failed > 0 && self.message == SUCCESS_MESSAGE {
            self.message = format!("ETL executed with errors in {} table(s)", failed);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn batch_error() -> EtlError {
        EtlError::LoadBatchFailed {
            table: "orders".into(),
            batch: 2,
            message: "deadlock".into(),
        }
    }

    #[test]
    fn test_status_derivation() {
        assert_eq!(
            LogEntry::new(Stage::Load, "orders", 700, &[]).status,
            StageStatus::Success
        );
        assert_eq!(
            LogEntry::new(Stage::Load, "orders", 700, &[batch_error()]).status,
            StageStatus::Partial
        );
        assert_eq!(
            LogEntry::new(Stage::Load, "orders", 0, &[batch_error()]).status,
            StageStatus::Error
        );
        assert_eq!(
            LogEntry::new(Stage::Transform, "orders", 3, &[batch_error()]).status,
            StageStatus::Error
        );
    }

    #[test]
    fn test_serialized_shape() {
        let mut log = RunLog::starting_at(1_000);
        log.push(Stage::Extract, LogEntry::new(Stage::Extract, "orders", 4, &[]));
        log.finish();

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["message"], "ETL executed successfully");
        assert_eq!(json["extract_log"][0]["status"], "success");
        assert!(json["extract_log"][0].get("errors").is_none());
        assert!(log.end_time >= log.start_time);
    }

    #[test]
    fn test_failed_log_has_no_entries() {
        let err = EtlError::JobNotFound("j1".into());
        let log = RunLog::failed(5, &err);
        assert_eq!(log.message, "Job not found: j1");
        assert!(log.extract_log.is_empty() && log.load_log.is_empty());
    }
}

//! File-backed collaborators for `sluice serve`
//!
//! [`FileJobStore`] keeps job records in memory and writes the jobs file
//! back whenever a watermark advances. [`JsonLinesSink`] appends one JSON
//! object per execution.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sluice_engine::store::{ExecutionRecord, JobStore, LogSink, MemoryJobStore};
use sluice_engine::{EtlError, Job};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::definitions;
use crate::error::Result;

pub struct FileJobStore {
    path: PathBuf,
    jobs: MemoryJobStore,
    /// Job ids in file order, so rewrites keep the layout stable
    order: Mutex<Vec<String>>,
}

impl FileJobStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let store = Self {
            path: path.to_path_buf(),
            jobs: MemoryJobStore::new(),
            order: Mutex::new(Vec::new()),
        };
        store.reload().await?;
        Ok(store)
    }

    /// Re-read the file, keeping any watermark newer than the file's
    pub async fn reload(&self) -> Result<Vec<Job>> {
        let loaded = definitions::load_jobs(&self.path)?;
        let mut merged = Vec::with_capacity(loaded.len());
        for mut job in loaded {
            if let Some(current) = self.jobs.get(&job.job_id).await {
                job.time_threshold = job.time_threshold.max(current.time_threshold);
            }
            self.jobs.upsert(job.clone()).await;
            merged.push(job);
        }

        let ids: Vec<String> = merged.iter().map(|job| job.job_id.clone()).collect();
        let mut order = self.order.lock().await;
        for stale in order.iter().filter(|id| !ids.contains(id)) {
            self.jobs.remove(stale).await;
        }
        *order = ids;
        Ok(merged)
    }

    async fn persist(&self) -> Result<()> {
        let order = self.order.lock().await;
        let mut jobs = Vec::with_capacity(order.len());
        for id in order.iter() {
            if let Some(job) = self.jobs.get(id).await {
                jobs.push(job);
            }
        }
        definitions::write(&self.path, &jobs)?;
        debug!(path = %self.path.display(), jobs = jobs.len(), "Jobs file written");
        Ok(())
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn find(&self, job_id: &str) -> sluice_engine::Result<Option<Job>> {
        self.jobs.find(job_id).await
    }

    async fn list_active(&self) -> sluice_engine::Result<Vec<Job>> {
        self.jobs.list_active().await
    }

    async fn update_time_threshold(
        &self,
        job_id: &str,
        time_threshold: i64,
    ) -> sluice_engine::Result<()> {
        self.jobs.update_time_threshold(job_id, time_threshold).await?;
        self.persist()
            .await
            .map_err(|e| EtlError::Config(format!("failed to save jobs file: {}", e)))
    }
}

/// Appends execution records to a file, one JSON object per line
pub struct JsonLinesSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogSink for JsonLinesSink {
    async fn write(&self, record: &ExecutionRecord) -> sluice_engine::Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| EtlError::Config(format!("failed to encode execution record: {}", e)))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let io_error = |e: std::io::Error| {
            EtlError::Config(format!("failed to append to {}: {}", self.path.display(), e))
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_error)?;
        file.write_all(line.as_bytes()).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sluice_engine::RunLog;
    use tempfile::TempDir;

    fn write_jobs(path: &Path, jobs: serde_json::Value) {
        std::fs::write(path, jobs.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_watermark_is_written_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        write_jobs(
            &path,
            serde_json::json!([
                {"job_id": "a", "pipeline_id": "p", "cron": "*/5 * * * *"},
                {"job_id": "b", "pipeline_id": "p", "cron": "*/5 * * * *", "is_active": false}
            ]),
        );

        let store = FileJobStore::open(&path).await.unwrap();
        assert_eq!(store.list_active().await.unwrap().len(), 1);
        store.update_time_threshold("a", 1_700_000_000_000).await.unwrap();

        let saved = definitions::load_jobs(&path).unwrap();
        assert_eq!(saved[0].job_id, "a");
        assert_eq!(saved[0].time_threshold, 1_700_000_000_000);
        assert_eq!(saved[1].job_id, "b");
    }

    #[tokio::test]
    async fn test_reload_keeps_newer_watermark_and_drops_removed_jobs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        write_jobs(
            &path,
            serde_json::json!([
                {"job_id": "a", "pipeline_id": "p", "cron": "*/5 * * * *"},
                {"job_id": "b", "pipeline_id": "p", "cron": "*/5 * * * *"}
            ]),
        );
        let store = FileJobStore::open(&path).await.unwrap();
        store.jobs.update_time_threshold("a", 500).await.unwrap();

        write_jobs(
            &path,
            serde_json::json!([
                {"job_id": "a", "pipeline_id": "p", "cron": "0 * * * *", "time_threshold": 100}
            ]),
        );
        let jobs = store.reload().await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].cron, "0 * * * *");
        assert_eq!(jobs[0].time_threshold, 500);
        assert!(store.find("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sink_appends_lines() {
        let dir = TempDir::new().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("runs.jsonl"));

        for job_id in ["a", "b"] {
            let record = ExecutionRecord {
                job_id: job_id.to_string(),
                pipeline_id: "p".to_string(),
                log: RunLog::starting_at(1000),
            };
            sink.write(&record).await.unwrap();
        }

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<ExecutionRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].job_id, "b");
        assert_eq!(lines[0].log.start_time, 1000);
    }
}

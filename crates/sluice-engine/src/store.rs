//! Collaborator interfaces for scheduled runs
//!
//! The scheduler reads jobs and pipelines and appends execution logs through
//! these traits. Persistence lives outside the engine; the in-memory
//! implementations here serve tests and single-process deployments.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::{EtlError, Result};
use crate::job::Job;
use crate::pipeline::Pipeline;
use crate::run_log::RunLog;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find(&self, job_id: &str) -> Result<Option<Job>>;

    async fn list_active(&self) -> Result<Vec<Job>>;

    async fn update_time_threshold(&self, job_id: &str, time_threshold: i64) -> Result<()>;
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn find(&self, pipeline_id: &str) -> Result<Option<Pipeline>>;
}

/// One execution-log entry as handed to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub job_id: String,
    pub pipeline_id: String,
    #[serde(flatten)]
    pub log: RunLog,
}

/// Append-only destination for execution logs
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn write(&self, record: &ExecutionRecord) -> Result<()>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<BTreeMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, job: Job) {
        self.jobs.write().await.insert(job.job_id.clone(), job);
    }

    pub async fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn remove(&self, job_id: &str) -> Option<Job> {
        self.jobs.write().await.remove(job_id)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.get(job_id).await)
    }

    async fn list_active(&self) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.is_active)
            .cloned()
            .collect())
    }

    async fn update_time_threshold(&self, job_id: &str, time_threshold: i64) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| EtlError::JobNotFound(job_id.to_string()))?;
        job.time_threshold = time_threshold;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPipelineStore {
    pipelines: RwLock<HashMap<String, Pipeline>>,
}

impl MemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, pipeline_id: &str, pipeline: Pipeline) {
        self.pipelines
            .write()
            .await
            .insert(pipeline_id.to_string(), pipeline);
    }
}

#[async_trait]
impl PipelineStore for MemoryPipelineStore {
    async fn find(&self, pipeline_id: &str) -> Result<Option<Pipeline>> {
        Ok(self.pipelines.read().await.get(pipeline_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn write(&self, record: &ExecutionRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn job(id: &str, active: bool) -> Job {
        Job {
            job_id: id.to_string(),
            pipeline_id: "p".to_string(),
            name: id.to_string(),
            description: None,
            cron: "*/5 * * * *".to_string(),
            time_threshold: 0,
            is_active: active,
        }
    }

    #[tokio::test]
    async fn test_job_store() {
        let store = MemoryJobStore::new();
        store.upsert(job("a", true)).await;
        store.upsert(job("b", false)).await;

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].job_id, "a");

        store.update_time_threshold("a", 42).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().time_threshold, 42);
        assert!(matches!(
            store.update_time_threshold("zz", 1).await,
            Err(EtlError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = ExecutionRecord {
            job_id: "j".into(),
            pipeline_id: "p".into(),
            log: RunLog::starting_at(1000),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["job_id"], "j");
        assert_eq!(value["start_time"], 1000);
        assert!(value["extract_log"].as_array().unwrap().is_empty());
    }
}

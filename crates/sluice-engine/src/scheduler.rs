//! Cron scheduler
//!
//! [`JobScheduler`] owns one timer task per registered job. A job's task
//! runs its pipeline to completion before waiting for the next fire time,
//! so runs of the same job never overlap; different jobs run concurrently.
//! Cancelling a registration stops future fires and leaves an in-flight run
//! alone.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use sluice_common::time;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DuplicatePolicy;
use crate::error::{EtlError, Result};
use crate::job::Job;
use crate::orchestrator::{Orchestrator, RunRequest};
use crate::run_log::RunLog;
use crate::store::{ExecutionRecord, JobStore, LogSink, PipelineStore};

/// Parse a cron expression; five-field expressions get a leading seconds field
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| EtlError::InvalidCron {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

/// What a single trigger did
#[derive(Debug)]
pub enum TriggerOutcome {
    /// The run completed; table-level errors may be in the log
    Completed(RunLog),
    /// The run failed fatally and the watermark was left alone
    Failed(RunLog),
    /// The job is missing or inactive and its registration was cancelled
    Deactivated,
}

struct Registration {
    generation: u64,
    cron: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    orchestrator: Arc<Orchestrator>,
    jobs: Arc<dyn JobStore>,
    pipelines: Arc<dyn PipelineStore>,
    sink: Arc<dyn LogSink>,
    policy: DuplicatePolicy,
    registrations: Mutex<HashMap<String, Registration>>,
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        jobs: Arc<dyn JobStore>,
        pipelines: Arc<dyn PipelineStore>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let policy = orchestrator.config().duplicate_policy;
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                jobs,
                pipelines,
                sink,
                policy,
                registrations: Mutex::new(HashMap::new()),
                run_locks: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Register `job_id` on `cron`
    ///
    /// An existing registration is replaced or, under
    /// [`DuplicatePolicy::Reject`], the call fails with
    /// [`EtlError::DuplicateJob`].
    pub async fn create_task(&self, job_id: &str, cron: &str) -> Result<()> {
        self.register(job_id, cron, self.inner.policy).await
    }

    async fn register(&self, job_id: &str, cron: &str, policy: DuplicatePolicy) -> Result<()> {
        let schedule = parse_cron(cron)?;
        let mut registrations = self.inner.registrations.lock().await;

        if let Some(existing) = registrations.get(job_id) {
            if policy == DuplicatePolicy::Reject {
                return Err(EtlError::DuplicateJob(job_id.to_string()));
            }
            existing.cancel.cancel();
            debug!(job_id, "Replacing existing schedule");
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_schedule(
            self.inner.clone(),
            job_id.to_string(),
            schedule,
            cancel.clone(),
            generation,
        ));

        registrations.insert(
            job_id.to_string(),
            Registration {
                generation,
                cron: cron.to_string(),
                cancel,
                handle,
            },
        );
        info!(job_id, cron, "Job scheduled");
        Ok(())
    }

    /// Stop future fires of `job_id`; returns whether it was registered
    pub async fn cancel_task(&self, job_id: &str) -> bool {
        let removed = self.inner.registrations.lock().await.remove(job_id);
        match removed {
            Some(registration) => {
                registration.cancel.cancel();
                self.inner.release_run_lock(job_id).await;
                info!(job_id, "Job schedule cancelled");
                true
            },
            None => false,
        }
    }

    /// Register every active job, replacing existing registrations
    ///
    /// Jobs whose cron expression does not parse are logged and skipped.
    /// Returns the number of jobs registered.
    pub async fn reload_tasks(&self) -> Result<usize> {
        let jobs = self.inner.jobs.list_active().await?;
        let mut registered = 0;
        for job in jobs {
            match self.register(&job.job_id, &job.cron, DuplicatePolicy::Replace).await {
                Ok(()) => registered += 1,
                Err(e) => warn!(job_id = %job.job_id, error = %e, "Skipping job on reload"),
            }
        }
        info!(registered, "Schedules reloaded");
        Ok(registered)
    }

    /// Bring the registration of one job in line with its record
    pub async fn sync_job(&self, job: &Job) -> Result<()> {
        if !job.is_active {
            self.cancel_task(&job.job_id).await;
            return Ok(());
        }

        let unchanged = self
            .inner
            .registrations
            .lock()
            .await
            .get(&job.job_id)
            .map_or(false, |registration| registration.cron == job.cron);
        if unchanged {
            return Ok(());
        }
        self.register(&job.job_id, &job.cron, DuplicatePolicy::Replace).await
    }

    pub async fn is_scheduled(&self, job_id: &str) -> bool {
        self.inner.registrations.lock().await.contains_key(job_id)
    }

    pub async fn scheduled_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.registrations.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run `job_id` once, outside its schedule
    ///
    /// Waits for an in-flight run of the same job to finish first.
    pub async fn trigger_now(&self, job_id: &str) -> Result<TriggerOutcome> {
        self.inner.trigger(job_id, None).await
    }

    /// Cancel every registration and wait for in-flight runs to finish
    pub async fn shutdown(&self) {
        let registrations: Vec<Registration> = self
            .inner
            .registrations
            .lock()
            .await
            .drain()
            .map(|(_, registration)| registration)
            .collect();

        for registration in &registrations {
            registration.cancel.cancel();
        }
        for registration in registrations {
            if let Err(e) = registration.handle.await {
                warn!(error = %e, "Schedule task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn run_schedule(
    inner: Arc<Inner>,
    job_id: String,
    schedule: Schedule,
    cancel: CancellationToken,
    generation: u64,
) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            info!(job_id = %job_id, "Cron expression has no future fire times");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {},
        }

        match inner.trigger(&job_id, Some(generation)).await {
            Ok(TriggerOutcome::Deactivated) => break,
            Ok(_) => {},
            Err(e) => error!(job_id = %job_id, error = %e, "Scheduled trigger failed"),
        }
    }
    debug!(job_id = %job_id, generation, "Schedule task finished");
}

impl Inner {
    async fn run_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        self.run_locks
            .lock()
            .await
            .entry(job_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the run lock of a job that is neither registered nor running
    async fn release_run_lock(&self, job_id: &str) {
        if self.registrations.lock().await.contains_key(job_id) {
            return;
        }
        let mut locks = self.run_locks.lock().await;
        if locks.get(job_id).map_or(false, |lock| Arc::strong_count(lock) == 1) {
            locks.remove(job_id);
        }
    }

    /// Remove the job's registration, only if it is still `generation`
    async fn deactivate(&self, job_id: &str, generation: Option<u64>) {
        let mut registrations = self.registrations.lock().await;
        let current = registrations
            .get(job_id)
            .map_or(false, |r| generation.map_or(true, |g| r.generation == g));
        if current {
            if let Some(registration) = registrations.remove(job_id) {
                registration.cancel.cancel();
            }
        }
        info!(job_id, "Job inactive, schedule removed");
    }

    async fn trigger(&self, job_id: &str, generation: Option<u64>) -> Result<TriggerOutcome> {
        let lock = self.run_lock(job_id).await;
        let outcome = {
            let _running = lock.lock().await;
            self.run_job(job_id, generation).await
        };
        drop(lock);
        self.release_run_lock(job_id).await;
        outcome
    }

    async fn run_job(&self, job_id: &str, generation: Option<u64>) -> Result<TriggerOutcome> {
        let job = match self.jobs.find(job_id).await? {
            Some(job) if job.is_active => job,
            _ => {
                self.deactivate(job_id, generation).await;
                return Ok(TriggerOutcome::Deactivated);
            },
        };

        let start_time = time::now_epoch();
        info!(job_id, pipeline_id = %job.pipeline_id, "Triggering job");

        let result = match self.pipelines.find(&job.pipeline_id).await? {
            Some(pipeline) => {
                self.orchestrator
                    .run(RunRequest::new(&pipeline, job.watermark()))
                    .await
            },
            None => Err(EtlError::PipelineNotFound(job.pipeline_id.clone())),
        };

        let log = match &result {
            Ok(output) => output.log.clone(),
            Err(e) => {
                error!(job_id, error = %e, "Run failed");
                RunLog::failed(start_time, e)
            },
        };
        let record = ExecutionRecord {
            job_id: job.job_id.clone(),
            pipeline_id: job.pipeline_id.clone(),
            log,
        };
        if let Err(e) = self.sink.write(&record).await {
            warn!(job_id, error = %e, "Failed to write execution log");
        }

        let outcome = match result {
            Ok(output) => {
                let threshold = job.time_threshold.max(output.log.start_time);
                match self.jobs.update_time_threshold(job_id, threshold).await {
                    Ok(()) => debug!(job_id, time_threshold = threshold, "Watermark advanced"),
                    Err(e) => warn!(job_id, error = %e, "Failed to advance watermark"),
                }
                TriggerOutcome::Completed(output.log)
            },
            Err(_) => TriggerOutcome::Failed(record.log),
        };

        Ok(outcome)
    }
}

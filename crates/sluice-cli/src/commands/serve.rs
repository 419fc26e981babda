//! `sluice serve` command implementation
//!
//! Schedules every active job from the jobs file and keeps running until
//! Ctrl-C. Watermarks are written back to the jobs file after each run and
//! execution logs are appended to a JSON Lines file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use sluice_engine::store::MemoryPipelineStore;
use sluice_engine::JobScheduler;
use tokio::time::{interval_at, Instant, Interval};
use tracing::{info, warn};

use crate::definitions;
use crate::error::Result;
use crate::stores::{FileJobStore, JsonLinesSink};

pub async fn run(jobs_path: &Path, pipelines_path: &Path, log: PathBuf, watch: Option<u64>) -> Result<()> {
    let pipelines = definitions::load_pipelines(pipelines_path)?;
    let jobs = Arc::new(FileJobStore::open(jobs_path).await?);
    let records = jobs.reload().await?;

    for job in records.iter().filter(|job| !pipelines.contains_key(&job.pipeline_id)) {
        warn!(job_id = %job.job_id, pipeline_id = %job.pipeline_id, "Job references an unknown pipeline");
    }

    let pipeline_store = Arc::new(MemoryPipelineStore::new());
    for (id, pipeline) in pipelines {
        pipeline_store.insert(&id, pipeline).await;
    }

    let orchestrator = Arc::new(super::orchestrator()?);
    let scheduler = JobScheduler::new(
        orchestrator,
        jobs.clone(),
        pipeline_store,
        Arc::new(JsonLinesSink::new(log.clone())),
    );

    let registered = scheduler.reload_tasks().await?;
    println!(
        "{} {} job(s); logging runs to {}",
        "Scheduled".green().bold(),
        registered,
        log.display()
    );
    println!("Press Ctrl-C to stop.");

    let mut ticker = watch.map(|secs| {
        let period = Duration::from_secs(secs.max(1));
        interval_at(Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            },
            _ = tick(&mut ticker) => apply_changes(&scheduler, &jobs).await,
        }
    }

    info!("Shutting down scheduler");
    scheduler.shutdown().await;
    println!("Stopped.");
    Ok(())
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        },
        None => std::future::pending().await,
    }
}

/// Bring registrations in line with the jobs file
async fn apply_changes(scheduler: &JobScheduler, jobs: &FileJobStore) {
    let records = match jobs.reload().await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "Jobs file unreadable, keeping current schedules");
            return;
        },
    };

    for job_id in scheduler.scheduled_jobs().await {
        if !records.iter().any(|job| job.job_id == job_id) {
            scheduler.cancel_task(&job_id).await;
        }
    }
    for job in &records {
        if let Err(e) = scheduler.sync_job(job).await {
            warn!(job_id = %job.job_id, error = %e, "Failed to apply job change");
        }
    }
}

//! Sluice Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Extract, transform and load runs over relational databases, MongoDB and
//! HTTP APIs, with cron scheduling.
//!
//! # Overview
//!
//! - **Connections**: [`connection::ConnectorRegistry`] opens a
//!   [`connection::Connection`] per `(dialect, driver)` pair
//! - **Extract**: per-table reads with compiled [`filter`] predicates and a
//!   run watermark
//! - **Transform**: map, join, filter, rename, formula, aggregate and
//!   time-format steps over an in-memory [`working_set::WorkingSet`]
//! - **Load**: batched inserts or upserts with per-batch error isolation
//! - **Orchestration**: [`Orchestrator`] runs one pipeline and returns a
//!   [`RunLog`]
//! - **Scheduling**: [`JobScheduler`] fires jobs on cron and advances their
//!   watermark
//!
//! # Example
//!
//! ```no_run
//! use sluice_engine::{EngineConfig, Orchestrator, Pipeline, RunRequest};
//!
//! async fn preview(pipeline: &Pipeline) -> sluice_engine::Result<()> {
//!     let orchestrator = Orchestrator::with_default_drivers(EngineConfig::from_env()?)?;
//!     let output = orchestrator.run(RunRequest::preview(pipeline)).await?;
//!     println!("{}", output.log.message);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod extract;
pub mod filter;
pub mod job;
pub mod load;
pub mod orchestrator;
pub mod pipeline;
pub mod run_log;
pub mod scheduler;
pub mod store;
pub mod transform;
pub mod value;
pub mod working_set;

// Re-export commonly used types
pub use config::{DuplicatePolicy, EngineConfig};
pub use error::{EtlError, Result};
pub use job::Job;
pub use orchestrator::{Orchestrator, RunOutput, RunRequest};
pub use pipeline::{DatabaseDescriptor, DatabaseRole, Dialect, Driver, Pipeline};
pub use run_log::{LogEntry, RunLog, StageStatus};
pub use scheduler::{JobScheduler, TriggerOutcome};
pub use working_set::{Row, WorkingSet};

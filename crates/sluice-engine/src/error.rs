//! Engine error taxonomy
//!
//! Connection failures abort a run. Everything else is scoped to one table,
//! one transform step or one load batch and is recorded in the run log while
//! sibling work continues.

use sluice_common::CommonError;
use thiserror::Error;

use crate::pipeline::{Dialect, Driver};

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Failed to connect to {dialect} ({driver}): {message}")]
    ConnectFailed {
        dialect: Dialect,
        driver: Driver,
        message: String,
    },

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Unsupported combination: dialect={dialect}, driver={driver}")]
    UnsupportedDialect { dialect: Dialect, driver: Driver },

    #[error("Invalid join type '{0}'. Must be one of: inner, left, right, outer")]
    UnsupportedJoinKind(String),

    #[error("Missing or invalid 'unique' fields for UPSERT on table {table}: {reason}")]
    MissingUniqueKey { table: String, reason: String },

    #[error("No columns available to update on UPSERT for table {0}")]
    EmptyUpdateSet(String),

    #[error("Extract failed for {table}: {message}")]
    ExtractFailed { table: String, message: String },

    #[error("Transform failed for {table}: {message}")]
    TransformFailed { table: String, message: String },

    #[error("Load batch {batch} failed for {table}: {message}")]
    LoadBatchFailed {
        table: String,
        batch: usize,
        message: String,
    },

    #[error("Job {0} already has an active schedule")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    #[error("Invalid path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    /// A transform step could not process the rows it was given
    #[error("{0}")]
    Step(String),

    #[error("Formula error: {0}")]
    Formula(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("HTTP source error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl EtlError {
    /// Whether the error ends the whole run rather than one table or batch
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EtlError::ConnectFailed { .. } | EtlError::UnsupportedDialect { .. }
        )
    }

    pub(crate) fn query(err: impl std::fmt::Display) -> Self {
        EtlError::Query(err.to_string())
    }
}

#[cfg(any(feature = "mysql", feature = "postgres"))]
impl From<sqlx::Error> for EtlError {
    fn from(err: sqlx::Error) -> Self {
        EtlError::Query(err.to_string())
    }
}

#[cfg(feature = "sqlserver")]
impl From<tiberius::error::Error> for EtlError {
    fn from(err: tiberius::error::Error) -> Self {
        EtlError::Query(err.to_string())
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for EtlError {
    fn from(err: mongodb::error::Error) -> Self {
        EtlError::Query(err.to_string())
    }
}

#[cfg(feature = "oracle")]
impl From<oracle::Error> for EtlError {
    fn from(err: oracle::Error) -> Self {
        EtlError::Query(err.to_string())
    }
}

#[cfg(feature = "odbc")]
impl From<odbc_api::Error> for EtlError {
    fn from(err: odbc_api::Error) -> Self {
        EtlError::Query(err.to_string())
    }
}

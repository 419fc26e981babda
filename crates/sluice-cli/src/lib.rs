//! Sluice CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Command-line front end for the Sluice engine.
//!
//! # Overview
//!
//! - **Runs**: execute a pipeline file once (`sluice run`)
//! - **Previews**: extract and transform without loading (`sluice preview`)
//! - **Connectivity**: open a pipeline's database and list its tables
//!   (`sluice test-connection`)
//! - **Scheduling**: fire jobs from a jobs file on their cron expressions
//!   (`sluice serve`)

pub mod commands;
pub mod definitions;
pub mod error;
pub mod output;
pub mod stores;

// Re-export commonly used types
pub use error::{CliError, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Sluice - extract, transform and load pipelines
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline once and load its destination tables
    Run {
        /// Pipeline definition (.json, .yml or .yaml)
        pipeline: PathBuf,

        /// Watermark in epoch milliseconds for dynamic filter values
        #[arg(short, long)]
        watermark: Option<i64>,

        /// Print the run log as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract and transform a pipeline without touching the destination
    Preview {
        /// Pipeline definition (.json, .yml or .yaml)
        pipeline: PathBuf,

        /// Print the previewed tables as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect to a pipeline's database and list its tables
    TestConnection {
        /// Pipeline definition (.json, .yml or .yaml)
        pipeline: PathBuf,

        /// Which side of the pipeline to connect to
        #[arg(short, long, value_enum, default_value = "source")]
        side: Side,
    },

    /// Schedule every active job and run them until interrupted
    Serve {
        /// Jobs file: a list of job records
        #[arg(short, long)]
        jobs: PathBuf,

        /// Pipelines file: a map from pipeline id to definition
        #[arg(short, long)]
        pipelines: PathBuf,

        /// Execution log, appended as JSON Lines
        #[arg(short, long, default_value = "sluice-runs.jsonl")]
        log: PathBuf,

        /// Re-read the jobs file this often and apply changes
        #[arg(long, value_name = "SECONDS")]
        watch: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Side {
    Source,
    Destination,
}

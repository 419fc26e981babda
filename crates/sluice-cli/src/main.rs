//! Sluice CLI - Main entry point

use clap::Parser;
use sluice_cli::{Cli, Commands};
use sluice_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::builder()
            .level(LogLevel::Debug)
            .output(LogOutput::Console)
            .log_file_prefix("sluice".to_string())
            .build()
    } else {
        LogConfig::builder()
            .level(LogLevel::Warn)
            .output(LogOutput::Console)
            .log_file_prefix("sluice".to_string())
            .build()
    };

    // Environment variables take precedence
    let log_config = log_config.merge_env().unwrap_or_else(|e| {
        eprintln!("Warning: ignoring invalid logging environment: {}", e);
        LogConfig::default()
    });

    // Keep the guard alive so file logs are flushed on exit
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> sluice_cli::Result<()> {
    match &cli.command {
        Commands::Run {
            pipeline,
            watermark,
            json,
        } => sluice_cli::commands::run::run(pipeline, *watermark, *json).await,

        Commands::Preview { pipeline, json } => {
            sluice_cli::commands::preview::run(pipeline, *json).await
        },

        Commands::TestConnection { pipeline, side } => {
            sluice_cli::commands::connection::run(pipeline, *side).await
        },

        Commands::Serve {
            jobs,
            pipelines,
            log,
            watch,
        } => sluice_cli::commands::serve::run(jobs, pipelines, log.clone(), *watch).await,
    }
}

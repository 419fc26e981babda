//! `sluice test-connection` command implementation
//!
//! Opens one side of a pipeline and lists its tables or collections.

use std::path::Path;

use colored::Colorize;
use sluice_engine::connection;
use sluice_engine::pipeline::SourceBinding;

use crate::definitions;
use crate::error::{CliError, Result};
use crate::Side;

pub async fn run(pipeline_path: &Path, side: Side) -> Result<()> {
    let pipeline = definitions::load_pipeline(pipeline_path)?;
    let descriptor = match (side, &pipeline.source) {
        (Side::Source, SourceBinding::Database { database, .. }) => database,
        (Side::Source, SourceBinding::Api { api, .. }) => {
            return Err(CliError::invalid(
                pipeline_path.display().to_string(),
                format!("source is the HTTP API at {}, not a database", api.base_url),
            ));
        },
        (Side::Destination, _) => &pipeline.destination.database,
    };

    let orchestrator = super::orchestrator()?;
    let connection = orchestrator.registry().open(descriptor).await?;
    let tables = connection.list_tables().await;
    connection::close(connection.as_ref()).await;
    let tables = tables?;

    println!(
        "{} {} ({})",
        "Connected to".green(),
        descriptor.dialect,
        descriptor.driver
    );
    if tables.is_empty() {
        println!("  No tables found.");
    }
    for table in &tables {
        println!("  {}", table);
    }
    Ok(())
}

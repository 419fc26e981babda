//! `sluice preview` command implementation
//!
//! Extracts and transforms without opening the destination, then prints the
//! first rows of every destination table.

use std::path::Path;

use colored::Colorize;
use sluice_engine::RunRequest;

use crate::definitions;
use crate::error::Result;
use crate::output;

pub async fn run(pipeline: &Path, json: bool) -> Result<()> {
    let pipeline = definitions::load_pipeline(pipeline)?;
    let orchestrator = super::orchestrator()?;

    let output = orchestrator.run(RunRequest::preview(&pipeline)).await?;

    if json {
        let rendered = serde_json::json!({
            "tables": output.working_set.dst,
            "log": output.log,
        });
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    for (table, rows) in &output.working_set.dst {
        println!();
        println!("{} ({} rows)", table.cyan().bold(), rows.len());
        if rows.is_empty() {
            println!("  No rows.");
        } else {
            println!("{}", output::rows_table(rows));
        }
    }
    output::print_log(&output.log);
    Ok(())
}

//! `sluice run` command implementation
//!
//! Runs a pipeline once against its real destination.

use std::path::Path;

use sluice_engine::RunRequest;
use tracing::info;

use crate::definitions;
use crate::error::Result;
use crate::output;

pub async fn run(pipeline: &Path, watermark: Option<i64>, json: bool) -> Result<()> {
    let pipeline = definitions::load_pipeline(pipeline)?;
    let orchestrator = super::orchestrator()?;

    info!(pipeline = %pipeline.name, ?watermark, "Running pipeline");
    let output = orchestrator
        .run(RunRequest::new(&pipeline, watermark))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output.log)?);
    } else {
        output::print_log(&output.log);
    }
    Ok(())
}

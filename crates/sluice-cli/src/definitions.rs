//! Loading pipeline and job definitions from disk
//!
//! Files are JSON or YAML, picked by extension.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sluice_engine::{Job, Pipeline};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
}

impl FileFormat {
    pub fn of(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(FileFormat::Json),
            Some("yml") | Some("yaml") => Ok(FileFormat::Yaml),
            _ => Err(CliError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Read and deserialize a JSON or YAML file
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = FileFormat::of(path)?;
    if !path.exists() {
        return Err(CliError::FileNotFound(path.display().to_string()));
    }
    let content = fs::read_to_string(path)?;
    Ok(match format {
        FileFormat::Json => serde_json::from_str(&content)?,
        FileFormat::Yaml => serde_yaml::from_str(&content)?,
    })
}

/// Serialize to a JSON or YAML file, replacing it atomically
pub fn write<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = match FileFormat::of(path)? {
        FileFormat::Json => serde_json::to_string_pretty(value)?,
        FileFormat::Yaml => serde_yaml::to_string(value)?,
    };
    let staging = path.with_extension("tmp");
    fs::write(&staging, content)?;
    fs::rename(&staging, path)?;
    Ok(())
}

/// Load one pipeline and check its cross-table invariants
pub fn load_pipeline(path: &Path) -> Result<Pipeline> {
    let pipeline: Pipeline = read(path)?;
    pipeline
        .validate()
        .map_err(|e| CliError::invalid(path.display().to_string(), e.to_string()))?;
    Ok(pipeline)
}

/// Load a map of pipeline id to pipeline
///
/// A pipeline without its own `pipeline_id` takes the map key.
pub fn load_pipelines(path: &Path) -> Result<BTreeMap<String, Pipeline>> {
    let mut pipelines: BTreeMap<String, Pipeline> = read(path)?;
    for (id, pipeline) in pipelines.iter_mut() {
        pipeline
            .validate()
            .map_err(|e| CliError::invalid(path.display().to_string(), format!("{}: {}", id, e)))?;
        if pipeline.pipeline_id.is_none() {
            pipeline.pipeline_id = Some(id.clone());
        }
    }
    Ok(pipelines)
}

/// Load job records, rejecting duplicate ids
pub fn load_jobs(path: &Path) -> Result<Vec<Job>> {
    let jobs: Vec<Job> = read(path)?;
    let mut seen = std::collections::HashSet::new();
    for job in &jobs {
        if !seen.insert(job.job_id.as_str()) {
            return Err(CliError::invalid(
                path.display().to_string(),
                format!("job '{}' is listed more than once", job.job_id),
            ));
        }
    }
    Ok(jobs)
}

//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod connection;
pub mod preview;
pub mod run;
pub mod serve;

use sluice_engine::{EngineConfig, Orchestrator};

use crate::error::Result;

/// Orchestrator over every compiled-in driver, configured from the environment
pub(crate) fn orchestrator() -> Result<Orchestrator> {
    let config = EngineConfig::from_env()?;
    config.validate()?;
    Ok(Orchestrator::with_default_drivers(config)?)
}

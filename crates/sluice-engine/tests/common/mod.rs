//! Shared fixtures for engine integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use sluice_engine::connection::memory::{MemoryConnector, MemoryDatabase};
use sluice_engine::connection::{ConnectOptions, ConnectorRegistry};
use sluice_engine::{Dialect, Driver, EngineConfig, Orchestrator, Pipeline, Row};

/// Source on postgres, destination on mysql, both in memory
pub struct Harness {
    pub source: Arc<MemoryDatabase>,
    pub destination: Arc<MemoryDatabase>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let source = MemoryDatabase::new();
        let destination = MemoryDatabase::new();

        let mut registry = ConnectorRegistry::new(ConnectOptions {
            timeout: Duration::from_secs(2),
        });
        registry
            .register(
                Dialect::Postgres,
                Driver::Native,
                Arc::new(MemoryConnector::new(source.clone())),
            )
            .register(
                Dialect::Mysql,
                Driver::Native,
                Arc::new(MemoryConnector::new(destination.clone())),
            )
            .register(
                Dialect::Oracle,
                Driver::Native,
                Arc::new(MemoryConnector::refusing()),
            );

        let orchestrator = Arc::new(Orchestrator::new(Arc::new(registry), config).unwrap());
        Self {
            source,
            destination,
            orchestrator,
        }
    }
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap()
}

pub fn rows(value: Value) -> Vec<Row> {
    serde_json::from_value(value).unwrap()
}

/// `n` orders; every third one belongs to customer 2
pub fn orders(n: usize) -> Vec<Row> {
    (1..=n)
        .map(|i| {
            row(json!({
                "id": i,
                "customer_id": if i % 3 == 0 { 2 } else { 1 },
                "status": if i % 5 < 2 { "paid" } else { "open" },
                "amount": i * 10,
                "updated_at": 1_700_000_000_000_i64 + i as i64 * 1000,
            }))
        })
        .collect()
}

/// Pipeline from postgres to a mysql destination with the given role
pub fn pipeline(extract: Value, role: &str, destination: Value) -> Pipeline {
    serde_json::from_value(json!({
        "name": "test pipeline",
        "source": {
            "database": {"dialect": "postgres", "host": "source.local"},
            "configs": extract
        },
        "destination": {
            "database": {"dialect": "mysql", "host": "dest.local", "type": role},
            "configs": destination
        }
    }))
    .unwrap()
}

//! Loader
//!
//! Writes each destination table in ascending `order`, in batches. The
//! destination's role picks the strategy: warehouses upsert on the declared
//! unique columns, lakes and operational databases append. A failed batch
//! is recorded and the remaining batches still run, so a table can end up
//! partially loaded.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::connection::sql::update_columns;
use crate::connection::{Connection, WriteBatch, WriteMode};
use crate::error::{EtlError, Result};
use crate::pipeline::{self, DatabaseRole, DestinationConfig};
use crate::working_set::{columns_of, Row, Tables};

/// Rows that reached the destination and the batch errors of one table
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub rows: Vec<Row>,
    pub errors: Vec<EtlError>,
}

impl LoadOutcome {
    fn failed(err: EtlError) -> Self {
        Self {
            rows: Vec::new(),
            errors: vec![err],
        }
    }
}

pub type LoadOutput = BTreeMap<String, LoadOutcome>;

/// Load the `dst` tables named by `configs`
pub async fn load(
    connection: &dyn Connection,
    role: DatabaseRole,
    configs: &[DestinationConfig],
    tables: &Tables,
    batch_size: usize,
) -> LoadOutput {
    let batch_size = batch_size.max(1);
    let mut output = LoadOutput::new();

    for config in pipeline::ordered(configs) {
        let rows = tables.get(&config.table).map(Vec::as_slice).unwrap_or_default();
        let outcome = load_table(connection, role, config, rows, batch_size).await;

        if outcome.errors.is_empty() {
            info!(table = %config.table, rows = outcome.rows.len(), "Loaded table");
        } else {
            warn!(
                table = %config.table,
                rows = outcome.rows.len(),
                errors = outcome.errors.len(),
                "Table loaded with errors"
            );
        }
        output.insert(config.table.clone(), outcome);
    }

    output
}

fn columns_for(config: &DestinationConfig, rows: &[Row]) -> Vec<String> {
    if config.columns.is_empty() {
        columns_of(rows)
    } else {
        config.columns.clone()
    }
}

/// Unique-key checks for warehouse upserts, before any batch is sent
fn check_upsert(
    connection: &dyn Connection,
    config: &DestinationConfig,
    columns: &[String],
) -> Result<()> {
    let missing: Vec<&String> = config.unique.iter().filter(|u| !columns.contains(u)).collect();
    if !missing.is_empty() {
        return Err(EtlError::MissingUniqueKey {
            table: config.table.clone(),
            reason: format!(
                "unique columns not in output: {}",
                missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ),
        });
    }

    if connection.dialect().is_document() {
        if config.unique.is_empty() {
            return Err(EtlError::MissingUniqueKey {
                table: config.table.clone(),
                reason: "no unique columns declared".into(),
            });
        }
        return Ok(());
    }
    update_columns(&config.table, columns, &config.unique).map(|_| ())
}

async fn load_table(
    connection: &dyn Connection,
    role: DatabaseRole,
    config: &DestinationConfig,
    rows: &[Row],
    batch_size: usize,
) -> LoadOutcome {
    let columns = columns_for(config, rows);
    let mode = match role {
        DatabaseRole::Warehouse => {
            if let Err(e) = check_upsert(connection, config, &columns) {
                return LoadOutcome::failed(e);
            }
            WriteMode::Upsert {
                unique: &config.unique,
            }
        },
        DatabaseRole::Lake | DatabaseRole::Operational => WriteMode::Insert,
    };

    let mut outcome = LoadOutcome::default();
    for (index, chunk) in rows.chunks(batch_size).enumerate() {
        let batch = WriteBatch {
            table: &config.table,
            columns: &columns,
            rows: chunk,
            mode,
        };

        match connection.write(&batch).await {
            Ok(affected) => {
                debug!(table = %config.table, batch = index + 1, rows = chunk.len(), affected, "Batch written");
                outcome.rows.extend_from_slice(chunk);
            },
            Err(e) => {
                warn!(table = %config.table, batch = index + 1, error = %e, "Batch failed");
                outcome.errors.push(EtlError::LoadBatchFailed {
                    table: config.table.clone(),
                    batch: index + 1,
                    message: e.to_string(),
                });
            },
        }
    }
    outcome
}

//! Extractor
//!
//! Reads every configured source table into `src`. Each table succeeds or
//! fails on its own; a failed table is reported with an empty row set.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::connection::{Connection, ReadQuery};
use crate::error::{EtlError, Result};
use crate::filter;
use crate::pipeline::ExtractConfig;
use crate::working_set::Row;

pub mod http;

pub use http::HttpExtractor;

/// Rows or error per extracted table, keyed by the name stored in `src`
pub type ExtractOutput = BTreeMap<String, Result<Vec<Row>>>;

pub(crate) fn extract_failed(table: &str, err: EtlError) -> EtlError {
    match err {
        EtlError::ExtractFailed { .. } => err,
        other => EtlError::ExtractFailed {
            table: table.to_string(),
            message: other.to_string(),
        },
    }
}

/// Extract every config from a database connection
pub async fn extract(
    connection: &dyn Connection,
    configs: &[ExtractConfig],
    watermark: Option<i64>,
) -> ExtractOutput {
    let mut output = ExtractOutput::new();

    for config in configs {
        let result = extract_table(connection, config, watermark)
            .await
            .map_err(|e| extract_failed(&config.table, e));

        match &result {
            Ok(rows) => info!(table = %config.table, rows = rows.len(), "Extracted table"),
            Err(e) => warn!(table = %config.table, error = %e, "Extraction failed"),
        }
        output.insert(config.key().to_string(), result);
    }

    output
}

async fn extract_table(
    connection: &dyn Connection,
    config: &ExtractConfig,
    watermark: Option<i64>,
) -> Result<Vec<Row>> {
    let predicate = filter::compile(&config.filters, watermark, connection.dialect())?;
    let query = ReadQuery {
        table: config.table.clone(),
        columns: config.columns.clone(),
        predicate,
    };
    connection.fetch(&query).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::connection::memory::{MemoryConnector, MemoryDatabase};
    use crate::connection::{ConnectOptions, Connector};
    use crate::pipeline::DatabaseDescriptor;
    use serde_json::json;
    use std::time::Duration;

    async fn source() -> (std::sync::Arc<MemoryDatabase>, Box<dyn Connection>) {
        let db = MemoryDatabase::new();
        let rows = (1..=10)
            .map(|i| {
                json!({"id": i, "status": if i % 3 == 0 { "paid" } else { "open" }, "amount": i * 10})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect();
        db.insert_table("orders", rows).await;

        let descriptor: DatabaseDescriptor =
            serde_json::from_value(json!({"dialect": "postgres"})).unwrap();
        let conn = MemoryConnector::new(db.clone())
            .connect(
                &descriptor,
                &ConnectOptions {
                    timeout: Duration::from_secs(1),
                },
            )
            .await
            .unwrap();
        (db, conn)
    }

    #[tokio::test]
    async fn test_tables_fail_independently() {
        let (db, conn) = source().await;
        db.fail_reads("customers").await;

        let configs: Vec<ExtractConfig> = serde_json::from_value(json!([
            {"table": "orders", "columns": ["id", "amount"],
             "filters": [{"columns": ["status"], "operator": "eq", "value": "paid"}]},
            {"table": "customers"},
            {"table": "orders", "alias": "bad_orders",
             "filters": [{"columns": ["status"], "operator": "regex", "value": "x"}]}
        ]))
        .unwrap();

        let output = extract(conn.as_ref(), &configs, None).await;

        let orders = output["orders"].as_ref().unwrap();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[0].len(), 2);
        assert!(orders[0].contains_key("id") && !orders[0].contains_key("status"));

        assert!(matches!(
            output["customers"],
            Err(EtlError::ExtractFailed { .. })
        ));
        let bad = output["bad_orders"].as_ref().unwrap_err();
        assert!(bad.to_string().contains("Unsupported operator: regex"));
    }
}

//! Transformer
//!
//! Builds every destination table in `dst` from the working set. Tables are
//! processed in ascending `order` so a later table can start from, or join
//! against, an earlier one. A failing step fails only its own table, which
//! is then stored empty.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::error::{EtlError, Result};
use crate::pipeline::{self, DestinationConfig, StepKind, TransformStep};
use crate::working_set::{project, resolve_path, Row, WorkingSet};

pub mod formula;
pub mod steps;

pub use formula::Formula;

/// Row count or error per destination table
pub type TransformOutput = BTreeMap<String, Result<usize>>;

/// Build `dst` from `configs`
///
/// With a `preview_limit`, each table keeps at most that many rows after
/// projection.
pub fn transform(
    working_set: &mut WorkingSet,
    configs: &[DestinationConfig],
    preview_limit: Option<usize>,
) -> TransformOutput {
    let mut output = TransformOutput::new();

    for config in pipeline::ordered(configs) {
        let result = transform_table(working_set, config).map_err(|e| match e {
            EtlError::TransformFailed { .. } => e,
            other => EtlError::TransformFailed {
                table: config.table.clone(),
                message: other.to_string(),
            },
        });

        let rows = match result {
            Ok(rows) => {
                let mut rows = project(rows, &config.columns);
                if let Some(limit) = preview_limit {
                    rows.truncate(limit);
                }
                info!(table = %config.table, rows = rows.len(), "Transformed table");
                output.insert(config.table.clone(), Ok(rows.len()));
                rows
            },
            Err(e) => {
                warn!(table = %config.table, error = %e, "Transform failed");
                output.insert(config.table.clone(), Err(e));
                Vec::new()
            },
        };
        working_set.dst.insert(config.table.clone(), rows);
    }

    output
}

fn transform_table(working_set: &WorkingSet, config: &DestinationConfig) -> Result<Vec<Row>> {
    config.validate()?;
    let mut rows = resolve_path(working_set, &config.init_value)?.to_vec();

    for step in config.ordered_steps() {
        debug!(table = %config.table, step = step.kind.name(), order = step.order, "Applying step");
        rows = apply_step(working_set, rows, step)
            .map_err(|e| EtlError::TransformFailed {
                table: config.table.clone(),
                message: format!("{} step failed: {}", step.kind.name(), e),
            })?;
    }

    Ok(rows)
}

fn apply_step(working_set: &WorkingSet, rows: Vec<Row>, step: &TransformStep) -> Result<Vec<Row>> {
    match &step.kind {
        StepKind::Map { column, mapping } => Ok(steps::map(rows, column, mapping)),
        StepKind::Join {
            left,
            right,
            join_type,
        } => steps::join(working_set, left, right, join_type),
        StepKind::Filter {
            column,
            operator,
            value,
        } => steps::filter(rows, column, operator, value),
        StepKind::Rename {
            rename_from,
            rename_to,
        } => steps::rename(rows, rename_from, rename_to),
        StepKind::Formula { expression, output } => steps::formula(rows, expression, output),
        StepKind::Aggregate {
            operation,
            target,
            group_by,
            output,
        } => steps::aggregate(rows, operation, target, group_by, output),
        StepKind::TimeFormat {
            columns,
            old_format,
            new_format,
        } => steps::time_format(rows, columns, old_format.as_deref(), new_format),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn working_set() -> WorkingSet {
        let mut ws = WorkingSet::default();
        ws.src.insert(
            "orders".into(),
            serde_json::from_value(json!([
                {"id": 1, "customer_id": 1, "amount": 10, "note": "a"},
                {"id": 2, "customer_id": 1, "amount": 5, "note": "b"},
                {"id": 3, "customer_id": 2, "amount": 7, "note": "c"}
            ]))
            .unwrap(),
        );
        ws
    }

    fn configs(value: Value) -> Vec<DestinationConfig> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_tables_chain_in_order() {
        let mut ws = working_set();
        let configs = configs(json!([
            {"table": "big_totals", "order": 2, "init_value": "dst.totals",
             "columns": ["customer_id", "total"],
             "transforms": [{"type": "filter", "column": "total", "operator": ">", "value": 10}]},
            {"table": "totals", "order": 1, "init_value": "src.orders",
             "columns": ["customer_id", "total"],
             "transforms": [{"type": "aggregate", "operation": "sum", "target": "amount",
                             "group_by": "customer_id", "as": "total"}]}
        ]));

        let output = transform(&mut ws, &configs, None);

        assert_eq!(*output["totals"].as_ref().unwrap(), 2);
        assert_eq!(*output["big_totals"].as_ref().unwrap(), 1);
        assert_eq!(ws.dst["big_totals"][0]["total"], json!(15));
        assert!(!ws.dst["totals"][0].contains_key("note"));
    }

    #[test]
    fn test_failed_table_is_empty_and_isolated() {
        let mut ws = working_set();
        let configs = configs(json!([
            {"table": "renamed", "init_value": "src.orders",
             "transforms": [{"type": "rename", "from": "note", "to": "amount"}]},
            {"table": "copied", "init_value": "src.orders", "columns": ["id"]}
        ]));

        let output = transform(&mut ws, &configs, None);

        let err = output["renamed"].as_ref().unwrap_err();
        assert!(matches!(err, EtlError::TransformFailed { .. }));
        assert_eq!(
            err.to_string(),
            "Transform failed for renamed: rename step failed: column 'amount' already exists"
        );
        assert!(ws.dst["renamed"].is_empty());
        assert_eq!(ws.dst["copied"].len(), 3);
        assert_eq!(ws.src["orders"][0]["note"], json!("a"));
    }

    #[test]
    fn test_unsupported_aggregate_is_a_step_error() {
        let mut ws = working_set();
        let configs = configs(json!([{
            "table": "medians", "init_value": "src.orders",
            "transforms": [{"type": "aggregate", "operation": "median", "target": "amount",
                            "group_by": "customer_id", "as": "mid"}]
        }]));

        let output = transform(&mut ws, &configs, None);

        let message = output["medians"].as_ref().unwrap_err().to_string();
        assert!(message.starts_with("Transform failed for medians: aggregate step failed"));
        assert!(!message.contains("Configuration error"));
    }

    #[test]
    fn test_preview_limit() {
        let mut ws = working_set();
        let configs = configs(json!([{"table": "copy", "init_value": "src.orders"}]));
        let output = transform(&mut ws, &configs, Some(2));
        assert_eq!(*output["copy"].as_ref().unwrap(), 2);
        assert_eq!(ws.dst["copy"].len(), 2);
    }

    #[test]
    fn test_unknown_init_value() {
        let mut ws = working_set();
        let configs = configs(json!([{"table": "t", "init_value": "src.missing"}]));
        let output = transform(&mut ws, &configs, None);
        assert!(output["t"].is_err());
        assert!(ws.dst["t"].is_empty());
    }
}

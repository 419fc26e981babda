//! End-to-end runs through the orchestrator
//!
//! These tests drive whole pipelines over in-memory databases:
//! - Filtered extraction, with and without a watermark
//! - Transform chains (aggregate, join, rename)
//! - Batched loads with a failing batch
//! - Preview mode

mod common;

use common::{orders, pipeline, rows, Harness};
use serde_json::json;
use sluice_engine::{EngineConfig, EtlError, RunRequest, StageStatus};

// ============================================================================
// Extract
// ============================================================================

#[tokio::test]
async fn test_extract_returns_matching_rows() {
    let harness = Harness::new();
    harness.source.insert_table("orders", orders(10)).await;

    let pipeline = pipeline(
        json!([{"table": "orders", "filters": [{"columns": ["status"], "operator": "eq", "value": "paid"}]}]),
        "lake",
        json!([{"table": "paid", "init_value": "src.orders"}]),
    );

    let output = harness
        .orchestrator
        .run(RunRequest::preview(&pipeline))
        .await
        .unwrap();

    let extracted = &output.working_set.src["orders"];
    assert_eq!(extracted.len(), 4);
    assert!(extracted.iter().all(|r| r["status"] == json!("paid")));

    let entry = &output.log.extract_log[0];
    assert_eq!(entry.status, StageStatus::Success);
    assert_eq!(entry.count, 4);
    assert!(entry.errors.is_empty());
}

#[tokio::test]
async fn test_watermark_narrows_extraction() {
    let harness = Harness::new();
    harness.source.insert_table("orders", orders(10)).await;

    let pipeline = pipeline(
        json!([{"table": "orders", "filters": [{
            "columns": ["updated_at"], "operator": "gt",
            "value": {"source": "time_threshold", "default": 1_600_000_000_000_i64}
        }]}]),
        "lake",
        json!([{"table": "recent", "init_value": "src.orders"}]),
    );

    let all = harness
        .orchestrator
        .run(RunRequest::new(&pipeline, None))
        .await
        .unwrap();
    assert_eq!(all.working_set.src["orders"].len(), 10);

    let recent = harness
        .orchestrator
        .run(RunRequest::new(&pipeline, Some(1_700_000_007_000)))
        .await
        .unwrap();
    assert_eq!(recent.working_set.src["orders"].len(), 3);
}

#[tokio::test]
async fn test_failed_source_table_does_not_block_others() {
    let harness = Harness::new();
    harness.source.insert_table("orders", orders(5)).await;

    let pipeline = pipeline(
        json!([{"table": "orders"}, {"table": "missing"}]),
        "lake",
        json!([{"table": "copy", "init_value": "src.orders"}]),
    );

    let output = harness
        .orchestrator
        .run(RunRequest::new(&pipeline, None))
        .await
        .unwrap();

    let statuses: Vec<_> = output
        .log
        .extract_log
        .iter()
        .map(|e| (e.name.as_str(), e.status))
        .collect();
    assert!(statuses.contains(&("orders", StageStatus::Success)));
    assert!(statuses.contains(&("missing", StageStatus::Error)));
    assert_eq!(harness.destination.table("copy").await.len(), 5);
    assert_ne!(output.log.message, sluice_engine::run_log::SUCCESS_MESSAGE);
}

// ============================================================================
// Transform
// ============================================================================

#[tokio::test]
async fn test_aggregate_sum_per_group() {
    let harness = Harness::new();
    harness
        .source
        .insert_table(
            "payments",
            rows(json!([
                {"customer_id": 1, "amount": 10},
                {"customer_id": 1, "amount": 5},
                {"customer_id": 2, "amount": 7}
            ])),
        )
        .await;

    let pipeline = pipeline(
        json!([{"table": "payments"}]),
        "lake",
        json!([{
            "table": "totals",
            "init_value": "src.payments",
            "transforms": [{"type": "aggregate", "operation": "sum", "target": "amount",
                            "group_by": "customer_id", "as": "total"}]
        }]),
    );

    let output = harness
        .orchestrator
        .run(RunRequest::preview(&pipeline))
        .await
        .unwrap();

    assert_eq!(
        output.working_set.dst["totals"],
        rows(json!([
            {"customer_id": 1, "amount": 10, "total": 15},
            {"customer_id": 2, "amount": 7, "total": 7}
        ]))
    );
}

#[tokio::test]
async fn test_outer_join_keeps_every_row() {
    let harness = Harness::new();
    harness
        .source
        .insert_table(
            "orders",
            rows(json!([
                {"order_id": 1, "customer_id": 10},
                {"order_id": 2, "customer_id": 99}
            ])),
        )
        .await;
    harness
        .source
        .insert_table(
            "customers",
            rows(json!([
                {"customer_id": 10, "name": "Ada"},
                {"customer_id": 20, "name": "Grace"}
            ])),
        )
        .await;

    let pipeline = pipeline(
        json!([{"table": "orders"}, {"table": "customers"}]),
        "lake",
        json!([{
            "table": "enriched",
            "init_value": "src.orders",
            "transforms": [{"type": "join", "left": "src.orders.customer_id",
                            "right": "src.customers.customer_id", "join_type": "outer"}]
        }]),
    );

    let output = harness
        .orchestrator
        .run(RunRequest::preview(&pipeline))
        .await
        .unwrap();
    let joined = &output.working_set.dst["enriched"];

    assert_eq!(joined.len(), 3);
    for order_id in [1, 2] {
        assert!(joined.iter().any(|r| r.get("order_id") == Some(&json!(order_id))));
    }
    for name in ["Ada", "Grace"] {
        assert!(joined.iter().any(|r| r.get("name") == Some(&json!(name))));
    }
    let matched = joined.iter().find(|r| r.get("order_id") == Some(&json!(1))).unwrap();
    assert_eq!(matched["right_customer_id"], json!(10));
}

#[tokio::test]
async fn test_rename_collision_fails_only_that_table() {
    let harness = Harness::new();
    harness
        .source
        .insert_table("people", rows(json!([{"a": 1, "b": 2}, {"a": 3, "b": 4}])))
        .await;

    let pipeline = pipeline(
        json!([{"table": "people"}]),
        "lake",
        json!([
            {"table": "renamed", "init_value": "src.people",
             "transforms": [{"type": "rename", "from": "a", "to": "b"}]},
            {"table": "copied", "init_value": "src.people"}
        ]),
    );

    let output = harness
        .orchestrator
        .run(RunRequest::new(&pipeline, None))
        .await
        .unwrap();

    let renamed = output
        .log
        .transform_log
        .iter()
        .find(|e| e.name == "renamed")
        .unwrap();
    assert_eq!(renamed.status, StageStatus::Error);
    assert!(renamed.errors[0].contains("already exists"));
    assert!(output.working_set.dst["renamed"].is_empty());

    assert!(harness.destination.table("renamed").await.is_empty());
    assert_eq!(harness.destination.table("copied").await.len(), 2);
    assert_eq!(output.working_set.src["people"][0]["a"], json!(1));
}

// ============================================================================
// Load
// ============================================================================

#[tokio::test]
async fn test_failed_batch_keeps_other_batches() {
    let harness = Harness::new();
    harness.source.insert_table("orders", orders(1200)).await;
    harness.destination.fail_write("orders_copy", 2).await;

    let pipeline = pipeline(
        json!([{"table": "orders"}]),
        "lake",
        json!([{"table": "orders_copy", "init_value": "src.orders"}]),
    );

    let output = harness
        .orchestrator
        .run(RunRequest::new(&pipeline, None))
        .await
        .unwrap();

    let entry = &output.log.load_log[0];
    assert_eq!(entry.status, StageStatus::Partial);
    assert_eq!(entry.count, 700);
    assert_eq!(entry.errors.len(), 1);
    assert!(entry.errors[0].starts_with("Load batch 2 failed"));
    assert_eq!(harness.destination.table("orders_copy").await.len(), 700);
}

#[tokio::test]
async fn test_warehouse_upsert_is_repeatable() {
    let harness = Harness::new();
    harness.source.insert_table("orders", orders(20)).await;

    let pipeline = pipeline(
        json!([{"table": "orders"}]),
        "warehouse",
        json!([{"table": "fact_orders", "init_value": "src.orders",
                "columns": ["id", "amount"], "unique": ["id"]}]),
    );

    for _ in 0..2 {
        harness
            .orchestrator
            .run(RunRequest::new(&pipeline, None))
            .await
            .unwrap();
    }

    let stored = harness.destination.table("fact_orders").await;
    assert_eq!(stored.len(), 20);
    assert!(harness.destination.writes().await.iter().all(|w| w.upsert));
}

// ============================================================================
// Preview
// ============================================================================

#[tokio::test]
async fn test_preview_never_loads() {
    let harness = Harness::new();
    harness.source.insert_table("orders", orders(40)).await;

    let pipeline = pipeline(
        json!([{"table": "orders"}]),
        "lake",
        json!([{"table": "orders_copy", "init_value": "src.orders", "columns": ["id"]}]),
    );

    let output = harness
        .orchestrator
        .run(RunRequest::preview(&pipeline))
        .await
        .unwrap();

    assert_eq!(output.working_set.dst["orders_copy"].len(), 25);
    assert_eq!(output.working_set.src["orders"].len(), 40);
    assert!(output.log.load_log.is_empty());
    assert_eq!(harness.destination.open_count(), 0);
    assert!(harness.destination.writes().await.is_empty());
}

#[tokio::test]
async fn test_preview_limit_is_configurable() {
    let harness = Harness::with_config(EngineConfig {
        preview_limit: 5,
        ..EngineConfig::default()
    });
    harness.source.insert_table("orders", orders(40)).await;

    let pipeline = pipeline(
        json!([{"table": "orders"}]),
        "lake",
        json!([{"table": "orders_copy", "init_value": "src.orders"}]),
    );

    let output = harness
        .orchestrator
        .run(RunRequest::preview(&pipeline))
        .await
        .unwrap();
    assert_eq!(output.working_set.dst["orders_copy"].len(), 5);
}

// ============================================================================
// Fatal errors
// ============================================================================

#[tokio::test]
async fn test_unreachable_destination_is_fatal() {
    let harness = Harness::new();
    harness.source.insert_table("orders", orders(3)).await;

    let mut pipeline = pipeline(
        json!([{"table": "orders"}]),
        "lake",
        json!([{"table": "copy", "init_value": "src.orders"}]),
    );
    pipeline.destination.database.dialect = sluice_engine::Dialect::Oracle;

    let err = harness
        .orchestrator
        .run(RunRequest::new(&pipeline, None))
        .await
        .unwrap_err();

    assert!(matches!(err, EtlError::ConnectFailed { .. }));
    assert!(err.is_fatal());
    assert_eq!(harness.source.open_count(), harness.source.close_count());
}

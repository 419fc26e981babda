//! End-to-end tests for the sluice binary
//!
//! These tests validate:
//! - Argument parsing and help output
//! - File loading errors
//! - Preview of an HTTP API source (mocked)
//! - Fatal connection errors

use assert_cmd::assert::OutputAssertExt;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::process::Output;
use tempfile::TempDir;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Helper to write a pipeline whose source is the mock API
fn create_api_pipeline(dir: &TempDir, base_url: &str, destination_port: u16) -> PathBuf {
    let pipeline = serde_json::json!({
        "name": "users",
        "source": {
            "api": {"base_url": base_url, "auth_type": "api_key", "auth_key": "secret"},
            "configs": [{
                "name": "users", "target": "/users",
                "fields": ["id", "name"], "http_method": "get"
            }]
        },
        "destination": {
            "database": {
                "dialect": "mysql", "host": "127.0.0.1", "port": destination_port,
                "username": "etl", "password": "etl", "database": "warehouse", "type": "lake"
            },
            "configs": [{"table": "people", "init_value": "src.users"}]
        }
    });
    let pipeline_path = dir.path().join("users.json");
    fs::write(&pipeline_path, pipeline.to_string()).expect("Failed to write pipeline");
    pipeline_path
}

async fn mock_users_api() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"id": 1, "name": "Ada Lovelace", "internal": "hidden"},
                {"id": 2, "name": "Grace Hopper", "internal": "hidden"}
            ]
        })))
        .mount(&server)
        .await;
    server
}

fn sluice() -> Command {
    let mut cmd = Command::cargo_bin("sluice").expect("binary not built");
    cmd.env("LOG_LEVEL", "error").env("SLUICE_CONNECT_TIMEOUT_SECS", "5");
    cmd
}

/// Run the binary off the async runtime so the mock server keeps serving
async fn run_sluice(args: Vec<String>) -> Output {
    tokio::task::spawn_blocking(move || sluice().args(args).output().expect("failed to run"))
        .await
        .expect("command task panicked")
}

// ============================================================================
// Arguments and files
// ============================================================================

#[test]
fn test_help_lists_commands() {
    sluice()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("preview"))
        .stdout(predicate::str::contains("test-connection"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn test_missing_pipeline_file() {
    let dir = TempDir::new().unwrap();
    sluice()
        .arg("run")
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("File not found"));
}

#[test]
fn test_unsupported_pipeline_extension() {
    let dir = TempDir::new().unwrap();
    let pipeline_path = dir.path().join("pipeline.toml");
    fs::write(&pipeline_path, "name = 'x'").unwrap();

    sluice()
        .arg("preview")
        .arg(&pipeline_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported file type"));
}

#[test]
fn test_duplicate_destination_tables_rejected() {
    let dir = TempDir::new().unwrap();
    let pipeline_path = dir.path().join("dup.yaml");
    fs::write(
        &pipeline_path,
        r#"
name: dup
source:
  database: {dialect: postgres, host: localhost}
  configs: [{table: orders}]
destination:
  database: {dialect: mysql, host: localhost}
  configs:
    - {table: copy, init_value: src.orders}
    - {table: copy, init_value: src.orders}
"#,
    )
    .unwrap();

    sluice()
        .arg("preview")
        .arg(&pipeline_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid definition"));
}

// ============================================================================
// HTTP API source
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_preview_api_source() {
    let server = mock_users_api().await;
    let dir = TempDir::new().unwrap();
    let pipeline_path = create_api_pipeline(&dir, &server.uri(), 1);

    let output = run_sluice(vec!["preview".into(), pipeline_path.display().to_string()]).await;

    output
        .assert()
        .success()
        .stdout(predicate::str::contains("people"))
        .stdout(predicate::str::contains("Ada Lovelace"))
        .stdout(predicate::str::contains("hidden").not());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_preview_json_output() {
    let server = mock_users_api().await;
    let dir = TempDir::new().unwrap();
    let pipeline_path = create_api_pipeline(&dir, &server.uri(), 1);

    let output = run_sluice(vec![
        "preview".into(),
        pipeline_path.display().to_string(),
        "--json".into(),
    ])
    .await;

    output.clone().assert().success();
    let rendered: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rendered["tables"]["people"].as_array().unwrap().len(), 2);
    assert_eq!(rendered["log"]["extract_log"][0]["count"], 2);
    assert!(rendered["log"]["load_log"].as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_test_connection_rejects_api_source() {
    let server = mock_users_api().await;
    let dir = TempDir::new().unwrap();
    let pipeline_path = create_api_pipeline(&dir, &server.uri(), 1);

    let output = run_sluice(vec![
        "test-connection".into(),
        pipeline_path.display().to_string(),
    ])
    .await;

    output
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a database"));
}

// ============================================================================
// Fatal errors
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_run_fails_when_destination_unreachable() {
    let server = mock_users_api().await;
    let dir = TempDir::new().unwrap();
    // Nothing listens on port 1
    let pipeline_path = create_api_pipeline(&dir, &server.uri(), 1);

    let output = run_sluice(vec!["run".into(), pipeline_path.display().to_string()]).await;

    output
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to connect to mysql"));
}

//! Tests against a running Postgres instance.
//!
//! Set DATABASE_URL to enable; without it every test returns early.
//!
//! Run with: cargo test --package sluice-adapter-pg --test live

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use sluice_adapter_pg::{PgConnector, PgConnectorOptions, introspect_snapshot};
use sluice_core::{ProviderConfig, ProviderKind, SandboxConfig};
use sluice_runtime::{Connector, ExecutionError, ExecutionSandbox, SandboxError};

async fn connector() -> Option<PgConnector> {
    let url = std::env::var("DATABASE_URL").ok()?;
    Some(
        PgConnector::connect(&url, PgConnectorOptions::default())
            .await
            .expect("connect to DATABASE_URL"),
    )
}

fn sandbox() -> ExecutionSandbox {
    let provider = ProviderConfig {
        kind: ProviderKind::Postgres,
        ..Default::default()
    };
    ExecutionSandbox::new(&SandboxConfig::default(), &provider.capabilities())
}

#[tokio::test]
async fn test_rows_arrive_as_json_objects() {
    let Some(connector) = connector().await else {
        return;
    };
    let mut conn = connector.acquire().await.unwrap();

    let outcome = sandbox()
        .run(
            conn.as_mut(),
            "SELECT $1::bigint AS id, $2 AS status",
            &[json!(7), json!("open")],
            true,
            Duration::from_secs(5),
        )
        .await;

    let output = outcome.result.unwrap();
    assert_eq!(output.rows, vec![json!({"id": 7, "status": "open"})]);
    let names: Vec<_> = output.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "status"]);
    assert!(outcome.report.committed);
    assert!(outcome.report.state_clean);
}

#[tokio::test]
async fn test_duplicate_column_names_are_all_returned() {
    let Some(connector) = connector().await else {
        return;
    };
    let mut conn = connector.acquire().await.unwrap();

    let outcome = sandbox()
        .run(
            conn.as_mut(),
            "SELECT a.id, b.id FROM (SELECT 1 AS id) a CROSS JOIN (SELECT 2 AS id) b",
            &[],
            true,
            Duration::from_secs(5),
        )
        .await;

    let output = outcome.result.unwrap();
    assert_eq!(output.rows, vec![json!({"id": 1, "id_2": 2})]);
    let names: Vec<_> = output.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "id_2"]);
}

#[tokio::test]
async fn test_statement_timeout_is_enforced_by_the_server() {
    let Some(connector) = connector().await else {
        return;
    };
    let mut conn = connector.acquire().await.unwrap();

    let outcome = sandbox()
        .run(conn.as_mut(), "SELECT pg_sleep(5)", &[], false, Duration::from_millis(100))
        .await;

    assert_eq!(
        outcome.result.unwrap_err(),
        SandboxError::Execution(ExecutionError::Timeout)
    );
    assert!(outcome.report.rolled_back);
    assert!(outcome.report.reset_all_attempted);
}

#[tokio::test]
async fn test_failed_statement_rolls_back() {
    let Some(connector) = connector().await else {
        return;
    };
    let mut conn = connector.acquire().await.unwrap();

    let outcome = sandbox()
        .run(
            conn.as_mut(),
            "SELECT nextval('sluice_missing_sequence')",
            &[],
            false,
            Duration::from_secs(5),
        )
        .await;
    assert!(outcome.result.is_err());
    assert!(outcome.report.rolled_back);
}

#[tokio::test]
async fn test_introspection_skips_system_schemas() {
    let Some(connector) = connector().await else {
        return;
    };
    let snapshot = introspect_snapshot(connector.pool()).await.unwrap();
    assert!(snapshot.version.is_some());
    assert!(
        snapshot
            .tables
            .iter()
            .all(|t| t.schema != "pg_catalog" && t.schema != "information_schema")
    );
}

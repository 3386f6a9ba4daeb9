//! Capability negotiation and resource cap validation through the gateway.

use pretty_assertions::assert_eq;
use sluice_core::{Capability, ErrorCategory, FallbackPolicy, ProviderKind};
use sluice_runtime::{FallbackMode, QueryRequest};

use crate::common::{RecordingConnector, config, gateway, ids, order_rows};

fn bigquery_request(sql: &str) -> QueryRequest {
    let mut request = QueryRequest::new(sql, "7");
    // BigQuery cannot guarantee byte caps.
    request.enforce_byte_cap = false;
    request
}

#[tokio::test]
async fn missing_pagination_becomes_a_hard_limit_under_apply() {
    let mut config = config(ProviderKind::Bigquery);
    config.capabilities.fallback_policy = FallbackPolicy::Apply;
    let connector = RecordingConnector::new(order_rows(20));
    let gateway = gateway(&config, &connector);

    let envelope = gateway
        .execute(bigquery_request("SELECT * FROM orders").with_page_size(5))
        .await;
    assert_eq!(envelope.error, None);
    assert_eq!(ids(&envelope.rows), vec![0, 1, 2, 3, 4]);

    let metadata = &envelope.metadata;
    assert_eq!(metadata.cap_detected, Some(Capability::Pagination));
    assert!(metadata.cap_mitigation_applied);
    assert_eq!(metadata.cap_mitigation_mode, Some(FallbackMode::ForceLimitedResults));
    assert!(metadata.is_truncated);
    assert_eq!(metadata.next_page_token, None);

    let execution = connector.last_execution();
    assert!(execution.sql.contains("tenant_id = ?"), "{}", execution.sql);
    assert!(execution.sql.ends_with("LIMIT 6"), "{}", execution.sql);
}

#[tokio::test]
async fn outstanding_token_terminates_pagination_under_apply() {
    let mut config = config(ProviderKind::Bigquery);
    config.capabilities.fallback_policy = FallbackPolicy::Apply;
    let connector = RecordingConnector::new(order_rows(20));
    let gateway = gateway(&config, &connector);

    let envelope = gateway
        .execute(bigquery_request("SELECT * FROM orders").with_page_token("c1.abc.def"))
        .await;
    assert_eq!(envelope.error, None);
    assert!(envelope.rows.is_empty());
    assert_eq!(envelope.metadata.cap_mitigation_mode, Some(FallbackMode::TerminatePagination));
    assert_eq!(envelope.metadata.next_page_token, None);
    assert_eq!(connector.acquires(), 0);
}

#[tokio::test]
async fn unmitigated_gap_is_reported_as_unsupported_capability() {
    let mut config = config(ProviderKind::Bigquery);
    config.capabilities.fallback_policy = FallbackPolicy::Suggest;
    let connector = RecordingConnector::new(order_rows(20));
    let gateway = gateway(&config, &connector);

    let envelope = gateway
        .execute(bigquery_request("SELECT * FROM orders").with_page_size(5))
        .await;
    let error = envelope.error.unwrap();
    assert_eq!(error.category, ErrorCategory::UnsupportedCapability);
    assert_eq!(error.code, "CAPABILITY_UNSUPPORTED:PAGINATION");
    assert_eq!(envelope.metadata.cap_detected, Some(Capability::Pagination));
    assert!(!envelope.metadata.cap_mitigation_applied);
    assert_eq!(envelope.metadata.cap_mitigation_mode, Some(FallbackMode::ForceLimitedResults));
    assert_eq!(connector.acquires(), 0);
}

#[tokio::test]
async fn missing_column_metadata_only_drops_columns() {
    let mut config = config(ProviderKind::Postgres);
    config.provider.overrides.column_metadata = Some(false);
    config.capabilities.fallback_policy = FallbackPolicy::Off;
    let connector = RecordingConnector::new(order_rows(2));
    let gateway = gateway(&config, &connector);

    let envelope = gateway
        .execute(QueryRequest::new("SELECT * FROM orders", "7").with_columns())
        .await;
    assert_eq!(envelope.error, None);
    assert_eq!(envelope.rows.len(), 2);
    assert_eq!(envelope.metadata.cap_detected, Some(Capability::ColumnMetadata));
    assert!(!envelope.metadata.cap_mitigation_applied);
    assert_eq!(envelope.columns, None);
}

#[tokio::test]
async fn columns_are_returned_when_supported() {
    let connector = RecordingConnector::new(order_rows(2));
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    let envelope = gateway
        .execute(QueryRequest::new("SELECT * FROM orders", "7").with_columns())
        .await;
    let columns = envelope.columns.expect("columns requested");
    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "status"]);
    assert_eq!(envelope.metadata.cap_detected, None);
}

#[tokio::test]
async fn strict_byte_cap_on_unsupported_provider_is_refused() {
    let connector = RecordingConnector::new(order_rows(2));
    let gateway = gateway(&config(ProviderKind::Bigquery), &connector);

    let envelope = gateway.execute(QueryRequest::new("SELECT * FROM orders", "7")).await;
    let error = envelope.error.unwrap();
    assert_eq!(error.code, "RESOURCE_CAP_UNSUPPORTED:BYTE_CAP");
    assert_eq!(error.category, ErrorCategory::InvalidRequest);
    assert_eq!(connector.acquires(), 0);
}

#[tokio::test]
async fn explicit_timeout_without_cancellation_is_refused() {
    let mut config = config(ProviderKind::Sqlite);
    config.capabilities.fallback_policy = FallbackPolicy::Apply;
    let connector = RecordingConnector::new(order_rows(2));
    let gateway = gateway(&config, &connector);

    let mut request = QueryRequest::new("SELECT * FROM orders", "7");
    request.timeout_ms = Some(500);
    let envelope = gateway.execute(request).await;
    assert_eq!(envelope.error.unwrap().code, "CAPABILITY_UNSUPPORTED:CANCELLATION");
    assert_eq!(connector.acquires(), 0);
}

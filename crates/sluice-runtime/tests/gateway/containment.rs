//! Row and byte ceilings on the returned envelope.

use pretty_assertions::assert_eq;
use sluice_core::ProviderKind;
use sluice_runtime::{PartialReason, QueryRequest};

use crate::common::{RecordingConnector, config, gateway, ids, order_rows};

#[tokio::test]
async fn row_ceiling_truncates_and_reports() {
    let mut config = config(ProviderKind::Postgres);
    config.limits.max_rows = 10;
    let connector = RecordingConnector::new(order_rows(30));
    let gateway = gateway(&config, &connector);

    let envelope = gateway.execute(QueryRequest::new("SELECT * FROM orders", "7")).await;
    assert_eq!(envelope.error, None);
    assert_eq!(ids(&envelope.rows), (0..10).collect::<Vec<_>>());
    assert_eq!(envelope.metadata.rows_returned, 10);
    assert!(envelope.metadata.is_truncated);
    assert_eq!(envelope.metadata.partial_reason, Some(PartialReason::MaxRows));
    assert!(connector.last_execution().sql.ends_with("LIMIT 11"));
}

#[tokio::test]
async fn row_ceiling_can_be_waived_by_the_caller() {
    let mut config = config(ProviderKind::Postgres);
    config.limits.max_rows = 10;
    let connector = RecordingConnector::new(order_rows(30));
    let gateway = gateway(&config, &connector);

    let mut request = QueryRequest::new("SELECT * FROM orders", "7");
    request.enforce_row_cap = false;
    let envelope = gateway.execute(request).await;
    assert_eq!(envelope.rows.len(), 30);
    assert!(!envelope.metadata.is_truncated);
    assert!(!connector.last_execution().sql.contains("LIMIT"));
}

#[tokio::test]
async fn serialized_envelope_never_exceeds_byte_budget() {
    for max_bytes in (500..=2000).step_by(97) {
        let mut config = config(ProviderKind::Postgres);
        config.limits.max_bytes = max_bytes;
        let connector = RecordingConnector::new(order_rows(100));
        let gateway = gateway(&config, &connector);

        let envelope = gateway.execute(QueryRequest::new("SELECT * FROM orders", "7")).await;
        assert_eq!(envelope.error, None);

        let serialized = serde_json::to_string(&envelope).unwrap();
        assert!(
            serialized.len() <= max_bytes,
            "{} bytes over a budget of {max_bytes}",
            serialized.len()
        );
        assert!(envelope.metadata.is_truncated);
        assert_eq!(envelope.metadata.partial_reason, Some(PartialReason::MaxBytes));
        assert_eq!(envelope.metadata.rows_returned, envelope.rows.len());
    }
}

#[tokio::test]
async fn byte_truncated_page_continues_where_it_stopped() {
    let mut config = config(ProviderKind::Postgres);
    config.limits.max_bytes = 1500;
    let connector = RecordingConnector::new(order_rows(60));
    let gateway = gateway(&config, &connector);
    let sql = "SELECT * FROM orders ORDER BY id";

    let first = gateway.execute(QueryRequest::new(sql, "7").with_page_size(50)).await;
    assert_eq!(first.error, None);
    assert!(serde_json::to_string(&first).unwrap().len() <= 1500);
    assert_eq!(first.metadata.partial_reason, Some(PartialReason::MaxBytes));
    let seen = first.rows.len();
    assert!(seen > 0 && seen < 50);

    let token = first.metadata.next_page_token.expect("truncated page carries a token");
    let second = gateway.execute(QueryRequest::new(sql, "7").with_page_token(token)).await;
    assert_eq!(second.error, None);
    assert_eq!(ids(&second.rows)[0], seen as u64);
    assert!(
        connector
            .last_execution()
            .sql
            .ends_with(&format!("LIMIT 51 OFFSET {seen}"))
    );
}

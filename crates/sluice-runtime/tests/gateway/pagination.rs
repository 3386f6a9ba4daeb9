//! Offset pagination through signed continuation tokens.

use pretty_assertions::assert_eq;
use serde_json::json;
use sluice_core::{ErrorCategory, ProviderKind};
use sluice_runtime::QueryRequest;

use crate::common::{RecordingConnector, config, gateway, ids, order_rows};

const SQL: &str = "SELECT * FROM orders ORDER BY id";

#[tokio::test]
async fn walks_every_page_exactly_once() {
    let connector = RecordingConnector::new(order_rows(25));
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    let first = gateway.execute(QueryRequest::new(SQL, "7").with_page_size(10)).await;
    assert_eq!(first.error, None);
    assert_eq!(ids(&first.rows), (0..10).collect::<Vec<_>>());
    assert!(first.metadata.is_truncated);
    assert_eq!(first.metadata.partial_reason, None);
    let token = first.metadata.next_page_token.clone().expect("more rows remain");
    assert!(token.starts_with("c1."));
    assert!(connector.last_execution().sql.ends_with("LIMIT 11 OFFSET 0"));

    let second = gateway.execute(QueryRequest::new(SQL, "7").with_page_token(&token)).await;
    assert_eq!(ids(&second.rows), (10..20).collect::<Vec<_>>());
    assert!(connector.last_execution().sql.ends_with("LIMIT 11 OFFSET 10"));
    let token = second.metadata.next_page_token.clone().expect("more rows remain");

    let third = gateway.execute(QueryRequest::new(SQL, "7").with_page_token(&token)).await;
    assert_eq!(ids(&third.rows), (20..25).collect::<Vec<_>>());
    assert!(!third.metadata.is_truncated);
    assert_eq!(third.metadata.next_page_token, None);
}

#[tokio::test]
async fn token_is_bound_to_tenant_and_statement() {
    let connector = RecordingConnector::new(order_rows(25));
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    let first = gateway.execute(QueryRequest::new(SQL, "7").with_page_size(10)).await;
    let token = first.metadata.next_page_token.unwrap();
    let acquired = connector.acquires();

    let other_tenant = gateway.execute(QueryRequest::new(SQL, "8").with_page_token(&token)).await;
    assert_eq!(other_tenant.error.unwrap().code, "FINGERPRINT_MISMATCH");

    let other_sql = gateway
        .execute(QueryRequest::new("SELECT id FROM orders", "7").with_page_token(&token))
        .await;
    assert_eq!(other_sql.error.unwrap().code, "FINGERPRINT_MISMATCH");

    let other_params = gateway
        .execute(
            QueryRequest::new("SELECT * FROM orders WHERE status = $1", "7")
                .with_params(vec![json!("open")])
                .with_page_token(&token),
        )
        .await;
    assert_eq!(other_params.error.unwrap().code, "FINGERPRINT_MISMATCH");

    assert_eq!(connector.acquires(), acquired);
}

#[tokio::test]
async fn tampered_tokens_fail_closed() {
    let connector = RecordingConnector::new(order_rows(25));
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    let first = gateway.execute(QueryRequest::new(SQL, "7").with_page_size(10)).await;
    let token = first.metadata.next_page_token.unwrap();
    let acquired = connector.acquires();

    let mut bytes = token.clone().into_bytes();
    let middle = bytes.len() / 2;
    bytes[middle] = if bytes[middle] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(bytes).unwrap();

    let envelope = gateway.execute(QueryRequest::new(SQL, "7").with_page_token(&tampered)).await;
    let error = envelope.error.unwrap();
    assert_eq!(error.code, "SIGNATURE_INVALID");
    assert_eq!(error.category, ErrorCategory::InvalidRequest);
    assert!(!error.message.contains(&tampered));

    let oversized = "c1.".to_string() + &"A".repeat(4096);
    let envelope = gateway.execute(QueryRequest::new(SQL, "7").with_page_token(oversized)).await;
    assert_eq!(envelope.error.unwrap().code, "TOKEN_TOO_LARGE");

    assert_eq!(connector.acquires(), acquired);
}

#[tokio::test]
async fn pagination_without_secret_fails_closed() {
    let mut config = config(ProviderKind::Postgres);
    config.cursor.secret = None;
    let connector = RecordingConnector::new(order_rows(25));
    let gateway = gateway(&config, &connector);

    let envelope = gateway.execute(QueryRequest::new(SQL, "7").with_page_size(10)).await;
    let error = envelope.error.unwrap();
    assert_eq!(error.code, "SECRET_MISSING");
    assert_eq!(error.category, ErrorCategory::InternalError);
    assert_eq!(connector.acquires(), 0);

    // Requests that do not paginate are unaffected.
    let envelope = gateway.execute(QueryRequest::new(SQL, "7")).await;
    assert_eq!(envelope.error, None);
    assert_eq!(envelope.rows.len(), 25);
}

#[tokio::test]
async fn insecure_dev_mode_issues_unsigned_tokens() {
    let mut config = config(ProviderKind::Postgres);
    config.cursor.secret = None;
    config.cursor.allow_insecure_dev = true;
    let connector = RecordingConnector::new(order_rows(15));
    let gateway = gateway(&config, &connector);

    let first = gateway.execute(QueryRequest::new(SQL, "7").with_page_size(10)).await;
    let token = first.metadata.next_page_token.unwrap();
    assert_eq!(token.matches('.').count(), 1);

    let second = gateway.execute(QueryRequest::new(SQL, "7").with_page_token(&token)).await;
    assert_eq!(ids(&second.rows), (10..15).collect::<Vec<_>>());
}

#[tokio::test]
async fn page_size_is_bounded() {
    let connector = RecordingConnector::new(order_rows(5));
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    for size in [0, 1001] {
        let envelope = gateway.execute(QueryRequest::new(SQL, "7").with_page_size(size)).await;
        assert_eq!(envelope.error.unwrap().code, "PAGE_SIZE_INVALID");
    }
    assert_eq!(connector.acquires(), 0);
}

//! Statement policy and tenant enforcement through the gateway.

use pretty_assertions::assert_eq;
use serde_json::json;
use sluice_core::{ErrorCategory, ProviderKind};
use sluice_rls::EnforcementMode;
use sluice_runtime::QueryRequest;

use crate::common::{RecordingConnector, config, gateway, order_rows};

#[tokio::test]
async fn blocked_statements_never_reach_the_database() {
    let connector = RecordingConnector::new(order_rows(3));
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    for (sql, code) in [
        ("DROP TABLE orders", "BLOCKED_STATEMENT:DROP"),
        ("DELETE FROM orders", "BLOCKED_STATEMENT:DELETE"),
        ("SELECT 1; SELECT 2", "MULTI_STATEMENT"),
        ("SET search_path = evil", "BLOCKED_STATEMENT:SET"),
        ("", "EMPTY_STATEMENT"),
    ] {
        let envelope = gateway.execute(QueryRequest::new(sql, "7")).await;
        let error = envelope.error.expect("blocked statement must fail");
        assert_eq!(error.code, code, "{sql}");
        assert_eq!(error.category, ErrorCategory::InvalidRequest);
        assert!(!error.retryable);
        assert!(envelope.rows.is_empty());
    }

    assert_eq!(connector.acquires(), 0);
}

#[tokio::test]
async fn tenant_rejections_never_reach_the_database() {
    let connector = RecordingConnector::new(order_rows(3));
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    let envelope = gateway.execute(QueryRequest::new("SELECT * FROM audit_log", "7")).await;
    let error = envelope.error.unwrap();
    assert_eq!(error.code, "TENANT_COLUMN_MISSING");
    assert!(!envelope.metadata.tenant_enforcement_applied);

    let recursive = "WITH RECURSIVE t AS (SELECT id FROM orders UNION ALL SELECT id FROM t) SELECT * FROM t";
    let envelope = gateway.execute(QueryRequest::new(recursive, "7")).await;
    let error = envelope.error.unwrap();
    assert_eq!(error.category, ErrorCategory::TenantEnforcementUnsupported);
    assert_eq!(error.code, "RECURSIVE_CTE");

    let mut missing_tenant = QueryRequest::new("SELECT * FROM orders", "7");
    missing_tenant.tenant_id = None;
    let envelope = gateway.execute(missing_tenant).await;
    assert_eq!(envelope.error.unwrap().code, "TENANT_ID_MISSING");

    assert_eq!(connector.acquires(), 0);
}

#[tokio::test]
async fn rewritten_statement_and_params_are_executed() {
    let connector = RecordingConnector::new(order_rows(3));
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    let request = QueryRequest::new("SELECT * FROM orders WHERE status = $1", "7")
        .with_params(vec![json!("open")]);
    let envelope = gateway.execute(request).await;
    assert_eq!(envelope.error, None);
    assert_eq!(envelope.rows.len(), 3);
    assert!(envelope.metadata.tenant_enforcement_applied);
    assert_eq!(envelope.metadata.tenant_enforcement_mode, EnforcementMode::SqlRewrite);

    let execution = connector.last_execution();
    assert_eq!(
        execution.sql,
        "SELECT * FROM (SELECT * FROM (SELECT * FROM orders WHERE tenant_id = $2) AS orders WHERE status = $1) AS sluice_page LIMIT 1001"
    );
    assert_eq!(execution.params, vec![json!("open"), json!(7)]);
    assert_eq!(connector.acquires(), 1);
}

#[tokio::test]
async fn error_messages_never_echo_sql() {
    let connector = RecordingConnector::new(Vec::new());
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    let sql = "SELECT secret_column FROM secret_table_name";
    let envelope = gateway.execute(QueryRequest::new(sql, "7")).await;
    let error = envelope.error.unwrap();
    assert_eq!(error.code, "UNKNOWN_TABLE");
    assert!(!error.message.contains("secret_table_name"));
    assert!(!error.message.contains("secret_column"));
}

//! Provider failures, timeouts, abandoned requests and session drift.

use std::time::Duration;

use pretty_assertions::assert_eq;
use sluice_core::{ErrorCategory, ProviderKind};
use sluice_runtime::{ExecutionError, QueryRequest};

use crate::common::{Behavior, RecordingConnector, config, gateway, order_rows};

fn request() -> QueryRequest {
    QueryRequest::new("SELECT * FROM orders", "7")
}

#[tokio::test]
async fn deadlock_is_retryable_and_rolled_back() {
    let connector = RecordingConnector::new(order_rows(3)).with_behavior(Behavior {
        fail: Some(ExecutionError::Deadlock),
        ..Default::default()
    });
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    let envelope = gateway.execute(request()).await;
    assert!(envelope.rows.is_empty());
    let error = envelope.error.unwrap();
    assert_eq!(error.code, "DEADLOCK");
    assert!(error.retryable);
    assert_eq!(error.retry_after_seconds, Some(1));

    let calls = connector.log().calls.clone();
    assert!(calls.contains(&"rollback".to_string()), "{calls:?}");
    assert!(!calls.contains(&"commit".to_string()), "{calls:?}");
    assert!(calls.ends_with(&["reset_role".to_string(), "reset_all".to_string()]));
}

#[tokio::test]
async fn provider_errors_expose_only_their_code() {
    let connector = RecordingConnector::new(order_rows(3)).with_behavior(Behavior {
        fail: Some(ExecutionError::Provider {
            code: "42P01".to_string(),
        }),
        ..Default::default()
    });
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    let error = gateway.execute(request()).await.error.unwrap();
    assert_eq!(error.code, "PROVIDER_ERROR");
    assert_eq!(error.category, ErrorCategory::InternalError);
    assert!(!error.retryable);
    assert!(!error.message.contains("orders"));
}

#[tokio::test]
async fn hung_statement_times_out() {
    let connector = RecordingConnector::new(order_rows(3)).with_behavior(Behavior {
        hang: true,
        ..Default::default()
    });
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    let mut request = request();
    request.timeout_ms = Some(50);
    let error = gateway.execute(request).await.error.unwrap();
    assert_eq!(error.code, "EXECUTION_TIMEOUT");
    assert_eq!(error.category, ErrorCategory::Timeout);
    assert!(error.retryable);

    let calls = connector.log().calls.clone();
    assert_eq!(
        calls,
        vec![
            "begin_read_only",
            "set_statement_timeout",
            "rollback",
            "reset_role",
            "reset_all"
        ]
    );
}

#[tokio::test]
async fn abandoned_request_still_cleans_up() {
    let connector = RecordingConnector::new(order_rows(3)).with_behavior(Behavior {
        hang: true,
        ..Default::default()
    });
    let gateway = gateway(&config(ProviderKind::Postgres), &connector);

    let mut request = request();
    request.timeout_ms = Some(100);
    let abandoned = tokio::time::timeout(Duration::from_millis(10), gateway.execute(request)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(800)).await;
    let calls = connector.log().calls.clone();
    assert!(calls.contains(&"rollback".to_string()), "{calls:?}");
    assert_eq!(calls.last().map(String::as_str), Some("reset_all"));
}

#[tokio::test]
async fn session_drift_is_fatal_only_when_strict() {
    let drifting = || {
        RecordingConnector::new(order_rows(3)).with_behavior(Behavior {
            drift: true,
            ..Default::default()
        })
    };

    let connector = drifting();
    let envelope = gateway(&config(ProviderKind::Postgres), &connector)
        .execute(request())
        .await;
    assert_eq!(envelope.error, None);
    assert_eq!(envelope.rows.len(), 3);
    // A drifted session never goes back to the pool.
    let calls = connector.log().calls.clone();
    assert_eq!(calls.last().map(String::as_str), Some("discard"), "{calls:?}");

    let mut strict = config(ProviderKind::Postgres);
    strict.sandbox.strict_session_check = true;
    let connector = drifting();
    let envelope = gateway(&strict, &connector).execute(request()).await;
    assert!(envelope.rows.is_empty());
    let error = envelope.error.unwrap();
    assert_eq!(error.code, "SESSION_DRIFT");
    assert!(!error.message.contains("attacker"));
    assert!(connector.log().calls.contains(&"discard".to_string()));

    // Callers can opt in per request as well.
    let connector = drifting();
    let mut request = request();
    request.strict_session_check = true;
    let envelope = gateway(&config(ProviderKind::Postgres), &connector)
        .execute(request)
        .await;
    assert_eq!(envelope.error.unwrap().code, "SESSION_DRIFT");
}

#[tokio::test]
async fn sessions_without_cancellation_skip_the_native_timeout() {
    let connector = RecordingConnector::new(order_rows(3));
    let gateway = gateway(&config(ProviderKind::Sqlite), &connector);

    let envelope = gateway.execute(request()).await;
    assert_eq!(envelope.error, None);
    let calls = connector.log().calls.clone();
    assert!(!calls.contains(&"set_statement_timeout".to_string()), "{calls:?}");
}

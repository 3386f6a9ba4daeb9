//! Session hygiene around one physical execution.
//!
//! ```text
//! baseline ──► BEGIN [READ ONLY] ──► SET LOCAL timeout ──► execute
//!                                                           │
//!                               COMMIT on success ◄─────────┤
//!                               ROLLBACK on failure ◄───────┘
//!                                         │
//!                     RESET ROLE, RESET ALL (best effort)
//!                                         │
//!                         re-read baseline, report drift
//!                                         │
//!                      discard the connection unless clean
//! ```
//!
//! The transaction is always closed, the execution error is always the one
//! returned, and cleanup failures are recorded instead of raised. A session
//! that is not provably clean never goes back to the pool.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sluice_core::{ProviderCapabilities, SandboxConfig};

use crate::adapter::{QueryOutput, SessionConnection};
use crate::error::{ExecutionError, SandboxError};

/// Pseudo parameter name under which the session role is tracked.
const ROLE_KEY: &str = "role";

/// Head start for a server-side statement timeout over the wall-clock guard,
/// so the server cancels first and the connection stays usable.
const NATIVE_TIMEOUT_GRACE: Duration = Duration::from_millis(200);

/// Cleanup bookkeeping for one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SandboxResult {
    pub committed: bool,
    pub rolled_back: bool,
    pub reset_role_attempted: bool,
    pub reset_all_attempted: bool,
    /// Redacted `<STEP>:<REASON_CODE>` entries for absorbed failures.
    pub reset_errors: Vec<String>,
    /// Names of parameters that differ from the baseline.
    pub drift: Vec<String>,
    pub state_clean: bool,
    /// The connection was closed instead of being returned for reuse.
    pub discarded: bool,
}

/// What the sandbox produced: the rows or the error, plus the bookkeeping.
#[derive(Debug)]
pub struct SandboxOutcome {
    pub result: Result<QueryOutput, SandboxError>,
    pub report: SandboxResult,
}

/// Scoped wrapper around a single execution.
#[derive(Debug, Clone)]
pub struct ExecutionSandbox {
    read_only: bool,
    native_timeout: bool,
    session_reset: bool,
    strict: bool,
    tracked_parameters: Vec<String>,
}

impl ExecutionSandbox {
    pub fn new(config: &SandboxConfig, capabilities: &ProviderCapabilities) -> Self {
        Self {
            read_only: config.read_only && capabilities.read_only_transactions,
            native_timeout: capabilities.cancellation,
            session_reset: capabilities.session_reset,
            strict: config.strict_session_check,
            tracked_parameters: config.tracked_parameters.clone(),
        }
    }

    /// Promote drift to a fatal error.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Run one statement inside a transaction and clean up after it.
    pub async fn run(
        &self,
        conn: &mut dyn SessionConnection,
        sql: &str,
        params: &[Value],
        include_columns: bool,
        timeout: Duration,
    ) -> SandboxOutcome {
        let mut report = SandboxResult::default();
        let result = self
            .run_in_transaction(conn, sql, params, include_columns, timeout, &mut report)
            .await;

        if !report.state_clean {
            conn.discard();
            report.discarded = true;
        }
        SandboxOutcome { result, report }
    }

    async fn run_in_transaction(
        &self,
        conn: &mut dyn SessionConnection,
        sql: &str,
        params: &[Value],
        include_columns: bool,
        timeout: Duration,
        report: &mut SandboxResult,
    ) -> Result<QueryOutput, SandboxError> {
        let baseline = self.capture(conn).await?;

        if let Err(err) = conn.begin(self.read_only).await {
            // No transaction is open, but the session may still need a reset.
            self.reset(conn, report).await;
            self.check_drift(conn, &baseline, report).await;
            return Err(err.into());
        }

        let executed = self.execute(conn, sql, params, include_columns, timeout).await;

        match &executed {
            Ok(_) => match conn.commit().await {
                Ok(()) => report.committed = true,
                Err(err) => {
                    report.reset_errors.push(format!("COMMIT:{}", err.reason_code()));
                    self.rollback(conn, report).await;
                }
            },
            Err(_) => self.rollback(conn, report).await,
        }

        self.reset(conn, report).await;
        self.check_drift(conn, &baseline, report).await;

        report.state_clean = (report.committed || report.rolled_back)
            && report.reset_errors.is_empty()
            && report.drift.is_empty();

        match executed {
            Err(err) => Err(SandboxError::Execution(err)),
            Ok(_) if !report.committed => Err(SandboxError::Execution(ExecutionError::Provider {
                code: "COMMIT_FAILED".to_string(),
            })),
            Ok(_) if self.strict && !report.drift.is_empty() => Err(SandboxError::SessionDrift {
                parameters: report.drift.clone(),
            }),
            Ok(output) => Ok(output),
        }
    }

    async fn execute(
        &self,
        conn: &mut dyn SessionConnection,
        sql: &str,
        params: &[Value],
        include_columns: bool,
        timeout: Duration,
    ) -> Result<QueryOutput, ExecutionError> {
        let mut guard = timeout;
        if self.native_timeout {
            conn.set_statement_timeout(timeout).await?;
            guard += NATIVE_TIMEOUT_GRACE;
        }
        match tokio::time::timeout(guard, conn.execute(sql, params, include_columns)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout),
        }
    }

    async fn rollback(&self, conn: &mut dyn SessionConnection, report: &mut SandboxResult) {
        match conn.rollback().await {
            Ok(()) => report.rolled_back = true,
            Err(err) => {
                tracing::warn!(reason = err.reason_code(), "rollback failed");
                report.reset_errors.push(format!("ROLLBACK:{}", err.reason_code()));
            }
        }
    }

    async fn reset(&self, conn: &mut dyn SessionConnection, report: &mut SandboxResult) {
        if !self.session_reset {
            return;
        }

        report.reset_role_attempted = true;
        if let Err(err) = conn.reset_role().await {
            tracing::warn!(reason = err.reason_code(), "RESET ROLE failed");
            report.reset_errors.push(format!("RESET_ROLE:{}", err.reason_code()));
        }

        report.reset_all_attempted = true;
        if let Err(err) = conn.reset_all().await {
            tracing::warn!(reason = err.reason_code(), "RESET ALL failed");
            report.reset_errors.push(format!("RESET_ALL:{}", err.reason_code()));
        }
    }

    async fn capture(
        &self,
        conn: &mut dyn SessionConnection,
    ) -> Result<BTreeMap<String, Option<String>>, ExecutionError> {
        let mut state = BTreeMap::new();
        state.insert(ROLE_KEY.to_string(), Some(conn.current_role().await?));
        for name in &self.tracked_parameters {
            state.insert(name.clone(), conn.read_parameter(name).await?);
        }
        Ok(state)
    }

    async fn check_drift(
        &self,
        conn: &mut dyn SessionConnection,
        baseline: &BTreeMap<String, Option<String>>,
        report: &mut SandboxResult,
    ) {
        match self.capture(conn).await {
            Ok(after) => {
                report.drift = baseline
                    .iter()
                    .filter(|(name, value)| after.get(*name) != Some(*value))
                    .map(|(name, _)| name.clone())
                    .collect();
                if !report.drift.is_empty() {
                    tracing::warn!(parameters = ?report.drift, "session state drift detected");
                }
            }
            Err(err) => {
                report.reset_errors.push(format!("BASELINE:{}", err.reason_code()));
            }
        }
    }
}

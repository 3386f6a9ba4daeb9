//! Tenant enforcement decisions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_core::ErrorInfo;

use crate::error::RlsError;
use crate::shape::TenantSqlShape;

/// How tenant isolation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Per-call predicate injection with bound parameters.
    SqlRewrite,
    /// Isolation delegated to a session variable read by database policies.
    SessionVariable,
    /// No enforcement took place.
    Unsupported,
}

impl EnforcementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementMode::SqlRewrite => "sql_rewrite",
            EnforcementMode::SessionVariable => "session_variable",
            EnforcementMode::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementOutcome {
    Applied,
    Skipped,
    Rejected,
}

/// Outcome of evaluating a statement against the tenant policy.
///
/// A `Rejected` decision carries the input SQL unchanged in `rewritten_sql`
/// and must not be executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantEnforcementDecision {
    pub mode: EnforcementMode,
    pub outcome: EnforcementOutcome,
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    pub shape: TenantSqlShape,
    pub rewritten_sql: String,
    /// Caller parameters followed by the tenant parameters, in placeholder order.
    pub bound_params: Vec<Value>,
    pub tables_scoped: Vec<String>,
    pub tables_global: Vec<String>,
    pub envelope_metadata: BTreeMap<String, Value>,
    pub telemetry_attributes: BTreeMap<String, Value>,
    #[serde(skip)]
    error: Option<RlsError>,
}

impl TenantEnforcementDecision {
    pub(crate) fn applied(
        shape: TenantSqlShape,
        rewritten_sql: String,
        bound_params: Vec<Value>,
        tables_scoped: Vec<String>,
        tables_global: Vec<String>,
    ) -> Self {
        Self {
            mode: EnforcementMode::SqlRewrite,
            outcome: EnforcementOutcome::Applied,
            applied: true,
            reason_code: None,
            shape,
            rewritten_sql,
            bound_params,
            tables_scoped,
            tables_global,
            envelope_metadata: BTreeMap::new(),
            telemetry_attributes: BTreeMap::new(),
            error: None,
        }
        .with_envelope_metadata()
    }

    pub(crate) fn skipped(sql: &str, params: &[Value], reason: &str) -> Self {
        Self {
            mode: EnforcementMode::Unsupported,
            outcome: EnforcementOutcome::Skipped,
            applied: false,
            reason_code: Some(reason.to_string()),
            shape: TenantSqlShape::Unsupported,
            rewritten_sql: sql.to_string(),
            bound_params: params.to_vec(),
            tables_scoped: Vec::new(),
            tables_global: Vec::new(),
            envelope_metadata: BTreeMap::new(),
            telemetry_attributes: BTreeMap::new(),
            error: None,
        }
        .with_envelope_metadata()
    }

    pub(crate) fn rejected(
        sql: &str,
        params: &[Value],
        shape: TenantSqlShape,
        error: RlsError,
    ) -> Self {
        Self {
            mode: EnforcementMode::SqlRewrite,
            outcome: EnforcementOutcome::Rejected,
            applied: false,
            reason_code: Some(error.reason_code()),
            shape,
            rewritten_sql: sql.to_string(),
            bound_params: params.to_vec(),
            tables_scoped: Vec::new(),
            tables_global: Vec::new(),
            envelope_metadata: BTreeMap::new(),
            telemetry_attributes: BTreeMap::new(),
            error: Some(error),
        }
        .with_envelope_metadata()
    }

    fn with_envelope_metadata(mut self) -> Self {
        self.envelope_metadata
            .insert("tenant_enforcement_applied".into(), Value::Bool(self.applied));
        self.envelope_metadata.insert(
            "tenant_enforcement_mode".into(),
            Value::String(self.mode.as_str().to_string()),
        );
        self.envelope_metadata.insert(
            "tenant_shape".into(),
            Value::String(self.shape.as_str().to_string()),
        );
        self
    }

    /// Whether the caller may execute `rewritten_sql`.
    pub fn is_executable(&self) -> bool {
        self.outcome != EnforcementOutcome::Rejected
    }

    /// The rejection cause, if any.
    pub fn error(&self) -> Option<&RlsError> {
        self.error.as_ref()
    }

    /// Wire error for a rejected decision.
    pub fn error_info(&self) -> Option<ErrorInfo> {
        self.error.as_ref().map(RlsError::to_error_info)
    }
}

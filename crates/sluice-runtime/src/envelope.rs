//! Request and response shapes of the gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_core::{Capability, ErrorInfo};
use sluice_rls::EnforcementMode;

use crate::adapter::ColumnInfo;
use crate::containment::PartialReason;
use crate::negotiator::FallbackMode;

/// One query on behalf of one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub bind_params: Vec<Value>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub include_columns: bool,
    #[serde(default = "default_true")]
    pub enforce_row_cap: bool,
    #[serde(default = "default_true")]
    pub enforce_byte_cap: bool,
    #[serde(default)]
    pub strict_session_check: bool,
    /// Per-call execution timeout, capped by the gateway deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            tenant_id: Some(tenant_id.into()),
            bind_params: Vec::new(),
            page_token: None,
            page_size: None,
            include_columns: false,
            enforce_row_cap: true,
            enforce_byte_cap: true,
            strict_session_check: false,
            timeout_ms: None,
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.bind_params = params;
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }

    pub fn with_columns(mut self) -> Self {
        self.include_columns = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub rows_returned: usize,
    pub is_truncated: bool,
    pub partial_reason: Option<PartialReason>,
    pub next_page_token: Option<String>,
    pub cap_detected: Option<Capability>,
    pub cap_mitigation_applied: bool,
    pub cap_mitigation_mode: Option<FallbackMode>,
    pub tenant_enforcement_applied: bool,
    pub tenant_enforcement_mode: EnforcementMode,
}

impl Default for EnvelopeMetadata {
    fn default() -> Self {
        Self {
            rows_returned: 0,
            is_truncated: false,
            partial_reason: None,
            next_page_token: None,
            cap_detected: None,
            cap_mitigation_applied: false,
            cap_mitigation_mode: None,
            tenant_enforcement_applied: false,
            tenant_enforcement_mode: EnforcementMode::Unsupported,
        }
    }
}

/// What the caller gets back: rows or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub rows: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ColumnInfo>>,
    pub metadata: EnvelopeMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ResultEnvelope {
    pub fn failure(error: ErrorInfo, metadata: EnvelopeMetadata) -> Self {
        Self {
            rows: Vec::new(),
            columns: None,
            metadata,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

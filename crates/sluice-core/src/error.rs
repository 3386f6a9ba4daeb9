//! Wire-level error vocabulary.
//!
//! Every error that leaves the gateway is reduced to an [`ErrorInfo`]: a
//! closed [`ErrorCategory`], a stable machine-readable code and a redacted
//! message. Messages never carry raw SQL, bound values, cursor payloads or
//! secrets.

use serde::{Deserialize, Serialize};

/// Closed set of error categories returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Policy violations and malformed requests. Never retried.
    InvalidRequest,
    /// The provider lacks a capability the request depends on.
    UnsupportedCapability,
    /// The gateway deadline or the provider timeout fired.
    Timeout,
    /// Tenant isolation cannot be guaranteed for this statement shape.
    TenantEnforcementUnsupported,
    /// Anything else, including provider and transport failures.
    InternalError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::UnsupportedCapability => "unsupported_capability",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::TenantEnforcementUnsupported => "tenant_enforcement_unsupported",
            ErrorCategory::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Redacted error payload carried by the result envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub category: ErrorCategory,
    /// Stable reason code (e.g. `BLOCKED_STATEMENT:DROP`, `SIGNATURE_INVALID`).
    pub code: String,
    /// Human-readable, redacted message.
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl ErrorInfo {
    /// Create a non-retryable error.
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable: false,
            retry_after_seconds: None,
        }
    }

    /// Shorthand for an `invalid_request` policy error.
    pub fn invalid_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidRequest, code, message)
    }

    /// Shorthand for an `internal_error`.
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InternalError, code, message)
    }

    /// Mark the error as retryable by the caller.
    pub fn retryable(mut self, retry_after_seconds: Option<u64>) -> Self {
        self.retryable = true;
        self.retry_after_seconds = retry_after_seconds;
        self
    }
}

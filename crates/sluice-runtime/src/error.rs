//! Error types for the execution path.
//!
//! Every error here renders a redacted message and a stable reason code.
//! None of them carries SQL text, bound values, cursor payloads or secrets.

use sluice_core::{Capability, ErrorCategory, ErrorInfo};
use sluice_rls::RlsError;
use thiserror::Error;

/// Failures reported by a physical execution, classified per provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("statement exceeded its execution timeout")]
    Timeout,

    #[error("connection to the database failed")]
    Connectivity,

    #[error("database reported a deadlock")]
    Deadlock,

    #[error("database reported a serialization failure")]
    Serialization,

    /// Any other provider error. `code` is the provider's own error code
    /// (e.g. a SQLSTATE), never its message.
    #[error("database error {code}")]
    Provider { code: String },
}

impl ExecutionError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            ExecutionError::Timeout => "EXECUTION_TIMEOUT",
            ExecutionError::Connectivity => "CONNECTIVITY",
            ExecutionError::Deadlock => "DEADLOCK",
            ExecutionError::Serialization => "SERIALIZATION_FAILURE",
            ExecutionError::Provider { .. } => "PROVIDER_ERROR",
        }
    }

    /// Whether the caller may retry. The gateway itself never retries.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExecutionError::Provider { .. })
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            ExecutionError::Deadlock | ExecutionError::Serialization => Some(1),
            ExecutionError::Connectivity => Some(2),
            ExecutionError::Timeout | ExecutionError::Provider { .. } => None,
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        let category = match self {
            ExecutionError::Timeout => ErrorCategory::Timeout,
            _ => ErrorCategory::InternalError,
        };
        let info = ErrorInfo::new(category, self.reason_code(), self.to_string());
        if self.is_retryable() {
            info.retryable(self.retry_after_seconds())
        } else {
            info
        }
    }
}

/// Failures of the sandboxed execution as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Session parameters differed from the baseline after cleanup.
    #[error("session state drifted after execution ({} parameters)", parameters.len())]
    SessionDrift { parameters: Vec<String> },
}

impl SandboxError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            SandboxError::Execution(err) => err.reason_code(),
            SandboxError::SessionDrift { .. } => "SESSION_DRIFT",
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            SandboxError::Execution(err) => err.to_error_info(),
            SandboxError::SessionDrift { .. } => {
                ErrorInfo::internal(self.reason_code(), self.to_string())
            }
        }
    }
}

/// Request-level policy violations. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("statement is not permitted")]
    Blocked { reason: String },

    #[error("tenant isolation rejected the statement: {0}")]
    TenantEnforcement(RlsError),

    /// Strict resource enforcement was requested but the provider cannot
    /// guarantee it.
    #[error("provider cannot guarantee {capability} enforcement")]
    ResourceCapUnsupported { capability: Capability },

    /// The request depends on a capability the provider lacks and no safe
    /// degradation was applied.
    #[error("provider does not support {capability}")]
    CapabilityUnsupported { capability: Capability },

    #[error("page size must be between 1 and {max}")]
    PageSizeInvalid { max: u64 },
}

impl PolicyError {
    pub fn reason_code(&self) -> String {
        match self {
            PolicyError::Blocked { reason } => reason.clone(),
            PolicyError::TenantEnforcement(err) => err.reason_code(),
            PolicyError::ResourceCapUnsupported { capability } => {
                format!("RESOURCE_CAP_UNSUPPORTED:{}", capability.code())
            }
            PolicyError::CapabilityUnsupported { capability } => {
                format!("CAPABILITY_UNSUPPORTED:{}", capability.code())
            }
            PolicyError::PageSizeInvalid { .. } => "PAGE_SIZE_INVALID".to_string(),
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            PolicyError::TenantEnforcement(err) => err.to_error_info(),
            PolicyError::CapabilityUnsupported { .. } => ErrorInfo::new(
                ErrorCategory::UnsupportedCapability,
                self.reason_code(),
                self.to_string(),
            ),
            _ => ErrorInfo::invalid_request(self.reason_code(), self.to_string()),
        }
    }
}

/// Continuation token failures. Decoding always fails closed with exactly
/// one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("no cursor signing secret is configured")]
    SecretMissing,

    #[error("page token signature is missing or invalid")]
    SignatureInvalid,

    #[error("page token does not match this query")]
    FingerprintMismatch,

    #[error("page token is malformed")]
    Malformed,

    #[error("page token exceeds the maximum length")]
    TooLarge,

    #[error("page token has expired")]
    Expired,

    #[error("page token version is not supported")]
    UnsupportedVersion,
}

impl CursorError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            CursorError::SecretMissing => "SECRET_MISSING",
            CursorError::SignatureInvalid => "SIGNATURE_INVALID",
            CursorError::FingerprintMismatch => "FINGERPRINT_MISMATCH",
            CursorError::Malformed => "TOKEN_MALFORMED",
            CursorError::TooLarge => "TOKEN_TOO_LARGE",
            CursorError::Expired => "TOKEN_EXPIRED",
            CursorError::UnsupportedVersion => "UNSUPPORTED_VERSION",
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            CursorError::SecretMissing => ErrorInfo::internal(self.reason_code(), self.to_string()),
            _ => ErrorInfo::invalid_request(self.reason_code(), self.to_string()),
        }
    }
}

/// Anything that stops the gateway from producing rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("internal gateway error")]
    Internal,
}

impl From<ExecutionError> for GatewayError {
    fn from(err: ExecutionError) -> Self {
        GatewayError::Sandbox(SandboxError::Execution(err))
    }
}

impl GatewayError {
    pub fn reason_code(&self) -> String {
        match self {
            GatewayError::Policy(err) => err.reason_code(),
            GatewayError::Cursor(err) => err.reason_code().to_string(),
            GatewayError::Sandbox(err) => err.reason_code().to_string(),
            GatewayError::Internal => "GATEWAY_INTERNAL".to_string(),
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            GatewayError::Policy(err) => err.to_error_info(),
            GatewayError::Cursor(err) => err.to_error_info(),
            GatewayError::Sandbox(err) => err.to_error_info(),
            GatewayError::Internal => ErrorInfo::internal(self.reason_code(), self.to_string()),
        }
    }
}

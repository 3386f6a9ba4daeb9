//! Error types for the RLS crate.
//!
//! Messages are fixed strings or counters. They never interpolate the
//! statement text, identifiers from it, or tenant values.

use sluice_core::{ErrorCategory, ErrorInfo};
use thiserror::Error;

/// Errors that can occur while analysing or rewriting a statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RlsError {
    /// SQL parsing failed. The parser message is dropped since it quotes input.
    #[error("failed to parse SQL")]
    ParseError,

    /// The statement shape is outside the set that can be tenant-scoped.
    #[error("statement shape cannot be tenant-scoped ({reason})")]
    UnsupportedShape { reason: &'static str },

    /// Statement blocked by the statement policy.
    #[error("statement blocked by policy ({reason})")]
    Blocked { reason: String },

    /// Tenant value required but not provided.
    #[error("tenant id required but not provided")]
    MissingTenantValue,

    /// Tenant value does not match the configured tenant id type.
    #[error("tenant id is not a valid {expected}")]
    InvalidTenantValue { expected: &'static str },

    /// Query touches system catalogs.
    #[error("system catalogs cannot be queried")]
    SystemCatalog,

    /// Referenced table is absent from the schema snapshot.
    #[error("referenced table is not present in the schema snapshot")]
    UnknownTable,

    /// Reference matches more than one table, or its match depends on
    /// server identifier settings.
    #[error("table reference does not resolve to exactly one table")]
    AmbiguousRelation,

    /// Referenced table lacks its tenant column and is not global.
    #[error("referenced table has no tenant column and is not global")]
    TenantColumnMissing,

    /// No schema snapshot is loaded.
    #[error("schema snapshot unavailable")]
    SchemaUnavailable,

    #[error("statement references {count} tables, limit is {limit}")]
    TooManyTables { count: usize, limit: usize },

    #[error("rewrite would add {count} parameters, limit is {limit}")]
    TooManyParams { count: usize, limit: usize },

    #[error("statement exceeds {limit} AST nodes")]
    AstTooLarge { limit: usize },

    /// Rewrite exceeded its hard wall-clock budget.
    #[error("rewrite exceeded its time budget")]
    RewriteTimeout,

    /// Placeholders in the statement conflict with the provider param style.
    #[error("placeholder style conflicts with provider parameter style")]
    ParamStyleConflict,

    /// The statement references more placeholders than parameters supplied.
    #[error("statement references parameters that were not supplied")]
    ParamCountMismatch,

    /// Internal error.
    #[error("internal rewrite error")]
    Internal,
}

impl RlsError {
    /// Stable machine-readable reason code.
    pub fn reason_code(&self) -> String {
        match self {
            RlsError::ParseError => "SYNTAX_ERROR".to_string(),
            RlsError::UnsupportedShape { reason } => (*reason).to_string(),
            RlsError::Blocked { reason } => reason.clone(),
            RlsError::MissingTenantValue => "TENANT_ID_MISSING".to_string(),
            RlsError::InvalidTenantValue { .. } => "TENANT_ID_INVALID".to_string(),
            RlsError::SystemCatalog => "SYSTEM_CATALOG".to_string(),
            RlsError::UnknownTable => "UNKNOWN_TABLE".to_string(),
            RlsError::AmbiguousRelation => "AMBIGUOUS_RELATION".to_string(),
            RlsError::TenantColumnMissing => "TENANT_COLUMN_MISSING".to_string(),
            RlsError::SchemaUnavailable => "SCHEMA_UNAVAILABLE".to_string(),
            RlsError::TooManyTables { .. } => "TOO_MANY_TABLES".to_string(),
            RlsError::TooManyParams { .. } => "TOO_MANY_PARAMS".to_string(),
            RlsError::AstTooLarge { .. } => "AST_TOO_LARGE".to_string(),
            RlsError::RewriteTimeout => "REWRITE_TIMEOUT".to_string(),
            RlsError::ParamStyleConflict => "PARAM_STYLE_CONFLICT".to_string(),
            RlsError::ParamCountMismatch => "PARAM_COUNT_MISMATCH".to_string(),
            RlsError::Internal => "REWRITE_INTERNAL".to_string(),
        }
    }

    /// Error category reported to callers.
    pub fn category(&self) -> ErrorCategory {
        match self {
            RlsError::UnsupportedShape { .. } | RlsError::AmbiguousRelation => {
                ErrorCategory::TenantEnforcementUnsupported
            }
            RlsError::Internal => ErrorCategory::InternalError,
            _ => ErrorCategory::InvalidRequest,
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.category(), self.reason_code(), self.to_string())
    }
}

//! Provider capability descriptors.
//!
//! Backends differ in what they can guarantee. Instead of a provider class
//! hierarchy, each backend is described by a plain [`ProviderCapabilities`]
//! value looked up from a static table by [`ProviderKind`], optionally
//! adjusted by configuration overrides. Negotiation logic elsewhere is pure
//! dispatch over these flags.

use serde::{Deserialize, Serialize};

/// Supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Postgres,
    Mysql,
    Sqlite,
    Duckdb,
    Snowflake,
    Bigquery,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Postgres => "postgres",
            ProviderKind::Mysql => "mysql",
            ProviderKind::Sqlite => "sqlite",
            ProviderKind::Duckdb => "duckdb",
            ProviderKind::Snowflake => "snowflake",
            ProviderKind::Bigquery => "bigquery",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placeholder syntax for bound parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamStyle {
    /// Numbered `$1`, `$2`, ...
    Dollar,
    /// Positional `?`.
    QuestionMark,
}

/// A named, provider-specific ability that execution may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Pagination,
    ColumnMetadata,
    Cancellation,
    RowCap,
    ByteCap,
    ReadOnlyTransactions,
    SessionReset,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Pagination => "pagination",
            Capability::ColumnMetadata => "column_metadata",
            Capability::Cancellation => "cancellation",
            Capability::RowCap => "row_cap",
            Capability::ByteCap => "byte_cap",
            Capability::ReadOnlyTransactions => "read_only_transactions",
            Capability::SessionReset => "session_reset",
        }
    }

    /// Upper-case form used inside reason codes.
    pub fn code(&self) -> &'static str {
        match self {
            Capability::Pagination => "PAGINATION",
            Capability::ColumnMetadata => "COLUMN_METADATA",
            Capability::Cancellation => "CANCELLATION",
            Capability::RowCap => "ROW_CAP",
            Capability::ByteCap => "BYTE_CAP",
            Capability::ReadOnlyTransactions => "READ_ONLY_TRANSACTIONS",
            Capability::SessionReset => "SESSION_RESET",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged capability descriptor for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub kind: ProviderKind,
    pub param_style: ParamStyle,
    pub pagination: bool,
    pub column_metadata: bool,
    pub cancellation: bool,
    pub row_cap: bool,
    pub byte_cap: bool,
    pub read_only_transactions: bool,
    pub session_reset: bool,
    /// Set operations must spell out `DISTINCT` or `ALL`.
    pub explicit_set_quantifier: bool,
}

impl ProviderCapabilities {
    /// Static capability table.
    pub fn for_kind(kind: ProviderKind) -> Self {
        use ParamStyle::{Dollar, QuestionMark};

        //  kind                   style         page   cols   cancel row    byte   ro     reset  quant
        let row = match kind {
            ProviderKind::Postgres => (Dollar, true, true, true, true, true, true, true, false),
            ProviderKind::Mysql => (QuestionMark, true, true, true, true, true, true, false, false),
            ProviderKind::Sqlite => (QuestionMark, true, true, false, true, true, false, false, false),
            ProviderKind::Duckdb => (Dollar, true, true, true, true, true, false, false, false),
            ProviderKind::Snowflake => (QuestionMark, true, true, true, true, false, false, false, false),
            ProviderKind::Bigquery => (QuestionMark, false, true, true, true, false, false, false, true),
        };

        Self {
            kind,
            param_style: row.0,
            pagination: row.1,
            column_metadata: row.2,
            cancellation: row.3,
            row_cap: row.4,
            byte_cap: row.5,
            read_only_transactions: row.6,
            session_reset: row.7,
            explicit_set_quantifier: row.8,
        }
    }

    /// Whether the provider supports a capability.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Pagination => self.pagination,
            Capability::ColumnMetadata => self.column_metadata,
            Capability::Cancellation => self.cancellation,
            Capability::RowCap => self.row_cap,
            Capability::ByteCap => self.byte_cap,
            Capability::ReadOnlyTransactions => self.read_only_transactions,
            Capability::SessionReset => self.session_reset,
        }
    }

    /// Apply configuration overrides on top of the static table.
    pub fn with_overrides(mut self, overrides: &CapabilityOverrides) -> Self {
        if let Some(v) = overrides.pagination {
            self.pagination = v;
        }
        if let Some(v) = overrides.column_metadata {
            self.column_metadata = v;
        }
        if let Some(v) = overrides.cancellation {
            self.cancellation = v;
        }
        if let Some(v) = overrides.row_cap {
            self.row_cap = v;
        }
        if let Some(v) = overrides.byte_cap {
            self.byte_cap = v;
        }
        if let Some(v) = overrides.read_only_transactions {
            self.read_only_transactions = v;
        }
        if let Some(v) = overrides.session_reset {
            self.session_reset = v;
        }
        self
    }
}

/// Optional per-capability overrides from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityOverrides {
    #[serde(default)]
    pub pagination: Option<bool>,
    #[serde(default)]
    pub column_metadata: Option<bool>,
    #[serde(default)]
    pub cancellation: Option<bool>,
    #[serde(default)]
    pub row_cap: Option<bool>,
    #[serde(default)]
    pub byte_cap: Option<bool>,
    #[serde(default)]
    pub read_only_transactions: Option<bool>,
    #[serde(default)]
    pub session_reset: Option<bool>,
}

/// Provider section of the gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Backend family.
    #[serde(default)]
    pub kind: ProviderKind,

    /// Capability overrides applied on top of the built-in table.
    #[serde(default)]
    pub overrides: CapabilityOverrides,
}

impl ProviderConfig {
    /// Resolve the effective capability descriptor.
    pub fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::for_kind(self.kind).with_overrides(&self.overrides)
    }
}

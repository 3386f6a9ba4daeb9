//! # sluice-core
//!
//! Types shared across all Sluice crates:
//!
//! - Gateway configuration loaded from YAML (`sluice.yaml`, `tenancy.yaml`)
//! - Tenancy policy (tenant column per table, global tables)
//! - Provider capability descriptors
//! - Schema snapshots with copy-on-write refresh
//! - The closed error vocabulary exposed to callers
//! - Redaction helpers (hashes instead of raw SQL)

// Configuration types shared across all Sluice crates
pub mod config;
pub mod error;
pub mod hash;
pub mod ident;
pub mod schema;

// Re-export commonly used types for convenience
pub use config::{
    Capability, CapabilityConfig, CapabilityOverrides, ConfigError, CursorConfig, FallbackPolicy, GatewayConfig,
    LimitsConfig, ParamStyle, ProviderCapabilities, ProviderConfig, ProviderKind, RewriteConfig,
    SandboxConfig, TableScope, TableTenancyConfig, TenancyConfig, TenantIdConfig, TenantIdType,
};
pub use error::{ErrorCategory, ErrorInfo};
pub use hash::{short_hash, sql_hash, tenant_hash};
pub use ident::{Identifier, IdentifierCase, NameMatch};
pub use schema::{
    ColumnSchema, SchemaSnapshot, SchemaSnapshotLoader, SnapshotStore, TableLookup, TableSchema,
};

//! Tenancy policy table.
//!
//! Every physical table resolves to exactly one [`TableScope`]: global
//! reference data that is never filtered, or scoped by a tenant column.
//! Tables the operator never mentions fall back to `default_column`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::ConfigError;
use crate::ident::{Identifier, IdentifierCase};
use crate::schema::{SchemaSnapshot, TableLookup, TableSchema};

/// How one table participates in tenant isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableScope<'a> {
    Global,
    Scoped { column: &'a str },
}

impl<'a> TableScope<'a> {
    pub fn column(&self) -> Option<&'a str> {
        match self {
            TableScope::Global => None,
            TableScope::Scoped { column } => Some(column),
        }
    }
}

/// Tenant isolation settings.
///
/// Keys in `tables` and entries in `global_tables` are written like table
/// references in SQL, bare (`orders`) or qualified (`public.orders`), with
/// double quotes for exact-case names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    pub tenant_id: TenantIdConfig,
    pub default_column: String,
    pub tables: BTreeMap<String, TableTenancyConfig>,
    pub global_tables: Vec<String>,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            tenant_id: TenantIdConfig::default(),
            default_column: "tenant_id".to_string(),
            tables: BTreeMap::new(),
            global_tables: Vec::new(),
        }
    }
}

/// Type the tenant identifier is coerced to before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TenantIdType {
    Uuid,
    Integer,
    #[default]
    String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TenantIdConfig {
    #[serde(default, rename = "type")]
    pub id_type: TenantIdType,
}

/// Per-table override.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TableTenancyConfig {
    #[serde(alias = "column")]
    pub tenant_column: Option<String>,
    pub global: bool,
}

impl TenancyConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Policy for a table the snapshot has already resolved.
    ///
    /// Configured names are resolved against the same snapshot with the same
    /// identifier rules as a statement, and apply only when they land on
    /// `table`. An entry that is missing or ambiguous applies to nothing, so
    /// the table stays scoped. Qualified keys in `tables` beat bare ones.
    pub fn scope(
        &self,
        table: &TableSchema,
        snapshot: &SchemaSnapshot,
        case: IdentifierCase,
    ) -> TableScope<'_> {
        if self
            .global_tables
            .iter()
            .any(|entry| refers_to(entry, table, snapshot, case))
        {
            return TableScope::Global;
        }

        let mut chosen: Option<(&TableTenancyConfig, bool)> = None;
        for (key, entry) in &self.tables {
            if !refers_to(key, table, snapshot, case) {
                continue;
            }
            let qualified = Identifier::parse_path(key).len() > 1;
            if chosen.is_none_or(|(_, q)| qualified && !q) {
                chosen = Some((entry, qualified));
            }
        }

        match chosen.map(|(entry, _)| entry) {
            Some(entry) if entry.global => TableScope::Global,
            Some(TableTenancyConfig {
                tenant_column: Some(column),
                ..
            }) => TableScope::Scoped { column },
            _ => TableScope::Scoped {
                column: &self.default_column,
            },
        }
    }
}

/// Whether a configured `[schema.]table` entry resolves to `table`.
fn refers_to(entry: &str, table: &TableSchema, snapshot: &SchemaSnapshot, case: IdentifierCase) -> bool {
    let mut parts = Identifier::parse_path(entry);
    let Some(name) = parts.pop() else {
        return false;
    };
    let schema = parts.pop();
    match snapshot.resolve(schema.as_ref(), &name, case) {
        TableLookup::Found(found) => found.schema == table.schema && found.name == table.name,
        TableLookup::Missing | TableLookup::Ambiguous => false,
    }
}

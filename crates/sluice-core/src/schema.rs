//! Schema snapshots.
//!
//! A [`SchemaSnapshot`] is the table→column lookup the tenant rewriter
//! validates against. Snapshots are immutable; a [`SnapshotStore`] swaps in a
//! new `Arc<SchemaSnapshot>` on refresh, and each request clones the `Arc`
//! once so it sees a single consistent version.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::config::ConfigError;
use crate::hash::short_hash;
use crate::ident::{Identifier, IdentifierCase, NameMatch};

/// Schema used for unqualified names when a table exists in several schemas.
const DEFAULT_SCHEMA: &str = "public";

/// A single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            nullable: true,
        }
    }

    pub fn with_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }
}

/// A table and its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns,
        }
    }

    /// Case-insensitive column lookup.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column))
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Outcome of resolving a table reference against a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLookup<'a> {
    Found(&'a TableSchema),
    Missing,
    Ambiguous,
}

/// Point-in-time view of the database schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Free-form version label (e.g. server version or migration id).
    #[serde(default)]
    pub version: Option<String>,
    /// When the snapshot was captured (RFC 3339).
    #[serde(default)]
    pub captured_at: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self {
            version: None,
            captured_at: None,
            tables,
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(ConfigError::from)
    }

    /// Resolve a table reference under the backend's identifier rules.
    ///
    /// A qualified reference must match one table. An unqualified reference
    /// resolves to the only table with that name, or to the one in `public`
    /// when several schemas define it. A name whose meaning depends on server
    /// settings, or that matches more than one table, is ambiguous.
    pub fn resolve(
        &self,
        schema: Option<&Identifier>,
        table: &Identifier,
        case: IdentifierCase,
    ) -> TableLookup<'_> {
        let mut found = Vec::new();
        for candidate in &self.tables {
            let name = case.matches_stored(table, &candidate.name);
            let qualifier = schema.map_or(NameMatch::Same, |s| case.matches_stored(s, &candidate.schema));
            match (name, qualifier) {
                (NameMatch::Different, _) | (_, NameMatch::Different) => continue,
                (NameMatch::Same, NameMatch::Same) => found.push(candidate),
                _ => return TableLookup::Ambiguous,
            }
        }

        match found.as_slice() {
            [] => TableLookup::Missing,
            [only] => TableLookup::Found(only),
            several if schema.is_none() => {
                let mut public = several.iter().filter(|t| t.schema == DEFAULT_SCHEMA);
                match (public.next(), public.next()) {
                    (Some(table), None) => TableLookup::Found(table),
                    _ => TableLookup::Ambiguous,
                }
            }
            _ => TableLookup::Ambiguous,
        }
    }

    /// Stable fingerprint of the table/column structure.
    ///
    /// Independent of table and column order in the source document.
    pub fn fingerprint(&self) -> String {
        let mut entries: Vec<String> = self
            .tables
            .iter()
            .map(|t| {
                let mut cols: Vec<String> =
                    t.columns.iter().map(|c| c.name.to_ascii_lowercase()).collect();
                cols.sort();
                format!("{}:{}", t.qualified_name().to_ascii_lowercase(), cols.join(","))
            })
            .collect();
        entries.sort();
        let parts: Vec<&[u8]> = entries.iter().map(|e| e.as_bytes()).collect();
        short_hash(&parts)
    }
}

/// Source of the current schema snapshot.
///
/// Returning `None` means no snapshot is available; callers fail closed.
pub trait SchemaSnapshotLoader: Send + Sync {
    fn load_snapshot(&self) -> Option<Arc<SchemaSnapshot>>;
}

impl<T: SchemaSnapshotLoader + ?Sized> SchemaSnapshotLoader for Arc<T> {
    fn load_snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        (**self).load_snapshot()
    }
}

/// Copy-on-write holder for the current snapshot.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Option<Arc<SchemaSnapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: SchemaSnapshot) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(snapshot))),
        }
    }

    /// Publish a new snapshot. In-flight readers keep the previous one.
    pub fn replace(&self, snapshot: SchemaSnapshot) {
        let next = Arc::new(snapshot);
        tracing::info!(
            tables = next.tables.len(),
            fingerprint = %next.fingerprint(),
            "schema snapshot replaced"
        );
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(next);
    }

    /// Drop the current snapshot so subsequent rewrites fail closed.
    pub fn clear(&self) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn current(&self) -> Option<Arc<SchemaSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SchemaSnapshotLoader for SnapshotStore {
    fn load_snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        self.current()
    }
}

fn default_nullable() -> bool {
    true
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new(vec![
            TableSchema::new(
                "public",
                "orders",
                vec![ColumnSchema::new("id"), ColumnSchema::new("tenant_id")],
            ),
            TableSchema::new("public", "events", vec![ColumnSchema::new("tenant_id")]),
            TableSchema::new("audit", "events", vec![ColumnSchema::new("id")]),
            TableSchema::new("a", "dup", vec![]),
            TableSchema::new("b", "dup", vec![]),
        ])
    }

    fn pg(snap: &SchemaSnapshot, schema: Option<Identifier>, table: Identifier) -> TableLookup<'_> {
        snap.resolve(schema.as_ref(), &table, IdentifierCase::FoldLower)
    }

    fn found_schema(lookup: TableLookup<'_>) -> Option<&str> {
        match lookup {
            TableLookup::Found(t) => Some(t.schema.as_str()),
            _ => None,
        }
    }

    #[test]
    fn test_unqualified_lookup_follows_folding() {
        let snap = snapshot();
        let TableLookup::Found(orders) = pg(&snap, None, Identifier::bare("ORDERS")) else {
            panic!("unquoted ORDERS folds to orders");
        };
        assert!(orders.has_column("Tenant_Id"));
        assert_eq!(pg(&snap, None, Identifier::quoted("ORDERS")), TableLookup::Missing);
        assert_eq!(pg(&snap, None, Identifier::bare("missing")), TableLookup::Missing);
    }

    #[test]
    fn test_duplicate_names_prefer_public() {
        let snap = snapshot();
        assert_eq!(found_schema(pg(&snap, None, Identifier::bare("events"))), Some("public"));
        assert_eq!(pg(&snap, None, Identifier::bare("dup")), TableLookup::Ambiguous);
        assert_eq!(
            found_schema(pg(&snap, Some(Identifier::bare("audit")), Identifier::bare("events"))),
            Some("audit")
        );
        assert_eq!(
            pg(&snap, Some(Identifier::bare("billing")), Identifier::bare("events")),
            TableLookup::Missing
        );
    }

    #[test]
    fn test_server_defined_case_is_ambiguous() {
        let snap = snapshot();
        let lookup = snap.resolve(None, &Identifier::bare("Orders"), IdentifierCase::ServerDefined);
        assert_eq!(lookup, TableLookup::Ambiguous);
        let lookup = snap.resolve(None, &Identifier::bare("orders"), IdentifierCase::ServerDefined);
        assert_eq!(found_schema(lookup), Some("public"));
    }

    #[test]
    fn test_fingerprint_ignores_order() {
        let a = snapshot();
        let mut b = snapshot();
        b.tables.reverse();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.tables[0].columns.push(ColumnSchema::new("extra"));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_store_swaps_without_disturbing_readers() {
        let store = SnapshotStore::new();
        assert!(store.load_snapshot().is_none());

        store.replace(snapshot());
        let held = store.load_snapshot().unwrap();
        store.replace(SchemaSnapshot::default());

        assert_eq!(held.tables.len(), 5);
        assert_eq!(store.load_snapshot().unwrap().tables.len(), 0);

        store.clear();
        assert!(store.load_snapshot().is_none());
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"version":"16","tables":[{"name":"orders","columns":[{"name":"tenant_id","data_type":"integer"}]}]}"#;
        let snap = SchemaSnapshot::from_json(json).unwrap();
        assert_eq!(snap.tables[0].schema, "public");
        assert_eq!(snap.tables[0].columns[0].data_type.as_deref(), Some("integer"));
    }
}

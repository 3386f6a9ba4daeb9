//! CLI command implementations for Sluice.

pub mod classify;
pub mod cursor;
pub mod explain;
pub mod query;
pub mod snapshot;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use sluice_core::{GatewayConfig, SchemaSnapshot, SnapshotStore};

/// Load the gateway configuration, or defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    match path {
        Some(path) => GatewayConfig::load_with_context(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(GatewayConfig::default()),
    }
}

/// Snapshot store seeded from `snapshot_file`, empty when none is configured.
///
/// An empty store makes every tenant rewrite fail closed with
/// `SCHEMA_UNAVAILABLE`.
pub fn snapshot_store(config: &GatewayConfig) -> Result<Arc<SnapshotStore>> {
    let Some(path) = &config.snapshot_file else {
        tracing::warn!("no schema snapshot configured");
        return Ok(Arc::new(SnapshotStore::new()));
    };
    let snapshot = SchemaSnapshot::from_file(path)
        .with_context(|| format!("failed to load schema snapshot from {}", path.display()))?;
    Ok(Arc::new(SnapshotStore::with_snapshot(snapshot)))
}

/// Parse `--params` as a JSON array.
pub fn parse_params(raw: Option<&str>) -> Result<Vec<Value>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(raw).context("--params must be valid JSON")? {
        Value::Array(values) => Ok(values),
        _ => anyhow::bail!("--params must be a JSON array"),
    }
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

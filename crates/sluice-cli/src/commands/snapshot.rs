//! `sluice snapshot` - introspect the database into a schema snapshot.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sluice_adapter_pg::{PgConnector, PgConnectorOptions, introspect_snapshot};

pub async fn run(database_url: &str, out: Option<&Path>) -> Result<()> {
    let connector = PgConnector::connect(database_url, PgConnectorOptions::default()).await?;
    let snapshot = introspect_snapshot(connector.pool()).await?;

    match out {
        Some(path) => {
            let json = serde_json::to_string_pretty(&snapshot)?;
            fs::write(path, json)
                .with_context(|| format!("failed to write snapshot to {}", path.display()))?;
            tracing::info!(
                path = %path.display(),
                tables = snapshot.tables.len(),
                "snapshot written"
            );
            Ok(())
        }
        None => super::print_json(&snapshot),
    }
}

//! `sluice query` - run one statement through the gateway against Postgres.
//!
//! Without a configured snapshot the schema is introspected from the same
//! database before the request runs.

use std::sync::Arc;

use anyhow::Result;
use sluice_adapter_pg::{PgConnector, PgConnectorOptions, introspect_snapshot};
use sluice_core::{GatewayConfig, SchemaSnapshotLoader, SnapshotStore};
use sluice_runtime::{QueryGateway, QueryRequest};

#[derive(Debug)]
pub struct QueryArgs {
    pub tenant: String,
    pub params: Option<String>,
    pub page_token: Option<String>,
    pub page_size: Option<u64>,
    pub columns: bool,
    pub timeout_ms: Option<u64>,
    pub sql: String,
}

impl QueryArgs {
    fn into_request(self) -> Result<QueryRequest> {
        let mut request =
            QueryRequest::new(self.sql, self.tenant).with_params(super::parse_params(self.params.as_deref())?);
        request.page_token = self.page_token;
        request.page_size = self.page_size;
        request.include_columns = self.columns;
        request.timeout_ms = self.timeout_ms;
        Ok(request)
    }
}

pub async fn run(config: &GatewayConfig, database_url: &str, args: QueryArgs) -> Result<()> {
    let request = args.into_request()?;
    let connector = PgConnector::connect(database_url, PgConnectorOptions::default()).await?;

    let snapshots: Arc<dyn SchemaSnapshotLoader> = if config.snapshot_file.is_some() {
        super::snapshot_store(config)?
    } else {
        let snapshot = introspect_snapshot(connector.pool()).await?;
        Arc::new(SnapshotStore::with_snapshot(snapshot))
    };

    let gateway = QueryGateway::new(config, snapshots, Arc::new(connector));
    let envelope = gateway.execute(request).await;
    super::print_json(&envelope)?;
    if envelope.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

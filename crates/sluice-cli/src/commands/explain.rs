//! `sluice explain` - preview the tenant-scoped rewrite without executing it.

use anyhow::Result;
use serde_json::json;
use sluice_core::{GatewayConfig, SchemaSnapshotLoader};
use sluice_rls::TenantPolicy;

pub fn run(config: &GatewayConfig, tenant: &str, params: Option<&str>, sql: &str) -> Result<()> {
    let params = super::parse_params(params)?;
    let snapshots: std::sync::Arc<dyn SchemaSnapshotLoader> = super::snapshot_store(config)?;
    let policy = TenantPolicy::new(
        config.provider.capabilities(),
        config.tenancy.clone(),
        config.rewrite.clone(),
        snapshots,
    );

    let classification = policy.classifier().classify(sql);
    if classification.blocked {
        super::print_json(&json!({
            "classification": classification,
            "error": classification.error_info(),
        }))?;
        std::process::exit(1);
    }

    let decision = policy.evaluate(sql, Some(tenant), &params);
    super::print_json(&json!({
        "classification": classification,
        "decision": decision,
        "error": decision.error_info(),
    }))?;
    if !decision.is_executable() {
        std::process::exit(1);
    }
    Ok(())
}

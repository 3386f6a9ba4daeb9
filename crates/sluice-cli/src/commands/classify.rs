//! `sluice classify` - statement policy verdict for one statement.

use anyhow::Result;
use sluice_core::GatewayConfig;
use sluice_rls::StatementClassifier;

pub fn run(config: &GatewayConfig, sql: &str) -> Result<()> {
    let classifier = StatementClassifier::new(&config.provider.capabilities());
    let classification = classifier.classify(sql);
    super::print_json(&serde_json::json!({
        "classification": classification,
        "error": classification.error_info(),
    }))?;
    if classification.blocked {
        std::process::exit(1);
    }
    Ok(())
}

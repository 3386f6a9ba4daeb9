//! `sluice cursor inspect` - verify a continuation token and show its metadata.
//!
//! The position itself is never printed.

use anyhow::Result;
use chrono::Utc;
use sluice_core::GatewayConfig;
use sluice_runtime::{CursorCodec, GatewayError, resolve_secret};

pub fn inspect(config: &GatewayConfig, token: &str) -> Result<()> {
    let codec = CursorCodec::from_config(&config.cursor);
    let inspected = resolve_secret(&config.cursor)
        .and_then(|key| codec.inspect(token, &key, Utc::now()));

    match inspected {
        Ok(inspection) => super::print_json(&inspection),
        Err(err) => {
            super::print_json(&serde_json::json!({
                "error": GatewayError::from(err).to_error_info(),
            }))?;
            std::process::exit(1);
        }
    }
}

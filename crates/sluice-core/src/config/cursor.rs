//! Pagination cursor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Signing and validity settings for continuation tokens.
///
/// A signing secret is required. Unsigned tokens are only produced when
/// `allow_insecure_dev` is set explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    /// Inline signing secret. Prefer `secret_env` outside of tests.
    #[serde(default)]
    pub secret: Option<String>,

    /// Environment variable holding the signing secret.
    #[serde(default = "default_secret_env")]
    pub secret_env: Option<String>,

    /// Allow unsigned tokens when no secret is configured.
    #[serde(default)]
    pub allow_insecure_dev: bool,

    /// Token lifetime in seconds.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Tokens longer than this are rejected before parsing.
    #[serde(default = "default_max_token_length")]
    pub max_token_length: usize,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            secret: None,
            secret_env: default_secret_env(),
            allow_insecure_dev: false,
            ttl_seconds: default_ttl_seconds(),
            max_token_length: default_max_token_length(),
        }
    }
}

impl CursorConfig {
    /// Resolve the configured secret: inline value first, then the environment.
    /// Empty values count as missing.
    pub fn configured_secret(&self) -> Option<String> {
        if let Some(secret) = self.secret.as_ref().filter(|s| !s.is_empty()) {
            return Some(secret.clone());
        }
        self.secret_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|s| !s.is_empty())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

fn default_secret_env() -> Option<String> {
    Some("SLUICE_CURSOR_SECRET".to_string())
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_max_token_length() -> usize {
    2048
}

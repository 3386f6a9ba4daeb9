//! Tenant rewrite budgets.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceilings and time budget for the tenant rewrite step.
///
/// Oversized or adversarial statements are rejected before any rewrite
/// completes and before a connection is acquired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteConfig {
    /// Reject statements without a tenant id instead of passing them through.
    #[serde(default = "default_true")]
    pub strict: bool,

    /// Maximum number of physical table references that may be rewritten.
    #[serde(default = "default_max_targets")]
    pub max_targets: usize,

    /// Maximum number of tenant parameters the rewrite may produce.
    #[serde(default = "default_max_params")]
    pub max_params: usize,

    /// Maximum AST node count accepted for analysis.
    #[serde(default = "default_max_ast_nodes")]
    pub max_ast_nodes: usize,

    /// Rewrites slower than this are recorded as a warning.
    #[serde(default = "default_warn_after_ms")]
    pub warn_after_ms: u64,

    /// Rewrites slower than this are aborted.
    #[serde(default = "default_hard_timeout_ms")]
    pub hard_timeout_ms: u64,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            strict: true,
            max_targets: default_max_targets(),
            max_params: default_max_params(),
            max_ast_nodes: default_max_ast_nodes(),
            warn_after_ms: default_warn_after_ms(),
            hard_timeout_ms: default_hard_timeout_ms(),
        }
    }
}

impl RewriteConfig {
    pub fn warn_after(&self) -> Duration {
        Duration::from_millis(self.warn_after_ms)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_targets() -> usize {
    32
}

fn default_max_params() -> usize {
    32
}

fn default_max_ast_nodes() -> usize {
    5000
}

fn default_warn_after_ms() -> u64 {
    50
}

fn default_hard_timeout_ms() -> u64 {
    250
}

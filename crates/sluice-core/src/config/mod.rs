//! Configuration types for the Sluice query gateway.
//!
//! Configuration is loaded from YAML (`sluice.yaml`, optionally with a
//! separate `tenancy.yaml`) into a single [`GatewayConfig`].
//!
//! # Configuration Files
//!
//! - **sluice.yaml**: provider, rewrite budgets, cursor signing, capability
//!   fallback policy, result limits and sandbox settings
//! - **tenancy.yaml**: tenant columns per table and global tables

pub mod cursor;
pub mod provider;
pub mod rewrite;
pub mod tenancy;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use cursor::CursorConfig;
pub use provider::{
    Capability, CapabilityOverrides, ParamStyle, ProviderCapabilities, ProviderConfig,
    ProviderKind,
};
pub use rewrite::RewriteConfig;
pub use tenancy::{TableScope, TableTenancyConfig, TenancyConfig, TenantIdConfig, TenantIdType};

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// Backend family and capability overrides.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Tenancy configuration (inline or from file).
    #[serde(default)]
    pub tenancy: TenancyConfig,

    /// Path to tenancy configuration file (alternative to inline).
    #[serde(default)]
    pub tenancy_file: Option<PathBuf>,

    /// Path to a schema snapshot JSON file.
    #[serde(default)]
    pub snapshot_file: Option<PathBuf>,

    /// Tenant rewrite budgets.
    #[serde(default)]
    pub rewrite: RewriteConfig,

    /// Continuation token signing.
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Capability fallback behaviour.
    #[serde(default)]
    pub capabilities: CapabilityConfig,

    /// Result-set ceilings.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Execution sandbox settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// What to do when a provider lacks a capability the request relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Report the gap, change nothing.
    Off,
    /// Report the gap together with the mitigation that would apply.
    #[default]
    Suggest,
    /// Apply the safe degradation.
    Apply,
}

/// Capability negotiation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapabilityConfig {
    #[serde(default)]
    pub fallback_policy: FallbackPolicy,
}

/// Result-set ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum rows in one envelope when row capping is enforced.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    /// Maximum serialized envelope size when byte capping is enforced.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Page size used when a paginated request omits one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,

    /// Largest page size a caller may request.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,

    /// Gateway wall-clock deadline for one physical execution.
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            max_bytes: default_max_bytes(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            execution_timeout_ms: default_execution_timeout_ms(),
        }
    }
}

impl LimitsConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}

/// Execution sandbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Promote detected session drift to a fatal error.
    #[serde(default)]
    pub strict_session_check: bool,

    /// Open read-only transactions where the provider supports them.
    #[serde(default = "default_true")]
    pub read_only: bool,

    /// Session parameters captured before and re-read after execution.
    #[serde(default = "default_tracked_parameters")]
    pub tracked_parameters: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            strict_session_check: false,
            read_only: true,
            tracked_parameters: default_tracked_parameters(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_max_rows() -> usize {
    1000
}

/// Room reserved for envelope metadata besides the page token.
pub const ENVELOPE_METADATA_BYTES: usize = 1024;

fn default_max_bytes() -> usize {
    1024 * 1024
}

fn default_page_size() -> u64 {
    100
}

fn default_max_page_size() -> u64 {
    1000
}

fn default_execution_timeout_ms() -> u64 {
    30_000
}

fn default_tracked_parameters() -> Vec<String> {
    vec![
        "search_path".to_string(),
        "statement_timeout".to_string(),
        "default_transaction_read_only".to_string(),
    ]
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration and resolve external references.
    ///
    /// Relative `tenancy_file` and `snapshot_file` paths are resolved against
    /// the directory containing the main configuration file.
    pub fn load_with_context(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::from_file(path)?;

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(tenancy_file) = &config.tenancy_file {
            let tenancy_path = resolve(&base_dir, tenancy_file);
            if !tenancy_path.exists() {
                return Err(ConfigError::Config(format!(
                    "Tenancy file not found: {}",
                    tenancy_path.display()
                )));
            }
            config.tenancy = TenancyConfig::from_file(&tenancy_path)?;
        }

        if let Some(snapshot_file) = &config.snapshot_file {
            config.snapshot_file = Some(resolve(&base_dir, snapshot_file));
        }

        Ok(config)
    }

    /// Reject internally inconsistent settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rewrite.warn_after_ms > self.rewrite.hard_timeout_ms {
            return Err(ConfigError::Config(
                "rewrite.warn_after_ms must not exceed rewrite.hard_timeout_ms".to_string(),
            ));
        }
        if self.limits.default_page_size == 0 || self.limits.max_page_size == 0 {
            return Err(ConfigError::Config("page sizes must be positive".to_string()));
        }
        if self.limits.default_page_size > self.limits.max_page_size {
            return Err(ConfigError::Config(
                "limits.default_page_size must not exceed limits.max_page_size".to_string(),
            ));
        }
        let envelope_floor = self
            .cursor
            .max_token_length
            .saturating_add(ENVELOPE_METADATA_BYTES);
        if self.limits.max_bytes < envelope_floor {
            return Err(ConfigError::Config(format!(
                "limits.max_bytes must be at least {envelope_floor} to hold the result metadata and a page token"
            )));
        }
        if self.tenancy.default_column.trim().is_empty() {
            return Err(ConfigError::Config(
                "tenancy.default_column must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn resolve(base_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        base_dir.join(file)
    }
}

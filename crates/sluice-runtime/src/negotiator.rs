//! Capability negotiation.
//!
//! A request may rely on abilities the backend lacks. Negotiation is a pure
//! function over the capability descriptor and the fallback policy: a
//! supported capability passes through untouched, an unsupported one is
//! disclosed and, under [`FallbackPolicy::Apply`], degraded through a fixed
//! table of safe mitigations. Capabilities without a safe degradation stay
//! unsupported whatever the policy says.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_core::{Capability, FallbackPolicy, ProviderCapabilities};

/// Safe degradation applied when a capability is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    DisableColumnMetadata,
    TerminatePagination,
    ForceLimitedResults,
}

impl FallbackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackMode::DisableColumnMetadata => "disable_column_metadata",
            FallbackMode::TerminatePagination => "terminate_pagination",
            FallbackMode::ForceLimitedResults => "force_limited_results",
        }
    }
}

/// Request options subject to negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiationOptions {
    pub include_columns: bool,
    pub timeout: Option<Duration>,
    pub page_token: Option<String>,
    pub page_size: Option<u64>,
    pub force_result_limit: Option<u64>,
    pub terminate_pagination: bool,
}

impl NegotiationOptions {
    pub fn is_paginated(&self) -> bool {
        self.page_token.is_some() || self.page_size.is_some()
    }
}

/// Outcome of negotiating one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityNegotiationResult {
    pub required_capability: Option<Capability>,
    pub supported: bool,
    pub fallback_applied: bool,
    pub fallback_mode: Option<FallbackMode>,
    pub include_columns: bool,
    pub timeout: Option<Duration>,
    pub page_token: Option<String>,
    pub page_size: Option<u64>,
    pub force_result_limit: Option<u64>,
    pub terminate_pagination: bool,
}

impl CapabilityNegotiationResult {
    fn from_options(
        required: Option<Capability>,
        supported: bool,
        fallback_applied: bool,
        fallback_mode: Option<FallbackMode>,
        options: NegotiationOptions,
    ) -> Self {
        Self {
            required_capability: required,
            supported,
            fallback_applied,
            fallback_mode,
            include_columns: options.include_columns,
            timeout: options.timeout,
            page_token: options.page_token,
            page_size: options.page_size,
            force_result_limit: options.force_result_limit,
            terminate_pagination: options.terminate_pagination,
        }
    }

    /// The adjusted request options.
    pub fn options(&self) -> NegotiationOptions {
        NegotiationOptions {
            include_columns: self.include_columns,
            timeout: self.timeout,
            page_token: self.page_token.clone(),
            page_size: self.page_size,
            force_result_limit: self.force_result_limit,
            terminate_pagination: self.terminate_pagination,
        }
    }

    /// An unsupported capability that no mitigation covered.
    pub fn is_unmitigated_gap(&self) -> bool {
        !self.supported && !self.fallback_applied
    }
}

/// Degradation table: which mode covers a missing capability, given the
/// request. `None` means there is no safe degradation.
fn degradation(capability: Capability, options: &NegotiationOptions) -> Option<FallbackMode> {
    match capability {
        Capability::ColumnMetadata => Some(FallbackMode::DisableColumnMetadata),
        Capability::Pagination if options.page_token.is_some() => {
            Some(FallbackMode::TerminatePagination)
        }
        Capability::Pagination => Some(FallbackMode::ForceLimitedResults),
        Capability::Cancellation
        | Capability::RowCap
        | Capability::ByteCap
        | Capability::ReadOnlyTransactions
        | Capability::SessionReset => None,
    }
}

fn apply(mode: FallbackMode, mut options: NegotiationOptions) -> NegotiationOptions {
    match mode {
        FallbackMode::DisableColumnMetadata => {
            options.include_columns = false;
        }
        FallbackMode::TerminatePagination => {
            options.page_token = None;
            options.page_size = None;
            options.terminate_pagination = true;
        }
        FallbackMode::ForceLimitedResults => {
            options.force_result_limit = options.page_size.take();
            options.page_token = None;
        }
    }
    options
}

/// Negotiate a single capability.
pub fn negotiate(
    capability_required: Capability,
    capability_supported: bool,
    fallback_policy: FallbackPolicy,
    options: NegotiationOptions,
) -> CapabilityNegotiationResult {
    let required = Some(capability_required);
    if capability_supported {
        return CapabilityNegotiationResult::from_options(required, true, false, None, options);
    }

    let mode = degradation(capability_required, &options);
    match (fallback_policy, mode) {
        (FallbackPolicy::Apply, Some(mode)) => {
            tracing::info!(
                capability = capability_required.as_str(),
                mode = mode.as_str(),
                "capability fallback applied"
            );
            let adjusted = apply(mode, options);
            CapabilityNegotiationResult::from_options(required, false, true, Some(mode), adjusted)
        }
        (FallbackPolicy::Suggest, mode) => {
            tracing::warn!(
                capability = capability_required.as_str(),
                suggested = mode.map(|m| m.as_str()),
                "provider capability gap"
            );
            CapabilityNegotiationResult::from_options(required, false, false, mode, options)
        }
        _ => {
            tracing::warn!(capability = capability_required.as_str(), "provider capability gap");
            CapabilityNegotiationResult::from_options(required, false, false, None, options)
        }
    }
}

/// Combined negotiation over everything one request relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestNegotiation {
    pub options: NegotiationOptions,
    /// The first capability found missing, with how it was handled.
    pub gap: Option<CapabilityNegotiationResult>,
}

impl RequestNegotiation {
    pub fn cap_detected(&self) -> Option<Capability> {
        self.gap.as_ref().and_then(|g| g.required_capability)
    }

    pub fn mitigation_applied(&self) -> bool {
        self.gap.as_ref().is_some_and(|g| g.fallback_applied)
    }

    pub fn mitigation_mode(&self) -> Option<FallbackMode> {
        self.gap.as_ref().and_then(|g| g.fallback_mode)
    }
}

/// Negotiate every capability the request needs: column metadata when
/// columns are requested, pagination when a token or page size is given,
/// cancellation when an explicit timeout is set.
pub fn negotiate_request(
    capabilities: &ProviderCapabilities,
    fallback_policy: FallbackPolicy,
    options: NegotiationOptions,
) -> RequestNegotiation {
    let mut options = options;
    let mut gap = None;

    let mut required = Vec::new();
    if options.include_columns {
        required.push(Capability::ColumnMetadata);
    }
    if options.is_paginated() {
        required.push(Capability::Pagination);
    }
    if options.timeout.is_some() {
        required.push(Capability::Cancellation);
    }

    for capability in required {
        let result = negotiate(
            capability,
            capabilities.supports(capability),
            fallback_policy,
            options,
        );
        options = result.options();
        if !result.supported && gap.is_none() {
            gap = Some(result);
        }
    }

    RequestNegotiation { options, gap }
}

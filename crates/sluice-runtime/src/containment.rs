//! Deterministic result-set containment.
//!
//! Rows are emitted in their original order and are never split: a row
//! either fits whole or the result stops before it.

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_core::{Capability, ProviderCapabilities, ProviderKind};

use crate::error::PolicyError;

/// Why a result stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartialReason {
    MaxRows,
    MaxBytes,
}

impl PartialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartialReason::MaxRows => "MAX_ROWS",
            PartialReason::MaxBytes => "MAX_BYTES",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowContainmentResult {
    pub rows: Vec<Value>,
    pub partial: bool,
    pub partial_reason: Option<PartialReason>,
    pub items_returned: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ByteContainmentResult {
    pub rows: Vec<Value>,
    pub partial: bool,
    pub partial_reason: Option<PartialReason>,
    pub items_returned: usize,
    /// Accounted size including the overhead, when enforcement is on.
    pub bytes_returned: Option<usize>,
}

/// Keep at most `max_rows` rows.
pub fn enforce_row_limit(rows: Vec<Value>, max_rows: usize, enforce: bool) -> RowContainmentResult {
    let mut rows = rows;
    let partial = enforce && rows.len() > max_rows;
    if partial {
        rows.truncate(max_rows);
    }
    RowContainmentResult {
        items_returned: rows.len(),
        partial,
        partial_reason: partial.then_some(PartialReason::MaxRows),
        rows,
    }
}

/// Keep the longest prefix of rows whose serialized size, together with
/// `envelope_overhead` and the separators between rows, fits `max_bytes`.
///
/// Overhead above the budget keeps nothing and always reports `MaxBytes`;
/// `bytes_returned` never exceeds `max_bytes`.
pub fn enforce_byte_limit(
    rows: Vec<Value>,
    max_bytes: usize,
    enforce: bool,
    envelope_overhead: usize,
) -> ByteContainmentResult {
    if !enforce {
        return ByteContainmentResult {
            items_returned: rows.len(),
            rows,
            partial: false,
            partial_reason: None,
            bytes_returned: None,
        };
    }

    let available = rows.len();
    if envelope_overhead > max_bytes {
        tracing::warn!(
            envelope_overhead,
            max_bytes,
            "envelope metadata alone exceeds the byte budget"
        );
        return ByteContainmentResult {
            rows: Vec::new(),
            partial: true,
            partial_reason: Some(PartialReason::MaxBytes),
            items_returned: 0,
            bytes_returned: Some(max_bytes),
        };
    }

    let mut used = envelope_overhead;
    let mut kept = Vec::with_capacity(available);
    for row in rows {
        let separator = usize::from(!kept.is_empty());
        let next = used
            .saturating_add(separator)
            .saturating_add(serialized_size(&row));
        if next > max_bytes {
            break;
        }
        used = next;
        kept.push(row);
    }

    let partial = kept.len() < available;
    ByteContainmentResult {
        items_returned: kept.len(),
        rows: kept,
        partial,
        partial_reason: partial.then_some(PartialReason::MaxBytes),
        bytes_returned: Some(used),
    }
}

/// Size of `value` as compact JSON. Values that cannot be serialized count
/// as unbounded.
pub fn serialized_size<T: Serialize + ?Sized>(value: &T) -> usize {
    let mut counter = ByteCounter(0);
    match serde_json::to_writer(&mut counter, value) {
        Ok(()) => counter.0,
        Err(_) => usize::MAX,
    }
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 = self.0.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Strict enforcements requested for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceEnforcement {
    pub row_cap: bool,
    pub byte_cap: bool,
}

/// Refuse strict enforcement the provider cannot guarantee. Never
/// downgrades a requested cap to best effort.
pub fn validate_resource_capabilities(
    provider: ProviderKind,
    requested: ResourceEnforcement,
    capabilities: &ProviderCapabilities,
) -> Result<(), PolicyError> {
    let checks = [
        (requested.row_cap, Capability::RowCap),
        (requested.byte_cap, Capability::ByteCap),
    ];
    for (wanted, capability) in checks {
        if wanted && !capabilities.supports(capability) {
            tracing::warn!(
                provider = provider.as_str(),
                capability = capability.as_str(),
                "strict resource cap requested but not supported"
            );
            return Err(PolicyError::ResourceCapUnsupported { capability });
        }
    }
    Ok(())
}

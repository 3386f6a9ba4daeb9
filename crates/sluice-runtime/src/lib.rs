//! # sluice-runtime
//!
//! Execution side of the Sluice gateway:
//!
//! - [`negotiator`]: table-driven capability negotiation with safe fallbacks
//! - [`containment`]: row and byte ceilings that never split a row
//! - [`cursor`]: signed, versioned continuation tokens
//! - [`sandbox`]: transaction and session hygiene around one execution
//! - [`gateway`]: the orchestrator tying these to the tenant policy
//!
//! Physical execution is behind the [`Connector`] and [`SessionConnection`]
//! traits; `sluice-adapter-pg` implements them for Postgres.

pub mod adapter;
pub mod containment;
pub mod cursor;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod negotiator;
pub mod sandbox;

pub use adapter::{ColumnInfo, Connector, QueryOutput, SessionConnection};
pub use containment::{
    ByteContainmentResult, PartialReason, ResourceEnforcement, RowContainmentResult,
    enforce_byte_limit, enforce_row_limit, serialized_size, validate_resource_capabilities,
};
pub use cursor::{CursorCodec, CursorInspection, CursorPosition, SigningKey, fingerprint, resolve_secret};
pub use envelope::{EnvelopeMetadata, QueryRequest, ResultEnvelope};
pub use error::{CursorError, ExecutionError, GatewayError, PolicyError, SandboxError};
pub use gateway::QueryGateway;
pub use negotiator::{
    CapabilityNegotiationResult, FallbackMode, NegotiationOptions, RequestNegotiation, negotiate,
    negotiate_request,
};
pub use sandbox::{ExecutionSandbox, SandboxOutcome, SandboxResult};

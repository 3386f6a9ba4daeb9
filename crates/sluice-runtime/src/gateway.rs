//! Query execution gateway.
//!
//! Sequences one request through every stage:
//!
//! 1. Statement policy (blocked statements stop here)
//! 2. Tenant enforcement (rewrite or reject)
//! 3. Capability negotiation and resource cap validation
//! 4. Cursor decode and page window
//! 5. Sandboxed execution on a spawned task
//! 6. Row then byte containment
//! 7. Next page token
//!
//! Nothing before step 5 touches the database, so a refused request never
//! acquires a connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sluice_core::{
    Capability, FallbackPolicy, GatewayConfig, LimitsConfig, ProviderCapabilities,
    SchemaSnapshotLoader, short_hash, sql_hash, tenant_hash,
};
use sluice_rls::{TenantEnforcementDecision, TenantPolicy};
use uuid::Uuid;

use crate::adapter::{Connector, QueryOutput};
use crate::containment::{
    PartialReason, ResourceEnforcement, enforce_byte_limit, enforce_row_limit, serialized_size,
    validate_resource_capabilities,
};
use crate::cursor::{CursorCodec, CursorPosition, SigningKey, fingerprint, resolve_secret};
use crate::envelope::{EnvelopeMetadata, QueryRequest, ResultEnvelope};
use crate::error::{CursorError, ExecutionError, GatewayError, PolicyError};
use crate::negotiator::{NegotiationOptions, RequestNegotiation, negotiate_request};
use crate::sandbox::ExecutionSandbox;

/// Extra time granted to the spawned sandbox beyond the execution timeout
/// before the gateway stops waiting for it.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// Alias of the derived table wrapping paginated or capped statements.
const WRAP_ALIAS: &str = "sluice_page";

/// Rows requested from the database for one call.
#[derive(Debug)]
enum Window {
    Unbounded,
    /// Fetch one row past the row cap so containment can see truncation.
    RowCap { max_rows: usize },
    /// Hard limit imposed by capability fallback.
    Forced { limit: u64 },
    Page {
        offset: u64,
        limit: u64,
        fingerprint: String,
        key: SigningKey,
    },
}

impl Window {
    fn wrap(&self, sql: &str) -> String {
        match self {
            Window::Unbounded => sql.to_string(),
            Window::RowCap { max_rows } => {
                format!("SELECT * FROM ({sql}) AS {WRAP_ALIAS} LIMIT {}", max_rows + 1)
            }
            Window::Forced { limit } => {
                format!("SELECT * FROM ({sql}) AS {WRAP_ALIAS} LIMIT {}", limit + 1)
            }
            Window::Page { offset, limit, .. } => format!(
                "SELECT * FROM ({sql}) AS {WRAP_ALIAS} LIMIT {} OFFSET {offset}",
                limit + 1
            ),
        }
    }

    /// Limit applied before containment, if any.
    fn hard_limit(&self) -> Option<u64> {
        match self {
            Window::Forced { limit } | Window::Page { limit, .. } => Some(*limit),
            Window::Unbounded | Window::RowCap { .. } => None,
        }
    }
}

/// Tenant-isolated query execution gateway.
pub struct QueryGateway {
    capabilities: ProviderCapabilities,
    policy: Arc<TenantPolicy>,
    snapshots: Arc<dyn SchemaSnapshotLoader>,
    connector: Arc<dyn Connector>,
    codec: CursorCodec,
    signing: Option<SigningKey>,
    fallback_policy: FallbackPolicy,
    limits: LimitsConfig,
    sandbox: ExecutionSandbox,
    strict_session_check: bool,
}

impl QueryGateway {
    /// Build a gateway from configuration.
    ///
    /// A missing cursor secret does not prevent construction; paginated
    /// requests then fail with `SECRET_MISSING`.
    pub fn new(
        config: &GatewayConfig,
        snapshots: Arc<dyn SchemaSnapshotLoader>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let capabilities = config.provider.capabilities();
        let policy = TenantPolicy::new(
            capabilities.clone(),
            config.tenancy.clone(),
            config.rewrite.clone(),
            Arc::clone(&snapshots),
        );
        let signing = match resolve_secret(&config.cursor) {
            Ok(key) => Some(key),
            Err(err) => {
                tracing::warn!(reason = err.reason_code(), "pagination unavailable");
                None
            }
        };

        Self {
            sandbox: ExecutionSandbox::new(&config.sandbox, &capabilities),
            capabilities,
            policy: Arc::new(policy),
            snapshots,
            connector,
            codec: CursorCodec::from_config(&config.cursor),
            signing,
            fallback_policy: config.capabilities.fallback_policy,
            limits: config.limits.clone(),
            strict_session_check: config.sandbox.strict_session_check,
        }
    }

    /// Replace the signing key resolved from configuration.
    pub fn with_signing_key(mut self, key: SigningKey) -> Self {
        self.signing = Some(key);
        self
    }

    pub fn policy(&self) -> &TenantPolicy {
        &self.policy
    }

    pub fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    /// Run one request. Failures are reported inside the envelope.
    pub async fn execute(&self, request: QueryRequest) -> ResultEnvelope {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let input_hash = sql_hash(&request.sql);
        let mut metadata = EnvelopeMetadata::default();

        match self.run(&request, &mut metadata).await {
            Ok(envelope) => {
                tracing::info!(
                    %request_id,
                    sql_hash = %input_hash,
                    rows = envelope.metadata.rows_returned,
                    truncated = envelope.metadata.is_truncated,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "query completed"
                );
                envelope
            }
            Err(err) => {
                tracing::info!(
                    %request_id,
                    sql_hash = %input_hash,
                    reason = %err.reason_code(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "query refused"
                );
                ResultEnvelope::failure(err.to_error_info(), metadata)
            }
        }
    }

    async fn run(
        &self,
        request: &QueryRequest,
        metadata: &mut EnvelopeMetadata,
    ) -> Result<ResultEnvelope, GatewayError> {
        let classification = self.policy.classifier().classify(&request.sql);
        if classification.blocked {
            let reason = classification
                .reason_code
                .unwrap_or_else(|| "BLOCKED_STATEMENT:OTHER".to_string());
            return Err(PolicyError::Blocked { reason }.into());
        }

        let decision = self.policy.evaluate(
            &request.sql,
            request.tenant_id.as_deref(),
            &request.bind_params,
        );
        metadata.tenant_enforcement_applied = decision.applied;
        metadata.tenant_enforcement_mode = decision.mode;
        tracing::debug!(telemetry = ?decision.telemetry_attributes, "tenant enforcement");
        if !decision.is_executable() {
            let err = decision.error().cloned().ok_or(GatewayError::Internal)?;
            return Err(PolicyError::TenantEnforcement(err).into());
        }

        let negotiation = self.negotiate(request, metadata)?;
        validate_resource_capabilities(
            self.capabilities.kind,
            ResourceEnforcement {
                row_cap: request.enforce_row_cap,
                byte_cap: request.enforce_byte_cap,
            },
            &self.capabilities,
        )?;

        if negotiation.options.terminate_pagination {
            return Ok(ResultEnvelope {
                rows: Vec::new(),
                columns: None,
                metadata: metadata.clone(),
                error: None,
            });
        }

        let now = Utc::now();
        let window = self.window(request, &decision, &negotiation.options, now)?;
        let timeout = self.execution_timeout(request);
        let include_columns =
            negotiation.options.include_columns && self.capabilities.column_metadata;
        let strict = self.strict_session_check || request.strict_session_check;

        let output = self
            .run_sandboxed(
                window.wrap(&decision.rewritten_sql),
                decision.bound_params.clone(),
                include_columns,
                timeout,
                strict,
            )
            .await?;

        self.contain(request, output, &window, include_columns, metadata, now)
    }

    fn negotiate(
        &self,
        request: &QueryRequest,
        metadata: &mut EnvelopeMetadata,
    ) -> Result<RequestNegotiation, GatewayError> {
        let negotiation = negotiate_request(
            &self.capabilities,
            self.fallback_policy,
            NegotiationOptions {
                include_columns: request.include_columns,
                timeout: request.timeout_ms.map(Duration::from_millis),
                page_token: request.page_token.clone(),
                page_size: request.page_size,
                ..Default::default()
            },
        );
        metadata.cap_detected = negotiation.cap_detected();
        metadata.cap_mitigation_applied = negotiation.mitigation_applied();
        metadata.cap_mitigation_mode = negotiation.mitigation_mode();

        // Missing column metadata only costs the caller the column list.
        if let Some(gap) = &negotiation.gap
            && gap.is_unmitigated_gap()
            && gap.required_capability != Some(Capability::ColumnMetadata)
        {
            let capability = gap.required_capability.ok_or(GatewayError::Internal)?;
            return Err(PolicyError::CapabilityUnsupported { capability }.into());
        }
        Ok(negotiation)
    }

    fn window(
        &self,
        request: &QueryRequest,
        decision: &TenantEnforcementDecision,
        options: &NegotiationOptions,
        now: DateTime<Utc>,
    ) -> Result<Window, GatewayError> {
        if options.is_paginated() {
            // Fail closed before the token is read.
            let key = self.signing.clone().ok_or(CursorError::SecretMissing)?;
            let fingerprint = self.fingerprint(request, decision);

            let (offset, token_limit) = match &options.page_token {
                Some(token) => match self.codec.decode(token, &fingerprint, &key, now)? {
                    CursorPosition::Offset { offset, limit } => (offset, Some(limit)),
                    CursorPosition::Keyset { .. } => return Err(CursorError::Malformed.into()),
                },
                None => (0, None),
            };
            let limit = options
                .page_size
                .or(token_limit)
                .unwrap_or(self.limits.default_page_size);
            self.check_page_size(limit)?;

            return Ok(Window::Page {
                offset,
                limit,
                fingerprint,
                key,
            });
        }

        if let Some(limit) = options.force_result_limit {
            self.check_page_size(limit)?;
            return Ok(Window::Forced { limit });
        }

        if request.enforce_row_cap {
            return Ok(Window::RowCap {
                max_rows: self.limits.max_rows,
            });
        }
        Ok(Window::Unbounded)
    }

    fn check_page_size(&self, size: u64) -> Result<(), PolicyError> {
        if size == 0 || size > self.limits.max_page_size {
            return Err(PolicyError::PageSizeInvalid {
                max: self.limits.max_page_size,
            });
        }
        Ok(())
    }

    /// Binds a token to the statement, the tenant, the caller parameters and
    /// the schema it was issued against.
    fn fingerprint(&self, request: &QueryRequest, decision: &TenantEnforcementDecision) -> String {
        let params = serde_json::to_vec(&decision.bound_params).unwrap_or_default();
        let params_hash = short_hash(&[&params]);
        let tenant = tenant_hash(request.tenant_id.as_deref().unwrap_or_default());
        let schema = self
            .snapshots
            .load_snapshot()
            .map(|s| s.fingerprint())
            .unwrap_or_default();
        fingerprint(&[&sql_hash(&request.sql), &tenant, &params_hash, &schema])
    }

    fn execution_timeout(&self, request: &QueryRequest) -> Duration {
        let ceiling = self.limits.execution_timeout();
        request
            .timeout_ms
            .map(Duration::from_millis)
            .map_or(ceiling, |t| t.min(ceiling))
    }

    /// Acquire a session and run the sandbox on its own task, so the exit
    /// path completes even if this future is dropped.
    async fn run_sandboxed(
        &self,
        sql: String,
        params: Vec<Value>,
        include_columns: bool,
        timeout: Duration,
        strict: bool,
    ) -> Result<QueryOutput, GatewayError> {
        let connector = Arc::clone(&self.connector);
        let sandbox = self.sandbox.clone().strict(strict);

        let task = tokio::spawn(async move {
            let mut conn = connector.acquire().await?;
            let outcome = sandbox
                .run(conn.as_mut(), &sql, &params, include_columns, timeout)
                .await;
            Ok::<_, ExecutionError>(outcome)
        });

        let joined = match tokio::time::timeout(timeout + DEADLINE_GRACE, task).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!("gateway deadline elapsed, sandbox cleanup continues in background");
                return Err(ExecutionError::Timeout.into());
            }
        };
        let outcome = joined.map_err(|err| {
            tracing::error!(error = %err, "sandbox task failed");
            GatewayError::Internal
        })??;

        let report = &outcome.report;
        if !report.state_clean {
            tracing::warn!(
                committed = report.committed,
                rolled_back = report.rolled_back,
                reset_errors = ?report.reset_errors,
                drift = ?report.drift,
                discarded = report.discarded,
                "session not clean after execution, connection discarded"
            );
        }
        outcome.result.map_err(Into::into)
    }

    fn contain(
        &self,
        request: &QueryRequest,
        output: QueryOutput,
        window: &Window,
        include_columns: bool,
        metadata: &mut EnvelopeMetadata,
        now: DateTime<Utc>,
    ) -> Result<ResultEnvelope, GatewayError> {
        let QueryOutput { mut rows, columns } = output;
        let columns = include_columns.then_some(columns);

        let mut has_more = false;
        if let Some(limit) = window.hard_limit() {
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            if rows.len() > limit {
                rows.truncate(limit);
                has_more = true;
            }
        }

        let by_rows = enforce_row_limit(rows, self.limits.max_rows, request.enforce_row_cap);
        let available = by_rows.items_returned;

        // Budget the metadata at its largest: every count at its maximum and
        // the longest token this page could carry.
        let provisional_token = match window {
            Window::Page {
                offset,
                limit,
                fingerprint,
                key,
            } => Some(self.codec.encode(
                &CursorPosition::Offset {
                    offset: offset.saturating_add(available as u64),
                    limit: *limit,
                },
                fingerprint,
                key,
                now,
            )?),
            _ => None,
        };
        let provisional = ResultEnvelope {
            rows: Vec::new(),
            columns: columns.clone(),
            metadata: EnvelopeMetadata {
                rows_returned: available,
                is_truncated: true,
                partial_reason: Some(PartialReason::MaxBytes),
                next_page_token: provisional_token,
                ..metadata.clone()
            },
            error: None,
        };
        let overhead = serialized_size(&provisional);

        let by_bytes = enforce_byte_limit(
            by_rows.rows,
            self.limits.max_bytes,
            request.enforce_byte_cap,
            overhead,
        );
        let returned = by_bytes.items_returned;

        let truncated = has_more || by_rows.partial || by_bytes.partial;
        let mut next_page_token = None;
        if let Window::Page {
            offset,
            limit,
            fingerprint,
            key,
        } = window
            && truncated
        {
            if returned == 0 {
                tracing::warn!("first row exceeds the byte budget, pagination cannot advance");
            } else {
                let next = CursorPosition::Offset {
                    offset: offset.saturating_add(returned as u64),
                    limit: *limit,
                };
                next_page_token = Some(self.codec.encode(&next, fingerprint, key, now)?);
            }
        }

        metadata.rows_returned = returned;
        metadata.is_truncated = truncated;
        metadata.partial_reason = by_bytes.partial_reason.or(by_rows.partial_reason);
        metadata.next_page_token = next_page_token;

        Ok(ResultEnvelope {
            rows: by_bytes.rows,
            columns,
            metadata: metadata.clone(),
            error: None,
        })
    }
}

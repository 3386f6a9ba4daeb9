//! Tenant predicate injection.
//!
//! Every physical table reference in a read query is replaced by a derived
//! table that filters on the tenant column:
//!
//! **Before (from agent):**
//! ```sql
//! SELECT * FROM orders o JOIN customers c ON c.id = o.customer_id
//! ```
//!
//! **After (to the database):**
//! ```sql
//! SELECT * FROM (SELECT * FROM orders WHERE tenant_id = $1) AS o
//!   JOIN (SELECT * FROM customers WHERE tenant_id = $2) AS c ON c.id = o.customer_id
//! ```
//!
//! The original alias (or the bare table name) is kept, so the rest of the
//! statement resolves unchanged. Tenant values are always bound parameters.
//!
//! Table references, CTE names and the configured global tables are all
//! compared with the provider's identifier rules, and every physical table
//! must resolve to exactly one entry of the schema snapshot.

use std::ops::ControlFlow;
use std::sync::Arc;

use serde_json::Value;
use sluice_core::{
    IdentifierCase, ParamStyle, ProviderCapabilities, ProviderKind, RewriteConfig, SchemaSnapshot,
    SchemaSnapshotLoader, TableLookup, TableScope, TenancyConfig, TenantIdType, sql_hash,
    tenant_hash,
};
use sqlparser::ast::{
    ObjectName, SetExpr, Statement, TableAlias, TableFactor, VisitMut, VisitorMut,
};

use crate::classifier::StatementClassifier;
use crate::decision::TenantEnforcementDecision;
use crate::error::RlsError;
use crate::parser::{SqlAnalyzer, placeholder, quote_ident};
use crate::shape::{AnalysisLimits, Deadline, ShapeAnalysis, TenantSqlShape, analyze};

/// Tenant isolation policy for one provider.
///
/// Immutable once built; share it behind an `Arc` across requests.
#[derive(Clone)]
pub struct TenantPolicy {
    analyzer: SqlAnalyzer,
    classifier: StatementClassifier,
    capabilities: ProviderCapabilities,
    case: IdentifierCase,
    tenancy: TenancyConfig,
    limits: RewriteConfig,
    snapshots: Arc<dyn SchemaSnapshotLoader>,
}

impl TenantPolicy {
    /// Create a new policy.
    pub fn new(
        capabilities: ProviderCapabilities,
        tenancy: TenancyConfig,
        limits: RewriteConfig,
        snapshots: Arc<dyn SchemaSnapshotLoader>,
    ) -> Self {
        Self {
            analyzer: SqlAnalyzer::new(capabilities.kind),
            classifier: StatementClassifier::new(&capabilities),
            case: IdentifierCase::for_provider(capabilities.kind),
            capabilities,
            tenancy,
            limits,
            snapshots,
        }
    }

    pub fn classifier(&self) -> &StatementClassifier {
        &self.classifier
    }

    /// Evaluate a statement for one tenant.
    ///
    /// Never panics and never returns partial isolation: either every
    /// physical table is scoped (or global), or the decision is `Rejected`.
    pub fn evaluate(
        &self,
        sql: &str,
        tenant_id: Option<&str>,
        params: &[Value],
    ) -> TenantEnforcementDecision {
        let deadline = Deadline::start(self.limits.hard_timeout());
        let input_hash = sql_hash(sql);

        let tenant_id = tenant_id.map(str::trim).filter(|t| !t.is_empty());
        let Some(tenant_id) = tenant_id else {
            if self.limits.strict {
                let decision = TenantEnforcementDecision::rejected(
                    sql,
                    params,
                    TenantSqlShape::Unsupported,
                    RlsError::MissingTenantValue,
                );
                return self.finish(decision, sql, params, &input_hash, &deadline, 0);
            }
            tracing::warn!(sql_hash = %input_hash, "tenant id missing, passing statement through");
            let decision = TenantEnforcementDecision::skipped(sql, params, "TENANT_ID_MISSING");
            return self.finish(decision, sql, params, &input_hash, &deadline, 0);
        };

        match self.rewrite(sql, tenant_id, params, &deadline) {
            Ok((decision, ast_nodes)) => {
                self.finish(decision, sql, params, &input_hash, &deadline, ast_nodes)
            }
            Err((shape, err)) => {
                tracing::debug!(
                    sql_hash = %input_hash,
                    tenant_hash = %tenant_hash(tenant_id),
                    reason = %err.reason_code(),
                    "tenant rewrite rejected"
                );
                let decision = TenantEnforcementDecision::rejected(sql, params, shape, err);
                self.finish(decision, sql, params, &input_hash, &deadline, 0)
            }
        }
    }

    fn rewrite(
        &self,
        sql: &str,
        tenant_id: &str,
        params: &[Value],
        deadline: &Deadline,
    ) -> Result<(TenantEnforcementDecision, usize), (TenantSqlShape, RlsError)> {
        let unsupported = |err| (TenantSqlShape::Unsupported, err);

        let tenant_value = self.bind_tenant(tenant_id).map_err(unsupported)?;

        let classification = self.classifier.classify(sql);
        if classification.blocked {
            let reason = classification
                .reason_code
                .unwrap_or_else(|| "BLOCKED_STATEMENT:OTHER".to_string());
            return Err(unsupported(RlsError::Blocked { reason }));
        }

        self.check_placeholders(sql, params).map_err(unsupported)?;

        let mut statements = self.analyzer.parse(sql).map_err(unsupported)?;
        if statements.len() != 1 {
            return Err(unsupported(RlsError::UnsupportedShape {
                reason: "MULTI_STATEMENT",
            }));
        }
        let mut statement = statements.remove(0);
        deadline.check().map_err(unsupported)?;

        let analysis = analyze(
            &statement,
            AnalysisLimits {
                max_ast_nodes: self.limits.max_ast_nodes,
                max_targets: self.limits.max_targets,
            },
            self.case,
            deadline,
        )
        .map_err(unsupported)?;

        let shape = analysis.shape;
        if let Some(reason) = analysis.unsupported_reason {
            return Err(unsupported(RlsError::UnsupportedShape { reason }));
        }

        let plan = self.plan(&analysis).map_err(|e| (shape, e))?;
        deadline.check().map_err(|e| (shape, e))?;

        let mut replacements = Vec::with_capacity(analysis.targets.len());
        let mut bound_params = params.to_vec();
        for action in &plan.actions {
            match action {
                TargetAction::Scope {
                    object,
                    alias,
                    column,
                } => {
                    let index = bound_params.len() + 1;
                    let factor = self
                        .scoped_factor(object, alias.as_ref(), column, index)
                        .map_err(|e| (shape, e))?;
                    replacements.push(Some(factor));
                    bound_params.push(tenant_value.clone());
                }
                TargetAction::Keep => replacements.push(None),
            }
        }

        let expected = replacements.iter().filter(|r| r.is_some()).count();
        let mut rewriter = TenantRewriter {
            replacements,
            position: 0,
            applied: 0,
        };
        let _ = statement.visit(&mut rewriter);
        if rewriter.applied != expected || rewriter.position != plan.actions.len() {
            tracing::error!(
                expected,
                applied = rewriter.applied,
                "tenant rewrite did not reach every table reference"
            );
            return Err((shape, RlsError::Internal));
        }
        deadline.check().map_err(|e| (shape, e))?;

        let decision = TenantEnforcementDecision::applied(
            shape,
            statement.to_string(),
            bound_params,
            plan.scoped,
            plan.global,
        );
        Ok((decision, analysis.ast_nodes))
    }

    /// Decide, per table factor, whether it is scoped or left alone.
    fn plan(&self, analysis: &ShapeAnalysis) -> Result<RewritePlan, RlsError> {
        let mut plan = RewritePlan::default();
        let mut snapshot: Option<Arc<SchemaSnapshot>> = None;

        for target in &analysis.targets {
            if target.cte_reference {
                plan.actions.push(TargetAction::Keep);
                continue;
            }

            let name = &target.name;
            if name.is_system_catalog() {
                return Err(RlsError::SystemCatalog);
            }

            if snapshot.is_none() {
                snapshot = Some(self.snapshots.load_snapshot().ok_or(RlsError::SchemaUnavailable)?);
            }
            let Some(snap) = snapshot.clone() else {
                return Err(RlsError::SchemaUnavailable);
            };
            let table = match snap.resolve(name.schema(), name.table(), self.case) {
                TableLookup::Found(table) => table,
                TableLookup::Missing => return Err(RlsError::UnknownTable),
                TableLookup::Ambiguous => return Err(RlsError::AmbiguousRelation),
            };

            match self.tenancy.scope(table, &snap, self.case) {
                TableScope::Global => {
                    push_unique(&mut plan.global, name.display_name());
                    plan.actions.push(TargetAction::Keep);
                }
                TableScope::Scoped { column } => {
                    if !table.has_column(column) {
                        return Err(RlsError::TenantColumnMissing);
                    }
                    push_unique(&mut plan.scoped, name.display_name());
                    plan.actions.push(TargetAction::Scope {
                        object: target.object.clone(),
                        alias: target.alias.clone(),
                        column: column.to_string(),
                    });
                }
            }
        }

        let params = plan
            .actions
            .iter()
            .filter(|a| matches!(a, TargetAction::Scope { .. }))
            .count();
        if params > self.limits.max_params {
            return Err(RlsError::TooManyParams {
                count: params,
                limit: self.limits.max_params,
            });
        }

        Ok(plan)
    }

    /// Build `(SELECT * FROM name WHERE column = <param>) AS alias`.
    ///
    /// Only the predicate goes through the parser. The table name and alias
    /// are spliced in as AST nodes, so their quoting survives unchanged.
    fn scoped_factor(
        &self,
        object: &ObjectName,
        alias: Option<&TableAlias>,
        column: &str,
        index: usize,
    ) -> Result<TableFactor, RlsError> {
        let mut value = placeholder(self.capabilities.param_style, index);
        let casts_uuid = matches!(self.capabilities.kind, ProviderKind::Postgres | ProviderKind::Duckdb);
        if self.tenancy.tenant_id.id_type == TenantIdType::Uuid && casts_uuid {
            value = format!("CAST({value} AS UUID)");
        }

        let sql = format!(
            "SELECT * FROM (SELECT * FROM sluice_scope WHERE {} = {}) AS sluice_scope",
            quote_ident(column, self.capabilities.kind),
            value,
        );

        let mut statements = self.analyzer.parse(&sql).map_err(|_| RlsError::Internal)?;
        let Some(Statement::Query(query)) = statements.pop() else {
            return Err(RlsError::Internal);
        };
        let query = *query;
        let SetExpr::Select(select) = *query.body else {
            return Err(RlsError::Internal);
        };
        let mut from = (*select).from;
        if from.len() != 1 || !from[0].joins.is_empty() {
            return Err(RlsError::Internal);
        }
        let mut factor = from.remove(0).relation;

        let TableFactor::Derived {
            subquery,
            alias: derived_alias,
            ..
        } = &mut factor
        else {
            return Err(RlsError::Internal);
        };
        let SetExpr::Select(inner) = subquery.body.as_mut() else {
            return Err(RlsError::Internal);
        };
        let [scan] = inner.from.as_mut_slice() else {
            return Err(RlsError::Internal);
        };
        let TableFactor::Table { name, .. } = &mut scan.relation else {
            return Err(RlsError::Internal);
        };
        *name = object.clone();
        *derived_alias = Some(match alias {
            Some(alias) => TableAlias {
                explicit: true,
                ..alias.clone()
            },
            None => implicit_alias(object)?,
        });

        Ok(factor)
    }

    /// Type the tenant id per configuration.
    fn bind_tenant(&self, tenant_id: &str) -> Result<Value, RlsError> {
        match self.tenancy.tenant_id.id_type {
            TenantIdType::Integer => tenant_id
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| RlsError::InvalidTenantValue { expected: "integer" }),
            TenantIdType::Uuid => uuid::Uuid::parse_str(tenant_id)
                .map(|u| Value::String(u.hyphenated().to_string()))
                .map_err(|_| RlsError::InvalidTenantValue { expected: "uuid" }),
            TenantIdType::String => Ok(Value::String(tenant_id.to_string())),
        }
    }

    /// Reject placeholder usage that would collide with tenant parameters.
    fn check_placeholders(&self, sql: &str, params: &[Value]) -> Result<(), RlsError> {
        let usage = self.analyzer.placeholders(sql)?;
        if usage.named > 0 {
            return Err(RlsError::ParamStyleConflict);
        }
        match self.capabilities.param_style {
            ParamStyle::Dollar => {
                if usage.positional > 0 {
                    return Err(RlsError::ParamStyleConflict);
                }
                if usage.max_numbered > params.len() {
                    return Err(RlsError::ParamCountMismatch);
                }
            }
            ParamStyle::QuestionMark => {
                if usage.max_numbered > 0 || usage.positional > 0 || !params.is_empty() {
                    return Err(RlsError::ParamStyleConflict);
                }
            }
        }
        Ok(())
    }

    /// Attach telemetry and apply the time budget to a finished decision.
    fn finish(
        &self,
        mut decision: TenantEnforcementDecision,
        sql: &str,
        params: &[Value],
        input_hash: &str,
        deadline: &Deadline,
        ast_nodes: usize,
    ) -> TenantEnforcementDecision {
        let elapsed = deadline.elapsed();
        if decision.applied && elapsed > self.limits.hard_timeout() {
            decision = TenantEnforcementDecision::rejected(
                sql,
                params,
                decision.shape,
                RlsError::RewriteTimeout,
            );
        }

        let slow = elapsed > self.limits.warn_after();
        if slow {
            tracing::warn!(
                sql_hash = %input_hash,
                elapsed_us = elapsed.as_micros() as u64,
                "tenant rewrite exceeded soft time budget"
            );
        }

        let params_added = if decision.applied {
            decision.bound_params.len().saturating_sub(params.len())
        } else {
            0
        };

        let attrs = &mut decision.telemetry_attributes;
        attrs.insert("sql_hash".into(), Value::String(input_hash.to_string()));
        if decision.applied {
            attrs.insert(
                "rewritten_hash".into(),
                Value::String(sql_hash(&decision.rewritten_sql)),
            );
        }
        attrs.insert("tables_scoped".into(), Value::from(decision.tables_scoped.len()));
        attrs.insert("tables_global".into(), Value::from(decision.tables_global.len()));
        attrs.insert("params_added".into(), Value::from(params_added));
        attrs.insert("ast_nodes".into(), Value::from(ast_nodes));
        attrs.insert("elapsed_us".into(), Value::from(elapsed.as_micros() as u64));
        attrs.insert("rewrite_slow".into(), Value::Bool(slow));
        attrs.insert("shape".into(), Value::String(decision.shape.as_str().to_string()));
        if let Some(reason) = &decision.reason_code {
            attrs.insert("reason_code".into(), Value::String(reason.clone()));
        }

        decision
    }
}

#[derive(Default)]
struct RewritePlan {
    actions: Vec<TargetAction>,
    scoped: Vec<String>,
    global: Vec<String>,
}

enum TargetAction {
    Scope {
        object: ObjectName,
        alias: Option<TableAlias>,
        column: String,
    },
    Keep,
}

/// The alias an unaliased reference is known by: its last name part.
fn implicit_alias(object: &ObjectName) -> Result<TableAlias, RlsError> {
    let name = object
        .0
        .last()
        .and_then(|part| part.as_ident())
        .ok_or(RlsError::Internal)?;
    Ok(TableAlias {
        explicit: true,
        name: name.clone(),
        columns: Vec::new(),
    })
}

fn push_unique(list: &mut Vec<String>, name: String) {
    if !list.contains(&name) {
        list.push(name);
    }
}

/// Replaces table factors by position, in the same order the analysis
/// visited them. Replacements happen after the factor's children are
/// visited, so injected subqueries are never revisited.
struct TenantRewriter {
    replacements: Vec<Option<TableFactor>>,
    position: usize,
    applied: usize,
}

impl VisitorMut for TenantRewriter {
    type Break = ();

    fn post_visit_table_factor(&mut self, factor: &mut TableFactor) -> ControlFlow<Self::Break> {
        if matches!(factor, TableFactor::Table { .. }) {
            let position = self.position;
            self.position += 1;
            if let Some(replacement) = self.replacements.get_mut(position).and_then(Option::take) {
                *factor = replacement;
                self.applied += 1;
            }
        }
        ControlFlow::Continue(())
    }
}

//! Tenant shape analysis.
//!
//! A single read-only pass over the statement that decides whether it can be
//! tenant-scoped, and records every table factor in visit order so the
//! rewrite pass can address them by position.
//!
//! The supported set is enumerated explicitly:
//!
//! | Construct | Handling |
//! |-----------|----------|
//! | `SELECT`, `VALUES`, parenthesised queries | supported |
//! | `UNION` / `EXCEPT` / `INTERSECT` | supported |
//! | non-recursive CTEs referencing earlier CTEs | supported |
//! | derived tables, nested joins, expression subqueries | supported |
//! | self or forward CTE references (`WITH RECURSIVE`) | `RECURSIVE_CTE` |
//! | table-valued functions, `UNNEST`, `PIVOT`, ... | `TABLE_FUNCTION` / `UNSUPPORTED_TABLE_FACTOR` |
//! | `TABLE t` bodies | `TABLE_EXPRESSION` |
//! | hints, partitions, time travel on a table | `TABLE_MODIFIERS` |
//! | mutation bodies, non-query statements | `NOT_A_QUERY` |
//! | relations outside table factors | `UNTRACKED_RELATION` |
//! | CTE names whose match depends on server settings | `AMBIGUOUS_RELATION` |
//!
//! Anything not listed fails closed.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sluice_core::{Identifier, IdentifierCase, NameMatch};
use sqlparser::ast::{ObjectName, Query, SetExpr, Statement, TableAlias, TableFactor, Visit, Visitor};

use crate::error::RlsError;
use crate::parser::{QualifiedName, identifier};

/// Deadline checks happen every this many visited nodes.
const DEADLINE_CHECK_INTERVAL: usize = 64;

/// Shape of a statement with respect to tenant rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantSqlShape {
    SimpleSelect,
    SafeCteQuery,
    JoinQuery,
    UnionQuery,
    Subquery,
    Unsupported,
}

impl TenantSqlShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantSqlShape::SimpleSelect => "simple_select",
            TenantSqlShape::SafeCteQuery => "safe_cte_query",
            TenantSqlShape::JoinQuery => "join_query",
            TenantSqlShape::UnionQuery => "union_query",
            TenantSqlShape::Subquery => "subquery",
            TenantSqlShape::Unsupported => "unsupported",
        }
    }
}

/// Wall-clock budget for one rewrite.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    hard: Duration,
}

impl Deadline {
    pub fn start(hard: Duration) -> Self {
        Self {
            started: Instant::now(),
            hard,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn check(&self) -> Result<(), RlsError> {
        if self.elapsed() > self.hard {
            Err(RlsError::RewriteTimeout)
        } else {
            Ok(())
        }
    }
}

/// Ceilings enforced while analysing.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisLimits {
    pub max_ast_nodes: usize,
    pub max_targets: usize,
}

/// One `TableFactor::Table` occurrence, in visit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    pub name: QualifiedName,
    /// The name node as parsed, quoting intact.
    pub object: ObjectName,
    pub alias: Option<TableAlias>,
    /// Resolves to an enclosing CTE rather than a physical table.
    pub cte_reference: bool,
}

/// Result of shape analysis.
#[derive(Debug, Clone)]
pub struct ShapeAnalysis {
    pub shape: TenantSqlShape,
    /// Reason code when `shape` is `Unsupported`.
    pub unsupported_reason: Option<&'static str>,
    pub targets: Vec<TableTarget>,
    pub ast_nodes: usize,
}

/// Analyse one parsed statement. `case` decides which table references
/// name an enclosing CTE.
pub fn analyze(
    statement: &Statement,
    limits: AnalysisLimits,
    case: IdentifierCase,
    deadline: &Deadline,
) -> Result<ShapeAnalysis, RlsError> {
    let mut visitor = ShapeVisitor::new(limits, case, deadline);

    let mut unsupported = match statement.visit(&mut visitor) {
        ControlFlow::Continue(()) => None,
        ControlFlow::Break(Stop::Unsupported(reason)) => Some(reason),
        ControlFlow::Break(Stop::Error(err)) => return Err(err),
    };
    if unsupported.is_none() && visitor.relations != visitor.targets.len() {
        unsupported = Some("UNTRACKED_RELATION");
    }

    let subqueries = visitor.queries.saturating_sub(1 + visitor.cte_bodies);
    let shape = if unsupported.is_some() {
        TenantSqlShape::Unsupported
    } else if visitor.set_operations > 0 {
        TenantSqlShape::UnionQuery
    } else if visitor.ctes > 0 {
        TenantSqlShape::SafeCteQuery
    } else if visitor.joins > 0 {
        TenantSqlShape::JoinQuery
    } else if subqueries > 0 {
        TenantSqlShape::Subquery
    } else {
        TenantSqlShape::SimpleSelect
    };

    Ok(ShapeAnalysis {
        shape,
        unsupported_reason: unsupported,
        targets: visitor.targets,
        ast_nodes: visitor.ast_nodes,
    })
}

enum Stop {
    Unsupported(&'static str),
    Error(RlsError),
}

/// CTE names visible inside one query.
struct CteFrame {
    names: Vec<Identifier>,
    bodies: Vec<*const Query>,
    /// `names[..visible]` may be referenced. A CTE body only sees the CTEs
    /// defined before it.
    visible: usize,
}

struct ShapeVisitor<'a> {
    limits: AnalysisLimits,
    case: IdentifierCase,
    deadline: &'a Deadline,
    frames: Vec<CteFrame>,
    targets: Vec<TableTarget>,
    physical: usize,
    ast_nodes: usize,
    relations: usize,
    queries: usize,
    cte_bodies: usize,
    ctes: usize,
    joins: usize,
    set_operations: usize,
}

impl<'a> ShapeVisitor<'a> {
    fn new(limits: AnalysisLimits, case: IdentifierCase, deadline: &'a Deadline) -> Self {
        Self {
            limits,
            case,
            deadline,
            frames: Vec::new(),
            targets: Vec::new(),
            physical: 0,
            ast_nodes: 0,
            relations: 0,
            queries: 0,
            cte_bodies: 0,
            ctes: 0,
            joins: 0,
            set_operations: 0,
        }
    }

    fn tick(&mut self) -> ControlFlow<Stop> {
        self.ast_nodes += 1;
        if self.ast_nodes > self.limits.max_ast_nodes {
            return ControlFlow::Break(Stop::Error(RlsError::AstTooLarge {
                limit: self.limits.max_ast_nodes,
            }));
        }
        if self.ast_nodes % DEADLINE_CHECK_INTERVAL == 0 {
            if let Err(err) = self.deadline.check() {
                return ControlFlow::Break(Stop::Error(err));
            }
        }
        ControlFlow::Continue(())
    }

    fn inspect_body(&mut self, body: &SetExpr) -> ControlFlow<Stop> {
        match body {
            SetExpr::Select(select) => {
                let joined = select.from.len() > 1 || select.from.iter().any(|t| !t.joins.is_empty());
                if joined {
                    self.joins += 1;
                }
                ControlFlow::Continue(())
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.set_operations += 1;
                self.inspect_body(left)?;
                self.inspect_body(right)
            }
            // Visited as its own query.
            SetExpr::Query(_) => ControlFlow::Continue(()),
            SetExpr::Values(_) => ControlFlow::Continue(()),
            SetExpr::Table(_) => ControlFlow::Break(Stop::Unsupported("TABLE_EXPRESSION")),
            SetExpr::Insert(_) | SetExpr::Update(_) => {
                ControlFlow::Break(Stop::Unsupported("NOT_A_QUERY"))
            }
            _ => ControlFlow::Break(Stop::Unsupported("UNSUPPORTED_SET_EXPR")),
        }
    }

    /// Resolve an unqualified name against the enclosing CTE scopes, with
    /// the backend's identifier rules. The innermost frame wins.
    fn resolve_cte(&self, name: &QualifiedName) -> ControlFlow<Stop, bool> {
        if name.schema().is_some() {
            return ControlFlow::Continue(false);
        }
        for frame in self.frames.iter().rev() {
            let mut ambiguous = false;
            for (idx, cte) in frame.names.iter().enumerate() {
                match self.case.compare(cte, name.table()) {
                    NameMatch::Same if idx < frame.visible => return ControlFlow::Continue(true),
                    NameMatch::Same => return ControlFlow::Break(Stop::Unsupported("RECURSIVE_CTE")),
                    NameMatch::Ambiguous => ambiguous = true,
                    NameMatch::Different => {}
                }
            }
            if ambiguous {
                return ControlFlow::Break(Stop::Unsupported("AMBIGUOUS_RELATION"));
            }
        }
        ControlFlow::Continue(false)
    }

    fn visit_table(&mut self, factor: &TableFactor) -> ControlFlow<Stop> {
        let TableFactor::Table {
            name: object,
            alias,
            args,
            ..
        } = factor
        else {
            return ControlFlow::Continue(());
        };
        if args.is_some() {
            return ControlFlow::Break(Stop::Unsupported("TABLE_FUNCTION"));
        }
        if has_modifiers(factor) {
            return ControlFlow::Break(Stop::Unsupported("TABLE_MODIFIERS"));
        }
        let Some(name) = QualifiedName::from_object_name(object) else {
            return ControlFlow::Break(Stop::Unsupported("TABLE_FUNCTION"));
        };

        let cte_reference = self.resolve_cte(&name)?;
        if !cte_reference {
            self.physical += 1;
            if self.physical > self.limits.max_targets {
                return ControlFlow::Break(Stop::Error(RlsError::TooManyTables {
                    count: self.physical,
                    limit: self.limits.max_targets,
                }));
            }
        }

        self.targets.push(TableTarget {
            name,
            object: object.clone(),
            alias: alias.clone(),
            cte_reference,
        });
        ControlFlow::Continue(())
    }
}

impl Visitor for ShapeVisitor<'_> {
    type Break = Stop;

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        self.tick()?;
        if matches!(statement, Statement::Query(_)) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(Stop::Unsupported("NOT_A_QUERY"))
        }
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        self.tick()?;
        self.queries += 1;

        let ptr: *const Query = query;
        if let Some(parent) = self.frames.last_mut() {
            if let Some(idx) = parent.bodies.iter().position(|b| std::ptr::eq(*b, ptr)) {
                parent.visible = idx;
                self.cte_bodies += 1;
            }
        }

        let mut frame = CteFrame {
            names: Vec::new(),
            bodies: Vec::new(),
            visible: 0,
        };
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                frame.names.push(identifier(&cte.alias.name));
                frame.bodies.push(&*cte.query as *const Query);
            }
            self.ctes += with.cte_tables.len();
        }
        self.frames.push(frame);

        self.inspect_body(&query.body)
    }

    fn post_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        self.frames.pop();
        let ptr: *const Query = query;
        if let Some(parent) = self.frames.last_mut() {
            if let Some(idx) = parent.bodies.iter().position(|b| std::ptr::eq(*b, ptr)) {
                parent.visible = idx + 1;
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, _relation: &ObjectName) -> ControlFlow<Self::Break> {
        self.tick()?;
        self.relations += 1;
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, _expr: &sqlparser::ast::Expr) -> ControlFlow<Self::Break> {
        self.tick()
    }

    fn pre_visit_table_factor(&mut self, _factor: &TableFactor) -> ControlFlow<Self::Break> {
        self.tick()
    }

    fn post_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table { .. } => self.visit_table(factor),
            TableFactor::Derived { .. } => ControlFlow::Continue(()),
            TableFactor::NestedJoin { .. } => {
                self.joins += 1;
                ControlFlow::Continue(())
            }
            _ => ControlFlow::Break(Stop::Unsupported("UNSUPPORTED_TABLE_FACTOR")),
        }
    }
}

/// Whether a table factor carries anything besides its name and alias.
fn has_modifiers(factor: &TableFactor) -> bool {
    match factor {
        TableFactor::Table {
            with_hints,
            version,
            with_ordinality,
            partitions,
            json_path,
            sample,
            index_hints,
            ..
        } => {
            !with_hints.is_empty()
                || version.is_some()
                || *with_ordinality
                || !partitions.is_empty()
                || json_path.is_some()
                || sample.is_some()
                || !index_hints.is_empty()
        }
        _ => false,
    }
}

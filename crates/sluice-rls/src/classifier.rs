//! Statement policy.
//!
//! Decides whether a statement may run at all. Only read queries pass:
//! `SELECT`, `WITH ... SELECT`, `VALUES` and set operations over them.
//! Everything else is blocked with a reason code from a closed vocabulary.
//! Reason codes are built from fixed strings, never from the input.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use sluice_core::{ErrorInfo, ProviderCapabilities, ProviderKind};
use sqlparser::ast::{Query, SetExpr, SetQuantifier, Statement, Visit, Visitor};

use crate::parser::{LexSummary, SqlAnalyzer};

/// Keywords that may appear in `BLOCKED_STATEMENT:<KEYWORD>`.
pub const BLOCKED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "TRUNCATE", "CREATE", "ALTER", "DROP", "GRANT",
    "REVOKE", "SET", "RESET", "DO", "CALL", "PREPARE", "EXECUTE", "DEALLOCATE", "COPY", "VACUUM",
    "ANALYZE", "LISTEN", "NOTIFY", "EXPLAIN", "LOCK", "OTHER",
];

/// Broad statement category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    SetOperation,
    DataMutation,
    SchemaMutation,
    Privilege,
    SessionMutation,
    Procedural,
    BulkIo,
    MultiStatement,
    Administrative,
    Empty,
    Unparsable,
    Other,
}

/// Result of classifying one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementClassification {
    pub kind: StatementKind,
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
}

impl StatementClassification {
    fn allowed(kind: StatementKind) -> Self {
        Self {
            kind,
            blocked: false,
            reason_code: None,
        }
    }

    fn blocked(kind: StatementKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            blocked: true,
            reason_code: Some(reason.into()),
        }
    }

    /// Wire error for a blocked statement.
    pub fn error_info(&self) -> Option<ErrorInfo> {
        if !self.blocked {
            return None;
        }
        let code = self.reason_code.clone().unwrap_or_else(|| "BLOCKED_STATEMENT:OTHER".to_string());
        Some(ErrorInfo::invalid_request(
            code,
            "statement is not permitted by the read-only statement policy",
        ))
    }
}

/// Classifies statements for one provider.
#[derive(Debug, Clone)]
pub struct StatementClassifier {
    analyzer: SqlAnalyzer,
    explicit_set_quantifier: bool,
}

impl StatementClassifier {
    pub fn new(capabilities: &ProviderCapabilities) -> Self {
        Self {
            analyzer: SqlAnalyzer::new(capabilities.kind),
            explicit_set_quantifier: capabilities.explicit_set_quantifier,
        }
    }

    pub fn for_provider(kind: ProviderKind) -> Self {
        Self::new(&ProviderCapabilities::for_kind(kind))
    }

    /// Classify a SQL string.
    pub fn classify(&self, sql: &str) -> StatementClassification {
        let lex = self.analyzer.lex(sql).ok();
        let is_empty = match &lex {
            Some(lex) => lex.significant_tokens == 0,
            None => sql.trim().is_empty(),
        };
        if is_empty {
            return StatementClassification::blocked(StatementKind::Empty, "EMPTY_STATEMENT");
        }

        let statements = match self.analyzer.parse(sql) {
            Ok(statements) => statements,
            Err(_) => return unparsable(lex.as_ref()),
        };

        match statements.as_slice() {
            [] => StatementClassification::blocked(StatementKind::Empty, "EMPTY_STATEMENT"),
            [statement] => self.classify_statement(statement, lex.as_ref()),
            _ => StatementClassification::blocked(StatementKind::MultiStatement, "MULTI_STATEMENT"),
        }
    }

    fn classify_statement(
        &self,
        statement: &Statement,
        lex: Option<&LexSummary>,
    ) -> StatementClassification {
        let Statement::Query(query) = statement else {
            let keyword = statement_keyword(statement, lex);
            let second = lex.and_then(|l| l.second.as_deref());
            return StatementClassification::blocked(
                keyword_kind(keyword, second),
                format!("BLOCKED_STATEMENT:{keyword}"),
            );
        };

        let mut visitor = ReadOnlyVisitor {
            explicit_set_quantifier: self.explicit_set_quantifier,
        };
        if let ControlFlow::Break(blocked) = statement.visit(&mut visitor) {
            return blocked;
        }

        if matches!(query.body.as_ref(), SetExpr::SetOperation { .. }) {
            StatementClassification::allowed(StatementKind::SetOperation)
        } else {
            StatementClassification::allowed(StatementKind::Select)
        }
    }
}

/// Classification for input the parser rejected.
fn unparsable(lex: Option<&LexSummary>) -> StatementClassification {
    if let Some(lex) = lex {
        if let Some(keyword) = lex.leading.as_deref().and_then(known_keyword) {
            let second = lex.second.as_deref();
            return StatementClassification::blocked(
                keyword_kind(keyword, second),
                format!("BLOCKED_STATEMENT:{keyword}"),
            );
        }
        if lex.multiple_statements {
            return StatementClassification::blocked(StatementKind::MultiStatement, "MULTI_STATEMENT");
        }
    }
    StatementClassification::blocked(StatementKind::Unparsable, "SYNTAX_ERROR")
}

/// Map a word onto the closed keyword list.
fn known_keyword(word: &str) -> Option<&'static str> {
    let word = match word {
        "REPLACE" | "UPSERT" => "INSERT",
        "UNLOAD" | "LOAD" => "COPY",
        other => other,
    };
    BLOCKED_KEYWORDS
        .iter()
        .copied()
        .find(|k| *k != "OTHER" && k.eq_ignore_ascii_case(word))
}

/// Keyword for a parsed non-query statement.
fn statement_keyword(statement: &Statement, lex: Option<&LexSummary>) -> &'static str {
    let rendered = statement.to_string();
    let first = rendered.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
    known_keyword(&first)
        .or_else(|| lex.and_then(|l| l.leading.as_deref()).and_then(known_keyword))
        .unwrap_or("OTHER")
}

fn keyword_kind(keyword: &str, second: Option<&str>) -> StatementKind {
    match keyword {
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "TRUNCATE" => StatementKind::DataMutation,
        "CREATE" | "ALTER" => match second {
            Some("ROLE" | "USER" | "GROUP") => StatementKind::Privilege,
            Some("SYSTEM") => StatementKind::SessionMutation,
            _ => StatementKind::SchemaMutation,
        },
        "DROP" => match second {
            Some("ROLE" | "USER" | "GROUP") => StatementKind::Privilege,
            _ => StatementKind::SchemaMutation,
        },
        "GRANT" | "REVOKE" => StatementKind::Privilege,
        "SET" | "RESET" => StatementKind::SessionMutation,
        "DO" | "CALL" | "PREPARE" | "EXECUTE" | "DEALLOCATE" => StatementKind::Procedural,
        "COPY" => StatementKind::BulkIo,
        "VACUUM" | "ANALYZE" | "LISTEN" | "NOTIFY" | "EXPLAIN" | "LOCK" => {
            StatementKind::Administrative
        }
        _ => StatementKind::Other,
    }
}

/// Rejects anything inside a query that writes or locks.
struct ReadOnlyVisitor {
    explicit_set_quantifier: bool,
}

impl ReadOnlyVisitor {
    fn check_set_expr(&self, expr: &SetExpr) -> ControlFlow<StatementClassification> {
        match expr {
            SetExpr::Select(select) if select.into.is_some() => ControlFlow::Break(
                StatementClassification::blocked(StatementKind::DataMutation, "SELECT_INTO"),
            ),
            SetExpr::SetOperation {
                set_quantifier,
                left,
                right,
                ..
            } => {
                if self.explicit_set_quantifier && matches!(set_quantifier, SetQuantifier::None) {
                    return ControlFlow::Break(StatementClassification::blocked(
                        StatementKind::SetOperation,
                        "SET_QUANTIFIER_REQUIRED",
                    ));
                }
                self.check_set_expr(left)?;
                self.check_set_expr(right)
            }
            _ => ControlFlow::Continue(()),
        }
    }
}

impl Visitor for ReadOnlyVisitor {
    type Break = StatementClassification;

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        if matches!(statement, Statement::Query(_)) {
            return ControlFlow::Continue(());
        }
        let keyword = statement_keyword(statement, None);
        ControlFlow::Break(StatementClassification::blocked(
            keyword_kind(keyword, None),
            format!("BLOCKED_STATEMENT:{keyword}"),
        ))
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if !query.locks.is_empty() {
            return ControlFlow::Break(StatementClassification::blocked(
                StatementKind::Select,
                "ROW_LOCKING",
            ));
        }
        self.check_set_expr(&query.body)
    }
}

//! # sluice-rls
//!
//! Statement policy and tenant isolation for Sluice.
//!
//! This crate provides functionality to:
//! - Parse SQL with the dialect of the configured provider (`sqlparser`)
//! - Classify statements and block anything that is not a plain read
//! - Analyse the statement shape and fail closed outside the supported set
//! - Rewrite every physical table reference into a tenant-filtered subquery
//!
//! ## How It Works
//!
//! **Before (from agent):**
//! ```sql
//! SELECT * FROM orders WHERE status = 'pending'
//! ```
//!
//! **After (to the database):**
//! ```sql
//! SELECT * FROM (SELECT * FROM orders WHERE tenant_id = $1) AS orders WHERE status = 'pending'
//! ```
//!
//! ## Statement Policy
//!
//! | Statement | Behavior |
//! |-----------|----------|
//! | `SELECT`, `WITH ... SELECT`, set operations | allowed |
//! | `INSERT` / `UPDATE` / `DELETE` / `MERGE` / `TRUNCATE` | `BLOCKED_STATEMENT:<KEYWORD>` |
//! | DDL, privileges, session changes, procedures, `COPY` | `BLOCKED_STATEMENT:<KEYWORD>` |
//! | `SELECT ... INTO`, `SELECT ... FOR UPDATE` | `SELECT_INTO`, `ROW_LOCKING` |
//! | several statements | `MULTI_STATEMENT` |

pub mod classifier;
pub mod decision;
pub mod error;
pub mod injector;
pub mod parser;
pub mod shape;

pub use classifier::{BLOCKED_KEYWORDS, StatementClassification, StatementClassifier, StatementKind};
pub use decision::{EnforcementMode, EnforcementOutcome, TenantEnforcementDecision};
pub use error::RlsError;
pub use injector::TenantPolicy;
pub use parser::{QualifiedName, SqlAnalyzer};
pub use shape::TenantSqlShape;

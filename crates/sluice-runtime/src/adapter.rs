use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutionError;

/// Result column description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

/// Rows produced by one physical execution, each row a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Value>,
    pub columns: Vec<ColumnInfo>,
}

/// One dedicated database session.
///
/// Implementations are thin: they run exactly what they are given. Every
/// policy decision has been made before a session is acquired.
#[async_trait]
pub trait SessionConnection: Send {
    /// Open an explicit transaction.
    async fn begin(&mut self, read_only: bool) -> Result<(), ExecutionError>;

    async fn commit(&mut self) -> Result<(), ExecutionError>;

    async fn rollback(&mut self) -> Result<(), ExecutionError>;

    /// Apply the provider's native statement timeout to the open transaction.
    async fn set_statement_timeout(&mut self, timeout: Duration) -> Result<(), ExecutionError>;

    async fn current_role(&mut self) -> Result<String, ExecutionError>;

    /// Read a session parameter. `None` when the provider does not know it.
    async fn read_parameter(&mut self, name: &str) -> Result<Option<String>, ExecutionError>;

    async fn reset_role(&mut self) -> Result<(), ExecutionError>;

    async fn reset_all(&mut self) -> Result<(), ExecutionError>;

    /// Execute a read with bound parameters in placeholder order.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        include_columns: bool,
    ) -> Result<QueryOutput, ExecutionError>;

    /// Close the underlying connection instead of returning it for reuse.
    fn discard(&mut self);
}

/// Hands out sessions for the configured backend.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn SessionConnection>, ExecutionError>;
}

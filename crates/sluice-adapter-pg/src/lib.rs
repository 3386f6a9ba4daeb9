//! Postgres backend for the Sluice gateway.
//!
//! [`PgConnector`] hands out pooled sessions; [`PgSession`] drives one of
//! them through the sandbox's transaction and reset steps. Rows come back as
//! JSON objects built server-side with `to_jsonb`, so column types never
//! need a Rust mapping. Result columns are renamed to unique keys first, so
//! a join that returns two `id` columns keeps both.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sluice_runtime::{ColumnInfo, Connector, ExecutionError, QueryOutput, SessionConnection};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::{Arguments, Column, Executor, PgPool, Postgres, Row, TypeInfo};

pub mod introspect;

pub use introspect::introspect_snapshot;

/// Alias of the derived table the row query selects from.
const ROW_ALIAS: &str = "sluice_row";

#[derive(Debug, Clone, Copy)]
pub struct PgConnectorOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PgConnectorOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Pool-backed [`Connector`].
#[derive(Clone)]
pub struct PgConnector {
    pool: PgPool,
}

impl PgConnector {
    pub async fn connect(database_url: &str, options: PgConnectorOptions) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn acquire(&self) -> Result<Box<dyn SessionConnection>, ExecutionError> {
        let conn = self.pool.acquire().await.map_err(|e| classify(&e))?;
        Ok(Box::new(PgSession { conn }))
    }
}

/// One pooled connection for the duration of a single execution.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

impl PgSession {
    async fn run(&mut self, statement: &str) -> Result<(), ExecutionError> {
        sqlx::query(statement)
            .execute(&mut *self.conn)
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn describe_columns(&mut self, sql: &str) -> Result<Vec<ColumnInfo>, ExecutionError> {
        let described = (&mut *self.conn)
            .describe(sql)
            .await
            .map_err(|e| classify(&e))?;
        Ok(described
            .columns()
            .iter()
            .map(|c| ColumnInfo {
                name: c.name().to_string(),
                data_type: Some(c.type_info().name().to_ascii_lowercase()),
            })
            .collect())
    }
}

#[async_trait]
impl SessionConnection for PgSession {
    async fn begin(&mut self, read_only: bool) -> Result<(), ExecutionError> {
        self.run(if read_only { "BEGIN READ ONLY" } else { "BEGIN" }).await
    }

    async fn commit(&mut self) -> Result<(), ExecutionError> {
        self.run("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), ExecutionError> {
        self.run("ROLLBACK").await
    }

    async fn set_statement_timeout(&mut self, timeout: Duration) -> Result<(), ExecutionError> {
        self.run(&statement_timeout_sql(timeout)).await
    }

    async fn current_role(&mut self) -> Result<String, ExecutionError> {
        let (role,): (String,) = sqlx::query_as("SELECT current_user::text")
            .fetch_one(&mut *self.conn)
            .await
            .map_err(|e| classify(&e))?;
        Ok(role)
    }

    async fn read_parameter(&mut self, name: &str) -> Result<Option<String>, ExecutionError> {
        let (value,): (Option<String>,) = sqlx::query_as("SELECT current_setting($1, true)")
            .bind(name)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(|e| classify(&e))?;
        Ok(value)
    }

    async fn reset_role(&mut self) -> Result<(), ExecutionError> {
        self.run("RESET ROLE").await
    }

    async fn reset_all(&mut self) -> Result<(), ExecutionError> {
        self.run("RESET ALL").await
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        include_columns: bool,
    ) -> Result<QueryOutput, ExecutionError> {
        let described = self.describe_columns(sql).await?;
        let names: Vec<&str> = described.iter().map(|c| c.name.as_str()).collect();
        let keys = unique_keys(&names);

        let args = bind_params(params)?;
        let records = sqlx::query_with(&row_query(sql, &keys), args)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| classify(&e))?;

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let row: Value = record.try_get("row").map_err(|e| classify(&e))?;
            rows.push(row);
        }

        let columns = if include_columns {
            described
                .into_iter()
                .zip(keys)
                .map(|(column, name)| ColumnInfo { name, ..column })
                .collect()
        } else {
            Vec::new()
        };
        Ok(QueryOutput { rows, columns })
    }

    fn discard(&mut self) {
        self.conn.close_on_drop();
    }
}

/// Wrap a statement so every row arrives as one JSON object keyed by `keys`.
fn row_query(sql: &str, keys: &[String]) -> String {
    if keys.is_empty() {
        return format!("SELECT to_jsonb({ROW_ALIAS}) AS row FROM ({sql}) AS {ROW_ALIAS}");
    }
    let columns = keys
        .iter()
        .map(|key| format!("\"{}\"", key.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT to_jsonb({ROW_ALIAS}) AS row FROM ({sql}) AS {ROW_ALIAS}({columns})")
}

/// Object keys for result columns. The first occurrence of a name keeps it;
/// repeats get `_2`, `_3`, ... skipping names already in use.
fn unique_keys(names: &[&str]) -> Vec<String> {
    let mut taken: HashSet<String> = names.iter().map(|n| n.to_string()).collect();
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|&name| {
            if seen.insert(name) {
                return name.to_string();
            }
            let mut n = 2;
            loop {
                let candidate = format!("{name}_{n}");
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

/// `SET LOCAL` takes no bind parameters; the value is always an integer.
fn statement_timeout_sql(timeout: Duration) -> String {
    format!("SET LOCAL statement_timeout = {}", timeout.as_millis().max(1))
}

fn args_add<T>(args: &mut PgArguments, v: T) -> Result<(), ExecutionError>
where
    T: Send + Sync + 'static,
    for<'q> T: sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres>,
{
    args.add(v).map_err(|e| {
        tracing::debug!(error = %e, "parameter encoding failed");
        ExecutionError::Provider {
            code: "BIND_FAILED".to_string(),
        }
    })
}

/// Bind JSON values by their JSON type. Strings bind as `text`, so comparisons
/// against other column types need an explicit cast in the statement.
fn bind_params(params: &[Value]) -> Result<PgArguments, ExecutionError> {
    let mut args = PgArguments::default();
    for value in params {
        match value {
            Value::Null => args_add(&mut args, Option::<String>::None)?,
            Value::Bool(b) => args_add(&mut args, *b)?,
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => args_add(&mut args, i)?,
                (None, Some(f)) => args_add(&mut args, f)?,
                (None, None) => args_add(&mut args, n.to_string())?,
            },
            Value::String(s) => args_add(&mut args, s.clone())?,
            Value::Array(_) | Value::Object(_) => {
                args_add(&mut args, sqlx::types::Json(value.clone()))?
            }
        }
    }
    Ok(args)
}

/// Map a driver error onto the gateway's execution errors. Only the SQLSTATE
/// leaves this function; server messages can quote data and stay in the
/// debug log.
pub fn classify(err: &sqlx::Error) -> ExecutionError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            tracing::debug!(sqlstate = %code, "database error");
            classify_sqlstate(&code)
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ExecutionError::Connectivity,
        other => {
            tracing::debug!(error = %other, "driver error");
            ExecutionError::Provider {
                code: "DRIVER_ERROR".to_string(),
            }
        }
    }
}

fn classify_sqlstate(code: &str) -> ExecutionError {
    match code {
        "40P01" => ExecutionError::Deadlock,
        "40001" => ExecutionError::Serialization,
        "57014" => ExecutionError::Timeout,
        // admin_shutdown, crash_shutdown, cannot_connect_now
        "57P01" | "57P02" | "57P03" => ExecutionError::Connectivity,
        c if c.starts_with("08") => ExecutionError::Connectivity,
        "" => ExecutionError::Provider {
            code: "UNKNOWN".to_string(),
        },
        c => ExecutionError::Provider { code: c.to_string() },
    }
}

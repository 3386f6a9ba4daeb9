//! Shared fixtures: an in-memory session that records every physical call.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use sluice_core::{
    ColumnSchema, GatewayConfig, ProviderKind, SchemaSnapshot, SchemaSnapshotLoader, SnapshotStore,
    TableSchema, TenantIdType,
};
use sluice_runtime::{
    ColumnInfo, Connector, ExecutionError, QueryGateway, QueryOutput, SessionConnection,
};

pub const SECRET: &str = "gateway-test-secret";

/// How sessions handed out by the connector misbehave.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub fail: Option<ExecutionError>,
    pub hang: bool,
    /// `execute` changes `search_path` and `RESET ALL` does not restore it.
    pub drift: bool,
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct Log {
    pub acquires: usize,
    pub executions: Vec<Execution>,
    pub calls: Vec<String>,
}

#[derive(Clone)]
pub struct RecordingConnector {
    log: Arc<Mutex<Log>>,
    rows: Arc<Vec<Value>>,
    behavior: Behavior,
}

impl RecordingConnector {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            log: Arc::new(Mutex::new(Log::default())),
            rows: Arc::new(rows),
            behavior: Behavior::default(),
        }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap()
    }

    pub fn acquires(&self) -> usize {
        self.log().acquires
    }

    pub fn last_execution(&self) -> Execution {
        self.log().executions.last().cloned().expect("no execution recorded")
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn acquire(&self) -> Result<Box<dyn SessionConnection>, ExecutionError> {
        self.log().acquires += 1;
        Ok(Box::new(FakeSession {
            log: Arc::clone(&self.log),
            rows: Arc::clone(&self.rows),
            behavior: self.behavior.clone(),
            search_path: "public".to_string(),
        }))
    }
}

struct FakeSession {
    log: Arc<Mutex<Log>>,
    rows: Arc<Vec<Value>>,
    behavior: Behavior,
    search_path: String,
}

impl FakeSession {
    fn call(&self, name: &str) {
        self.log.lock().unwrap().calls.push(name.to_string());
    }
}

/// Apply a trailing `LIMIT n [OFFSET m]` the way the database would.
fn window(sql: &str, rows: &[Value]) -> Vec<Value> {
    let Some(at) = sql.rfind(" LIMIT ") else {
        return rows.to_vec();
    };
    let mut words = sql[at..].split_whitespace().skip(1);
    let limit: usize = words.next().and_then(|w| w.parse().ok()).unwrap_or(usize::MAX);
    let offset: usize = match words.next() {
        Some("OFFSET") => words.next().and_then(|w| w.parse().ok()).unwrap_or(0),
        _ => 0,
    };
    rows.iter().skip(offset).take(limit).cloned().collect()
}

#[async_trait]
impl SessionConnection for FakeSession {
    async fn begin(&mut self, read_only: bool) -> Result<(), ExecutionError> {
        self.call(if read_only { "begin_read_only" } else { "begin" });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ExecutionError> {
        self.call("commit");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ExecutionError> {
        self.call("rollback");
        Ok(())
    }

    async fn set_statement_timeout(&mut self, _timeout: Duration) -> Result<(), ExecutionError> {
        self.call("set_statement_timeout");
        Ok(())
    }

    async fn current_role(&mut self) -> Result<String, ExecutionError> {
        Ok("sluice_reader".to_string())
    }

    async fn read_parameter(&mut self, name: &str) -> Result<Option<String>, ExecutionError> {
        Ok(match name {
            "search_path" => Some(self.search_path.clone()),
            "statement_timeout" => Some("0".to_string()),
            _ => None,
        })
    }

    async fn reset_role(&mut self) -> Result<(), ExecutionError> {
        self.call("reset_role");
        Ok(())
    }

    async fn reset_all(&mut self) -> Result<(), ExecutionError> {
        self.call("reset_all");
        if !self.behavior.drift {
            self.search_path = "public".to_string();
        }
        Ok(())
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        include_columns: bool,
    ) -> Result<QueryOutput, ExecutionError> {
        self.log.lock().unwrap().executions.push(Execution {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if self.behavior.drift {
            self.search_path = "attacker, public".to_string();
        }
        if self.behavior.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(err) = self.behavior.fail.clone() {
            return Err(err);
        }

        let columns = if include_columns {
            vec![
                ColumnInfo {
                    name: "id".into(),
                    data_type: Some("int8".into()),
                },
                ColumnInfo {
                    name: "status".into(),
                    data_type: Some("text".into()),
                },
            ]
        } else {
            Vec::new()
        };
        Ok(QueryOutput {
            rows: window(sql, &self.rows),
            columns,
        })
    }
    fn discard(&mut self) {
        self.call("discard");
    }
}

pub fn order_rows(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({ "id": i, "tenant_id": 7, "status": "open" }))
        .collect()
}

pub fn snapshot() -> SchemaSnapshot {
    let cols = |names: &[&str]| names.iter().map(|n| ColumnSchema::new(*n)).collect::<Vec<_>>();
    SchemaSnapshot::new(vec![
        TableSchema::new("public", "orders", cols(&["id", "tenant_id", "customer_id", "status"])),
        TableSchema::new("public", "customers", cols(&["id", "tenant_id", "name"])),
        TableSchema::new("public", "currencies", cols(&["code"])),
        TableSchema::new("public", "audit_log", cols(&["id", "message"])),
    ])
}

pub fn config(kind: ProviderKind) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.provider.kind = kind;
    config.tenancy.tenant_id.id_type = TenantIdType::Integer;
    config.tenancy.global_tables.push("currencies".to_string());
    config.cursor.secret = Some(SECRET.to_string());
    config.cursor.secret_env = None;
    config
}

pub fn gateway(config: &GatewayConfig, connector: &RecordingConnector) -> QueryGateway {
    let snapshots: Arc<dyn SchemaSnapshotLoader> = Arc::new(SnapshotStore::with_snapshot(snapshot()));
    QueryGateway::new(config, snapshots, Arc::new(connector.clone()))
}

pub fn ids(rows: &[Value]) -> Vec<u64> {
    rows.iter().filter_map(|r| r["id"].as_u64()).collect()
}

use chrono::Utc;
use sluice_core::{ColumnSchema, SchemaSnapshot, TableSchema};
use sqlx::{PgPool, Row};

/// Capture the table and column layout of every user schema.
/// Excludes system schemas (pg_catalog, information_schema, pg_toast).
pub async fn introspect_snapshot(pool: &PgPool) -> anyhow::Result<SchemaSnapshot> {
    let (version,): (String,) = sqlx::query_as("show server_version")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        select c.table_schema, c.table_name, c.column_name, c.data_type, c.is_nullable
        from information_schema.columns c
        join information_schema.tables t
          on t.table_schema = c.table_schema
         and t.table_name = c.table_name
        where t.table_type in ('BASE TABLE', 'VIEW')
          and c.table_schema not in ('pg_catalog', 'information_schema')
          and c.table_schema not like 'pg_toast%'
        order by c.table_schema, c.table_name, c.ordinal_position
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        columns.push(IntrospectedColumn {
            schema: row.try_get("table_schema")?,
            table: row.try_get("table_name")?,
            column: row.try_get("column_name")?,
            data_type: row.try_get("data_type")?,
            nullable: row.try_get::<String, _>("is_nullable")? == "YES",
        });
    }

    let mut snapshot = SchemaSnapshot::new(group_tables(columns));
    snapshot.version = Some(version);
    snapshot.captured_at = Some(Utc::now().to_rfc3339());
    tracing::info!(
        tables = snapshot.tables.len(),
        fingerprint = %snapshot.fingerprint(),
        "schema introspected"
    );
    Ok(snapshot)
}

struct IntrospectedColumn {
    schema: String,
    table: String,
    column: String,
    data_type: String,
    nullable: bool,
}

/// Fold ordered column rows into tables, preserving column order.
fn group_tables(columns: Vec<IntrospectedColumn>) -> Vec<TableSchema> {
    let mut tables: Vec<TableSchema> = Vec::new();
    for col in columns {
        let column = ColumnSchema {
            nullable: col.nullable,
            ..ColumnSchema::new(col.column).with_type(col.data_type)
        };
        match tables.last_mut() {
            Some(t) if t.schema == col.schema && t.name == col.table => t.columns.push(column),
            _ => tables.push(TableSchema::new(col.schema, col.table, vec![column])),
        }
    }
    tables
}

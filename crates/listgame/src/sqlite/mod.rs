use std::path::Path;

use anyhow::{Context, Result, anyhow};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use serde_json::{Map, Value};
use tracing::info;

use crate::catalog::{Catalog, ContextKind, FieldSpec, ID_FIELD, JOIN_KEY_FIELD, ScalarKind};
use crate::utils::time::normalize_event_time;

pub const DEFAULT_INSERT_BATCH_SIZE: usize = 500;

pub type EventRecord = Map<String, Value>;

pub fn open_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create sqlite parent directory: {}",
                parent.display()
            )
        })?;
    }

    Connection::open(path)
        .with_context(|| format!("failed to open sqlite database: {}", path.display()))
}

/// DDL for every context table under every game type: the catalog's columns,
/// plus indexes on the join key and the default row sort.
#[must_use]
pub fn schema_statements(catalog: &Catalog) -> Vec<String> {
    let mut statements = Vec::new();
    for game in catalog.game_types().keys() {
        for kind in [ContextKind::Game, ContextKind::Milestone] {
            let table = catalog.table_name(kind, game);
            let context = catalog.context(kind);
            let columns: Vec<String> = context
                .fields()
                .iter()
                .map(|field| column_definition(field))
                .collect();
            statements.push(format!(
                "CREATE TABLE IF NOT EXISTS {table} (\n    {}\n);",
                columns.join(",\n    ")
            ));
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{JOIN_KEY_FIELD} ON {table} ({JOIN_KEY_FIELD});"
            ));
            if let Some(sort) = context.field(context.default_sort()) {
                statements.push(format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column}, {ID_FIELD});",
                    column = sort.column
                ));
            }
        }
    }
    statements
}

#[must_use]
pub fn create_schema_sql(catalog: &Catalog) -> String {
    schema_statements(catalog).join("\n")
}

pub fn ensure_sqlite_schema(connection: &Connection, catalog: &Catalog) -> Result<()> {
    connection
        .execute_batch(&create_schema_sql(catalog))
        .context("failed to create sqlite schema")
}

/// Inserts event records into one context table. Records are JSON objects
/// keyed by field name (or physical column); absent fields are stored as
/// NULL and unknown keys are ignored.
pub fn insert_records(
    connection: &mut Connection,
    catalog: &Catalog,
    kind: ContextKind,
    game: &str,
    records: &[EventRecord],
) -> Result<usize> {
    let table = catalog.table_name(kind, game);
    let fields: Vec<&FieldSpec> = catalog
        .context(kind)
        .fields()
        .iter()
        .filter(|field| field.name != ID_FIELD)
        .collect();
    let insert_sql = build_insert_sql(&table, &fields);
    let mut records_written = 0usize;

    for batch in records.chunks(DEFAULT_INSERT_BATCH_SIZE) {
        let tx = connection
            .transaction()
            .context("failed to open sqlite transaction")?;
        {
            let mut statement = tx
                .prepare_cached(&insert_sql)
                .context("failed to prepare sqlite insert statement")?;

            for record in batch {
                let values = record_values(record, &fields)
                    .with_context(|| format!("invalid record #{}", records_written + 1))?;
                statement
                    .execute(params_from_iter(values))
                    .with_context(|| format!("failed to insert record #{}", records_written + 1))?;
                records_written += 1;
            }
        }
        tx.commit()
            .context("failed to commit sqlite batch transaction")?;
    }

    info!(table = %table, records = records_written, "loaded event records");
    Ok(records_written)
}

/// Reads one JSON object per non-blank line.
pub fn parse_jsonl_records(input: &str) -> Result<Vec<EventRecord>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            match serde_json::from_str::<Value>(line)
                .with_context(|| format!("invalid json on line {}", index + 1))?
            {
                Value::Object(record) => Ok(record),
                _ => Err(anyhow!("line {} is not a json object", index + 1)),
            }
        })
        .collect()
}

fn column_definition(field: &FieldSpec) -> String {
    if field.name == ID_FIELD {
        format!("{} INTEGER PRIMARY KEY", field.column)
    } else {
        format!("{} {}", field.column, field.kind.sql_type())
    }
}

fn build_insert_sql(table: &str, fields: &[&FieldSpec]) -> String {
    let columns: Vec<&str> = fields.iter().map(|field| field.column.as_str()).collect();
    let placeholders = (1..=fields.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        columns.join(", ")
    )
}

fn record_values(record: &EventRecord, fields: &[&FieldSpec]) -> Result<Vec<SqlValue>> {
    fields
        .iter()
        .map(|field| {
            let value = record
                .get(&field.name)
                .or_else(|| record.get(&field.column))
                .unwrap_or(&Value::Null);
            sql_value(field, value)
        })
        .collect()
}

fn sql_value(field: &FieldSpec, value: &Value) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    let bad = || anyhow!("field `{}` expects {}: {value}", field.name, field.kind.key());
    Ok(match field.kind {
        ScalarKind::Integer => match value {
            Value::Number(number) => SqlValue::Integer(number.as_i64().ok_or_else(bad)?),
            Value::String(text) => SqlValue::Integer(text.trim().parse().map_err(|_| bad())?),
            Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
            _ => return Err(bad()),
        },
        ScalarKind::Boolean => {
            let flag = match value {
                Value::Bool(flag) => *flag,
                Value::Number(number) => number.as_i64().ok_or_else(bad)? != 0,
                Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                    "y" | "yes" | "true" | "1" => true,
                    "n" | "no" | "false" | "0" | "" => false,
                    _ => return Err(bad()),
                },
                _ => return Err(bad()),
            };
            SqlValue::Integer(i64::from(flag))
        }
        ScalarKind::Date => {
            let raw = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                _ => return Err(bad()),
            };
            SqlValue::Text(
                normalize_event_time(&raw)
                    .with_context(|| format!("field `{}` has an invalid timestamp", field.name))?,
            )
        }
        ScalarKind::Text => match value {
            Value::String(text) => SqlValue::Text(text.clone()),
            Value::Number(_) | Value::Bool(_) => SqlValue::Text(value.to_string()),
            _ => return Err(bad()),
        },
    })
}

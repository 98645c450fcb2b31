use std::time::Duration;

use base64::Engine as _;
use futures_util::TryStreamExt;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sqlgate_protocol::{ColumnSchema, RawSchema, Row, TableSchema};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Executor, PgPool, Row as _, Statement, TypeInfo, ValueRef};
use std::collections::HashSet;

use crate::execute::Fetched;
use crate::TargetError;

const TABLES_SQL: &str = r#"
SELECT table_schema::text, table_name::text
FROM information_schema.tables
WHERE table_type = 'BASE TABLE'
  AND table_schema NOT IN ('pg_catalog', 'information_schema')
ORDER BY table_schema, table_name
"#;

const COLUMNS_SQL: &str = r#"
SELECT column_name::text,
       data_type::text,
       udt_name::text,
       character_maximum_length::int4,
       numeric_precision::int4,
       numeric_scale::int4,
       is_nullable::text
FROM information_schema.columns
WHERE table_schema = $1 AND table_name = $2
ORDER BY ordinal_position
"#;

const CONSTRAINT_COLUMNS_SQL: &str = r#"
SELECT kcu.column_name::text
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON tc.constraint_name = kcu.constraint_name
 AND tc.table_schema = kcu.table_schema
 AND tc.table_name = kcu.table_name
WHERE tc.table_schema = $1 AND tc.table_name = $2 AND tc.constraint_type = $3
"#;

type ColumnRow = (
    String,
    String,
    String,
    Option<i32>,
    Option<i32>,
    Option<i32>,
    String,
);

/// Session settings applied to every pooled connection.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PgSession {
    pub timeout: Duration,
    pub read_only: bool,
}

/// A single-connection pool scoped to one call; callers close it.
pub(crate) async fn connect(url: &str, session: PgSession) -> Result<PgPool, TargetError> {
    let statement_timeout = format!(
        "SET statement_timeout = {}",
        session.timeout.as_millis().max(1)
    );
    let read_only = session.read_only;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(session.timeout)
        .after_connect(move |conn, _meta| {
            let statement_timeout = statement_timeout.clone();
            Box::pin(async move {
                (&mut *conn).execute(statement_timeout.as_str()).await?;
                if read_only {
                    (&mut *conn)
                        .execute("SET default_transaction_read_only = on")
                        .await?;
                }
                Ok(())
            })
        })
        .connect(url)
        .await?;
    Ok(pool)
}

pub(crate) async fn discover(url: &str, session: PgSession) -> Result<RawSchema, TargetError> {
    let pool = connect(url, session).await?;
    let out = introspect(&pool).await;
    pool.close().await;
    out
}

async fn introspect(pool: &PgPool) -> Result<RawSchema, TargetError> {
    let database = sqlx::query_scalar::<_, String>("SELECT current_database()::text")
        .fetch_one(pool)
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    let names = sqlx::query_as::<_, (String, String)>(TABLES_SQL)
        .fetch_all(pool)
        .await?;
    let mut tables = Vec::with_capacity(names.len());
    for (schema, name) in names {
        let rows = sqlx::query_as::<_, ColumnRow>(COLUMNS_SQL)
            .bind(&schema)
            .bind(&name)
            .fetch_all(pool)
            .await?;
        let pk = constraint_columns(pool, &schema, &name, "PRIMARY KEY").await?;
        let unique = constraint_columns(pool, &schema, &name, "UNIQUE").await?;
        let columns = rows
            .into_iter()
            .map(
                |(col, data_type, udt_name, char_len, precision, scale, is_nullable)| ColumnSchema {
                    r#type: compose_pg_type(&data_type, &udt_name, char_len, precision, scale),
                    nullable: is_nullable.eq_ignore_ascii_case("yes"),
                    primary_key: pk.contains(&col),
                    unique: unique.contains(&col),
                    name: col,
                    description: None,
                },
            )
            .collect();
        tables.push(TableSchema {
            schema,
            name,
            columns,
            description: None,
            sample_query: None,
        });
    }
    Ok(RawSchema { database, tables })
}

async fn constraint_columns(
    pool: &PgPool,
    schema: &str,
    table: &str,
    constraint_type: &str,
) -> Result<HashSet<String>, TargetError> {
    let cols = sqlx::query_scalar::<_, String>(CONSTRAINT_COLUMNS_SQL)
        .bind(schema)
        .bind(table)
        .bind(constraint_type)
        .fetch_all(pool)
        .await?;
    Ok(cols.into_iter().collect())
}

/// Readable column type from `information_schema.columns`: length and
/// precision folded in, integer aliases spelled out, anything unmapped
/// reported as its `data_type`.
pub fn compose_pg_type(
    data_type: &str,
    udt_name: &str,
    char_len: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> String {
    let positive = |v: Option<i32>| v.filter(|n| *n > 0);
    match udt_name {
        "varchar" | "bpchar" => match positive(char_len) {
            Some(n) => format!("varchar({})", n),
            None => "varchar".to_string(),
        },
        "int2" => "smallint".to_string(),
        "int4" => "integer".to_string(),
        "int8" => "bigint".to_string(),
        "numeric" => match (positive(precision), scale) {
            (Some(p), Some(s)) => format!("numeric({},{})", p, s),
            (Some(p), None) => format!("numeric({})", p),
            (None, _) => "numeric".to_string(),
        },
        "timestamp" | "timestamptz" | "json" | "jsonb" | "text" => udt_name.to_string(),
        "bool" => "boolean".to_string(),
        _ => data_type.to_string(),
    }
}

/// Prepare `sql` once for its column list, then stream rows up to the cap.
pub(crate) async fn fetch(pool: &PgPool, sql: &str, max_rows: usize) -> Result<Fetched, TargetError> {
    let mut conn = pool.acquire().await?;
    let stmt = (&mut *conn).prepare(sql).await?;
    let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
    let mut rows = stmt.query().fetch(&mut *conn);
    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.try_next().await? {
        if out.len() >= max_rows {
            truncated = true;
            break;
        }
        let mut map = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            map.insert(name.clone(), json_value(&row, idx)?);
        }
        out.push(map);
    }
    Ok(Fetched {
        columns,
        rows: out,
        truncated,
    })
}

fn json_value(row: &PgRow, idx: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => Value::from(row.try_get::<bool, _>(idx)?),
        "INT2" => Value::from(row.try_get::<i16, _>(idx)?),
        "INT4" => Value::from(row.try_get::<i32, _>(idx)?),
        "INT8" => Value::from(row.try_get::<i64, _>(idx)?),
        "FLOAT4" => float(f64::from(row.try_get::<f32, _>(idx)?)),
        "FLOAT8" => float(row.try_get::<f64, _>(idx)?),
        "NUMERIC" => {
            let dec = row.try_get::<rust_decimal::Decimal, _>(idx)?;
            match dec.to_f64() {
                Some(f) => float(f),
                None => Value::String(dec.to_string()),
            }
        }
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
            Value::String(row.try_get::<String, _>(idx)?)
        }
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx)?,
        "UUID" => Value::String(row.try_get::<uuid::Uuid, _>(idx)?.to_string()),
        "DATE" => Value::String(row.try_get::<chrono::NaiveDate, _>(idx)?.to_string()),
        "TIME" => Value::String(row.try_get::<chrono::NaiveTime, _>(idx)?.to_string()),
        "TIMESTAMP" => Value::String(row.try_get::<chrono::NaiveDateTime, _>(idx)?.to_string()),
        "TIMESTAMPTZ" => Value::String(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)?
                .to_rfc3339(),
        ),
        "BYTEA" => Value::String(
            base64::engine::general_purpose::STANDARD.encode(row.try_get::<Vec<u8>, _>(idx)?),
        ),
        other => Value::String(format!("<{}>", other.to_ascii_lowercase())),
    };
    Ok(value)
}

fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

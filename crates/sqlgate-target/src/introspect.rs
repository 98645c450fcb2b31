use rusqlite::{params, Connection};
use sqlgate_protocol::{ColumnSchema, RawSchema, TableSchema};
use std::collections::HashSet;
use std::time::Duration;

use crate::pg::{self, PgSession};
use crate::{TargetDsn, TargetError};

const SQLITE_SCHEMA: &str = "main";

/// Bound on connecting to and reading the catalog of a Postgres target.
const PG_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking introspection of a SQLite target's base tables, excluding
/// engine-internal ones. Postgres targets go through [`discover_async`].
pub fn discover(connection_string: &str) -> Result<RawSchema, TargetError> {
    let dsn = TargetDsn::parse(connection_string)?;
    let conn = dsn.open_sqlite(true)?;
    let tables = sqlite_tables(&conn)?
        .into_iter()
        .map(|name| sqlite_table(&conn, name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RawSchema {
        database: dsn.database_name(),
        tables,
    })
}

/// Base tables and columns of any supported target. Postgres skips
/// `pg_catalog` and `information_schema`.
pub async fn discover_async(connection_string: &str) -> Result<RawSchema, TargetError> {
    if let TargetDsn::Postgres(url) = TargetDsn::parse(connection_string)? {
        let session = PgSession {
            timeout: PG_DISCOVERY_TIMEOUT,
            read_only: true,
        };
        return pg::discover(&url, session).await;
    }
    let cs = connection_string.to_string();
    tokio::task::spawn_blocking(move || discover(&cs))
        .await
        .map_err(|e| TargetError::Join(e.to_string()))?
}

fn sqlite_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
    names.collect()
}

fn sqlite_table(conn: &Connection, name: String) -> rusqlite::Result<TableSchema> {
    let unique = sqlite_unique_columns(conn, &name)?;
    let mut stmt =
        conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")?;
    let mut rows = stmt.query(params![name])?;
    let mut columns = Vec::new();
    while let Some(r) = rows.next()? {
        let col_name: String = r.get(0)?;
        let declared: Option<String> = r.get(1)?;
        let not_null: i64 = r.get(2)?;
        let pk: i64 = r.get(3)?;
        columns.push(ColumnSchema {
            r#type: compose_type(declared.as_deref().unwrap_or_default()),
            nullable: not_null == 0 && pk == 0,
            primary_key: pk > 0,
            unique: unique.contains(&col_name),
            name: col_name,
            description: None,
        });
    }
    Ok(TableSchema {
        schema: SQLITE_SCHEMA.to_string(),
        name,
        columns,
        description: None,
        sample_query: None,
    })
}

/// Columns taking part in a UNIQUE constraint (index origin `u`).
fn sqlite_unique_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut idx_stmt = conn.prepare("SELECT name, origin FROM pragma_index_list(?1)")?;
    let indexes = idx_stmt
        .query_map(params![table], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut out = HashSet::new();
    let mut col_stmt = conn.prepare("SELECT name FROM pragma_index_info(?1)")?;
    for (index, origin) in indexes {
        if origin != "u" {
            continue;
        }
        let cols = col_stmt.query_map(params![index], |row| row.get::<_, Option<String>>(0))?;
        for col in cols {
            if let Some(col) = col? {
                out.insert(col);
            }
        }
    }
    Ok(out)
}

/// Normalise a declared column type: lowercase, single spaces, no padding
/// around parentheses or commas, so `NUMERIC(10, 2)` becomes `numeric(10,2)`.
/// Columns without a declared type have BLOB affinity.
pub fn compose_type(declared: &str) -> String {
    let collapsed = declared
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    if collapsed.is_empty() {
        return "blob".to_string();
    }
    let mut out = String::with_capacity(collapsed.len());
    for ch in collapsed.chars() {
        match ch {
            '(' | ',' | ')' => {
                while out.ends_with(' ') {
                    out.pop();
                }
                out.push(ch);
            }
            ' ' if out.ends_with(['(', ',']) => {}
            _ => out.push(ch),
        }
    }
    out
}

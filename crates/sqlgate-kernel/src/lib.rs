use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sqlgate_protocol::{
    ConnectionDescriptor, ConnectionId, HistoryEntry, HistoryRecord, SchemaSnapshot,
    SnapshotSource, TableSchema,
};
use std::path::{Path, PathBuf};

mod stores;

pub use stores::{ConnectionStore, HistoryStore, SnapshotStore};

const DB_FILE: &str = "sqlgate.sqlite";
const BUSY_TIMEOUT_MS: u64 = 5000;

/// The service's own state: connection records, schema snapshots and the
/// query history log, in one SQLite file under the state directory.
#[derive(Clone)]
pub struct Kernel {
    db_path: PathBuf,
}

const HISTORY_COLUMNS: &str = "id,connection_id,prompt,sql,row_count,execution_time_ms,success,error,pinned,created_at,last_run_at";

impl Kernel {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join(DB_FILE);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        // Keep temp tables in memory
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");
        Self::init_schema(&conn)?;
        Ok(Self { db_path })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
              id INTEGER PRIMARY KEY,
              name TEXT NOT NULL,
              connection_string TEXT NOT NULL,
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );

            -- One live snapshot per connection; rediscovery replaces it
            CREATE TABLE IF NOT EXISTS schema_snapshots (
              connection_id INTEGER PRIMARY KEY,
              database TEXT NOT NULL,
              source TEXT NOT NULL,      -- llm | raw
              tables TEXT NOT NULL,      -- JSON array of tables
              updated TEXT NOT NULL
            );

            -- Append-only log of execution attempts
            CREATE TABLE IF NOT EXISTS query_history (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              connection_id INTEGER NOT NULL,
              prompt TEXT,
              sql TEXT NOT NULL,
              row_count INTEGER NOT NULL,
              execution_time_ms INTEGER NOT NULL,
              success INTEGER NOT NULL,
              error TEXT,
              pinned INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL,
              last_run_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_history_order ON query_history(pinned, created_at);
            CREATE INDEX IF NOT EXISTS idx_history_conn ON query_history(connection_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------- Connections ----------
    pub fn upsert_connection(&self, desc: &ConnectionDescriptor) -> Result<()> {
        let conn = self.conn()?;
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO connections(id,name,connection_string,created,updated) VALUES(?,?,?,?,?)
             ON CONFLICT(id) DO UPDATE SET name=excluded.name,
               connection_string=excluded.connection_string, updated=excluded.updated",
            params![desc.id, desc.name, desc.connection_string, now, now],
        )?;
        Ok(())
    }

    pub fn get_connection(&self, id: ConnectionId) -> Result<Option<ConnectionDescriptor>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id,name,connection_string FROM connections WHERE id=?",
                params![id],
                |r| {
                    Ok(ConnectionDescriptor {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        connection_string: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_connections(&self) -> Result<Vec<ConnectionDescriptor>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id,name,connection_string FROM connections ORDER BY id")?;
        let rows = stmt.query_map([], |r| {
            Ok(ConnectionDescriptor {
                id: r.get(0)?,
                name: r.get(1)?,
                connection_string: r.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---------- Schema snapshots ----------
    pub fn upsert_snapshot(&self, snapshot: &SchemaSnapshot) -> Result<()> {
        let conn = self.conn()?;
        let tables = serde_json::to_string(&snapshot.tables)?;
        conn.execute(
            "INSERT INTO schema_snapshots(connection_id,database,source,tables,updated) VALUES(?,?,?,?,?)
             ON CONFLICT(connection_id) DO UPDATE SET database=excluded.database,
               source=excluded.source, tables=excluded.tables, updated=excluded.updated",
            params![
                snapshot.connection_id,
                snapshot.database,
                source_str(snapshot.source),
                tables,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn get_snapshot(&self, connection_id: ConnectionId) -> Result<Option<SchemaSnapshot>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT database,source,tables FROM schema_snapshots WHERE connection_id=?",
                params![connection_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((database, source, tables)) = row else {
            return Ok(None);
        };
        let tables: Vec<TableSchema> = serde_json::from_str(&tables)
            .map_err(|e| anyhow!("corrupt snapshot for connection {}: {}", connection_id, e))?;
        Ok(Some(SchemaSnapshot {
            connection_id,
            database,
            source: parse_source(&source),
            tables,
        }))
    }

    // ---------- Query history ----------
    pub fn append_history(&self, entry: &HistoryEntry) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO query_history(connection_id,prompt,sql,row_count,execution_time_ms,success,error,pinned,created_at)
             VALUES(?,?,?,?,?,?,?,0,?)",
            params![
                entry.connection_id,
                entry.prompt,
                entry.sql,
                entry.row_count,
                entry.execution_time_ms,
                entry.success,
                entry.error,
                now_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Pinned records first, then most recent first.
    pub fn list_history(&self, limit: i64) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM query_history ORDER BY pinned DESC, created_at DESC, id DESC LIMIT ?",
            HISTORY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit], history_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_history(&self, id: i64) -> Result<Option<HistoryRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM query_history WHERE id=?", HISTORY_COLUMNS),
                params![id],
                history_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn set_history_pinned(&self, id: i64, pinned: bool) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE query_history SET pinned=? WHERE id=?",
            params![pinned, id],
        )?;
        Ok(n > 0)
    }

    pub fn mark_history_rerun(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE query_history SET last_run_at=? WHERE id=?",
            params![now_rfc3339(), id],
        )?;
        Ok(n > 0)
    }

    pub fn delete_history(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM query_history WHERE id=?", params![id])?;
        Ok(n > 0)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------

    pub async fn upsert_connection_async(&self, desc: &ConnectionDescriptor) -> Result<()> {
        let k = self.clone();
        let desc = desc.clone();
        tokio::task::spawn_blocking(move || k.upsert_connection(&desc))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_connection_async(
        &self,
        id: ConnectionId,
    ) -> Result<Option<ConnectionDescriptor>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.get_connection(id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn upsert_snapshot_async(&self, snapshot: &SchemaSnapshot) -> Result<()> {
        let k = self.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || k.upsert_snapshot(&snapshot))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_snapshot_async(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<SchemaSnapshot>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.get_snapshot(connection_id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn append_history_async(&self, entry: HistoryEntry) -> Result<i64> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.append_history(&entry))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_history_async(&self, limit: i64) -> Result<Vec<HistoryRecord>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.list_history(limit))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_history_async(&self, id: i64) -> Result<Option<HistoryRecord>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.get_history(id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn set_history_pinned_async(&self, id: i64, pinned: bool) -> Result<bool> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.set_history_pinned(id, pinned))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn mark_history_rerun_async(&self, id: i64) -> Result<bool> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.mark_history_rerun(id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn delete_history_async(&self, id: i64) -> Result<bool> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.delete_history(id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }
}

fn history_row(r: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    Ok(HistoryRecord {
        id: r.get(0)?,
        connection_id: r.get(1)?,
        prompt: r.get(2)?,
        sql: r.get(3)?,
        row_count: r.get(4)?,
        execution_time_ms: r.get(5)?,
        success: r.get(6)?,
        error: r.get(7)?,
        pinned: r.get(8)?,
        created_at: r.get(9)?,
        last_run_at: r.get(10)?,
    })
}

fn source_str(source: SnapshotSource) -> &'static str {
    match source {
        SnapshotSource::Llm => "llm",
        SnapshotSource::Raw => "raw",
    }
}

fn parse_source(s: &str) -> SnapshotSource {
    match s {
        "llm" => SnapshotSource::Llm,
        _ => SnapshotSource::Raw,
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

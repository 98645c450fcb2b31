use base64::Engine as _;
use rusqlite::types::ValueRef;
use rusqlite::InterruptHandle;
use serde_json::Value;
use sqlgate_protocol::{ExecutionResult, Row};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::pg::{self, PgSession};
use crate::{TargetDsn, TargetError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub max_rows: usize,
    pub read_only: bool,
}

/// Shared between the awaiting side and the blocking worker so a timeout
/// can interrupt the statement that is actually running.
#[derive(Default)]
struct InterruptSlot {
    cancelled: bool,
    handle: Option<InterruptHandle>,
}

/// Run `sql` against the target, returning at most `limits.max_rows` rows.
///
/// Never returns an error: engine failures, bad connection strings and
/// timeouts all come back as `ExecutionResult { success: false, .. }`. The
/// connection is opened inside the call and dropped on every exit path.
pub async fn execute(
    connection_string: &str,
    sql: &str,
    limits: ExecutionLimits,
) -> ExecutionResult {
    let started = Instant::now();
    let dsn = match TargetDsn::parse(connection_string) {
        Ok(dsn) => dsn,
        Err(err) => return ExecutionResult::failure(sql, elapsed_ms(started), err.to_string()),
    };
    if let TargetDsn::Postgres(url) = &dsn {
        return execute_pg(url, sql, limits, started).await;
    }

    let slot = Arc::new(Mutex::new(InterruptSlot::default()));
    let worker_slot = slot.clone();
    let worker_sql = sql.to_string();
    let task = tokio::task::spawn_blocking(move || {
        run_blocking(&dsn, &worker_sql, limits, &worker_slot)
    });

    let outcome = tokio::time::timeout(limits.timeout, task).await;
    let elapsed = elapsed_ms(started);
    match outcome {
        Ok(Ok(run)) => finish(sql, run, limits, elapsed),
        Ok(Err(join)) => {
            let err = TargetError::Join(join.to_string());
            ExecutionResult::failure(sql, elapsed, err.to_string())
        }
        Err(_) => {
            interrupt(&slot);
            timed_out(sql, limits, elapsed)
        }
    }
}

/// The pool is closed on every exit path, including timeout; the server-side
/// `statement_timeout` stops the statement itself.
async fn execute_pg(url: &str, sql: &str, limits: ExecutionLimits, started: Instant) -> ExecutionResult {
    let session = PgSession {
        timeout: limits.timeout,
        read_only: limits.read_only,
    };
    let pool = match pg::connect(url, session).await {
        Ok(pool) => pool,
        Err(err) => return ExecutionResult::failure(sql, elapsed_ms(started), err.to_string()),
    };
    let outcome = tokio::time::timeout(limits.timeout, pg::fetch(&pool, sql.trim(), limits.max_rows)).await;
    pool.close().await;
    let elapsed = elapsed_ms(started);
    match outcome {
        Ok(run) => finish(sql, run, limits, elapsed),
        Err(_) => timed_out(sql, limits, elapsed),
    }
}

fn finish(
    sql: &str,
    run: Result<Fetched, TargetError>,
    limits: ExecutionLimits,
    elapsed: u64,
) -> ExecutionResult {
    match run {
        Ok(run) => {
            let mut res = ExecutionResult::success(sql, run.columns, run.rows, elapsed);
            if run.truncated {
                res.warnings
                    .push(format!("result truncated to {} rows", limits.max_rows));
            }
            debug!(rows = res.row_count, elapsed_ms = elapsed, "statement finished");
            res
        }
        Err(err) => ExecutionResult::failure(sql, elapsed, err.to_string()),
    }
}

fn timed_out(sql: &str, limits: ExecutionLimits, elapsed: u64) -> ExecutionResult {
    warn!(timeout_s = limits.timeout.as_secs(), "statement timed out");
    ExecutionResult::failure(
        sql,
        elapsed,
        format!(
            "statement exceeded the {}s execution timeout and was cancelled",
            limits.timeout.as_secs()
        ),
    )
}

/// Rows read from either engine, before they become an `ExecutionResult`.
pub(crate) struct Fetched {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub truncated: bool,
}

fn run_blocking(
    dsn: &TargetDsn,
    sql: &str,
    limits: ExecutionLimits,
    slot: &Mutex<InterruptSlot>,
) -> Result<Fetched, TargetError> {
    let conn = dsn.open_sqlite(limits.read_only)?;
    conn.busy_timeout(limits.timeout)?;
    {
        let mut guard = slot
            .lock()
            .map_err(|_| TargetError::Join("interrupt slot poisoned".into()))?;
        if guard.cancelled {
            return Err(TargetError::Cancelled);
        }
        guard.handle = Some(conn.get_interrupt_handle());
    }

    let mut stmt = conn.prepare(sql.trim())?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if out.len() >= limits.max_rows {
            truncated = true;
            break;
        }
        let mut map = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            map.insert(name.clone(), json_value(row.get_ref(idx)?));
        }
        out.push(map);
    }
    Ok(Fetched {
        columns,
        rows: out,
        truncated,
    })
}

fn interrupt(slot: &Mutex<InterruptSlot>) {
    if let Ok(mut guard) = slot.lock() {
        guard.cancelled = true;
        if let Some(handle) = guard.handle.as_ref() {
            handle.interrupt();
        }
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

//! Data types shared by the sqlgate crates: schema snapshots, generated
//! statements, guardrail decisions, execution results and history records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use utoipa::ToSchema;

/// Identifier of a stored target connection.
pub type ConnectionId = i64;

/// A single result row keyed by column name.
pub type Row = Map<String, Value>;

/// RFC7807-style error payload used at service edges.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Identity and connection string of one target database.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, ToSchema)]
pub struct ConnectionDescriptor {
    pub id: ConnectionId,
    pub name: String,
    pub connection_string: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, ToSchema)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, ToSchema)]
pub struct TableSchema {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_query: Option<String>,
}

/// Table names mapped to their column names.
pub type EntitySet = BTreeMap<String, BTreeSet<String>>;

/// Structure exactly as reported by the target's system catalog.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, ToSchema)]
pub struct RawSchema {
    pub database: String,
    pub tables: Vec<TableSchema>,
}

impl RawSchema {
    pub fn entity_set(&self) -> EntitySet {
        entity_set(&self.tables)
    }
}

/// Where the persisted table descriptions came from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Model annotations merged onto the introspected structure.
    Llm,
    /// Introspected structure verbatim.
    Raw,
}

/// Persisted, verified schema description of one connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, ToSchema)]
pub struct SchemaSnapshot {
    pub connection_id: ConnectionId,
    pub database: String,
    pub source: SnapshotSource,
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    pub fn entity_set(&self) -> EntitySet {
        entity_set(&self.tables)
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }
}

fn entity_set(tables: &[TableSchema]) -> EntitySet {
    tables
        .iter()
        .map(|t| {
            (
                t.name.clone(),
                t.columns.iter().map(|c| c.name.clone()).collect(),
            )
        })
        .collect()
}

/// A candidate statement produced from a natural-language prompt.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema, ToSchema)]
pub struct GeneratedQuery {
    pub sql: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub confidence: f64,
    pub generation_time_ms: u64,
    /// Set when the statement is the inert fallback rather than model output.
    #[serde(default)]
    pub degraded: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, ToSchema)]
pub struct GuardrailDecision {
    pub is_safe: bool,
    pub warnings: Vec<String>,
    pub block: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema, ToSchema)]
pub struct ExecutionResult {
    pub success: bool,
    pub columns: Vec<String>,
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub sql_executed: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(
        sql: &str,
        columns: Vec<String>,
        rows: Vec<Row>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            success: true,
            columns,
            row_count: rows.len(),
            rows,
            execution_time_ms,
            sql_executed: sql.to_string(),
            warnings: Vec::new(),
            error: None,
        }
    }

    /// A failed run never carries rows or columns.
    pub fn failure(sql: &str, execution_time_ms: u64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms,
            sql_executed: sql.to_string(),
            warnings: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// An execution attempt about to be appended to the history log.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, ToSchema)]
pub struct HistoryEntry {
    pub connection_id: ConnectionId,
    #[serde(default)]
    pub prompt: Option<String>,
    pub sql: String,
    pub row_count: i64,
    pub execution_time_ms: i64,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn from_result(
        connection_id: ConnectionId,
        prompt: Option<&str>,
        result: &ExecutionResult,
    ) -> Self {
        Self {
            connection_id,
            prompt: prompt.map(str::to_string),
            sql: result.sql_executed.clone(),
            row_count: result.row_count as i64,
            execution_time_ms: result.execution_time_ms as i64,
            success: result.success,
            error: result.error.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, ToSchema)]
pub struct HistoryRecord {
    pub id: i64,
    pub connection_id: ConnectionId,
    #[serde(default)]
    pub prompt: Option<String>,
    pub sql: String,
    pub row_count: i64,
    pub execution_time_ms: i64,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub pinned: bool,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_chart_rows() -> usize {
    200
}

/// Natural-language request for a statement.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
pub struct GenerateRequest {
    pub prompt: String,
    pub connection_id: ConnectionId,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_true")]
    pub include_schema: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
pub struct ExecuteRequest {
    pub sql: String,
    pub connection_id: ConnectionId,
    /// Run the guardrail even when approval is not globally required.
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Result set handed to a chart advisor.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
pub struct ChartRequest {
    pub columns: Vec<String>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Row>,
    /// Rows the advisor may inspect.
    #[serde(default = "default_chart_rows")]
    pub max_rows: usize,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Chart type plus the column mapping a front end needs to draw it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartSuggestion {
    pub r#type: String,
    pub x_key: Option<String>,
    pub y_key: Option<String>,
    pub y_keys: Option<Vec<String>>,
    pub title: Option<String>,
    pub group_by: Option<String>,
    /// One of `count`, `sum`, `avg`.
    pub agg: Option<String>,
    pub value_key: Option<String>,
}

impl ChartSuggestion {
    pub fn bar() -> Self {
        Self {
            r#type: "bar".into(),
            x_key: None,
            y_key: None,
            y_keys: None,
            title: None,
            group_by: None,
            agg: None,
            value_key: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
pub struct GenerateExecuteSuggestResponse {
    pub sql: String,
    pub execution: ExecutionResult,
    pub chart: ChartSuggestion,
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sqlgate_kernel::SnapshotStore;
use sqlgate_protocol::{ConnectionId, EntitySet, RawSchema, SchemaSnapshot, SnapshotSource};
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::llm::{ChatMessage, ChatRequest, LlmClient};

pub const SNAPSHOT_MISSING: &str = "No schema snapshot. Please run discovery.";

const NORMALIZE_PROMPT: &str = "You are a database architect. Annotate the following database schema as JSON with keys: \
database, tables:[{schema,name,description?,sample_query?,columns:[{name,type,description?}]}]. \
CRITICAL: Do not invent or remove tables or columns. Keep exactly the same tables and columns as provided in Raw schema. \
Only return JSON, no extra text.\n\nRaw schema:\n";

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[a-zA-Z]*\n|\n?```$").expect("fence regex"));

/// The only parts of a model reply that survive normalization.
#[derive(Debug, Deserialize)]
struct AnnotatedSchema {
    #[serde(default)]
    tables: Vec<AnnotatedTable>,
}

#[derive(Debug, Deserialize)]
struct AnnotatedTable {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    sample_query: Option<String>,
    #[serde(default)]
    columns: Vec<AnnotatedColumn>,
}

#[derive(Debug, Deserialize)]
struct AnnotatedColumn {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

impl AnnotatedSchema {
    /// `None` when a table or a column within a table is named twice.
    fn entity_set(&self) -> Option<EntitySet> {
        let mut out = BTreeMap::new();
        for t in &self.tables {
            let mut cols = BTreeSet::new();
            for c in &t.columns {
                if !cols.insert(c.name.clone()) {
                    return None;
                }
            }
            if out.insert(t.name.clone(), cols).is_some() {
                return None;
            }
        }
        Some(out)
    }
}

/// Introspects targets, normalizes their structure through the model and
/// keeps one verified snapshot per connection.
pub struct SchemaCatalog {
    llm: Arc<dyn LlmClient>,
    snapshots: Arc<dyn SnapshotStore>,
    temperature: f32,
}

impl SchemaCatalog {
    pub fn new(llm: Arc<dyn LlmClient>, snapshots: Arc<dyn SnapshotStore>, temperature: f32) -> Self {
        Self {
            llm,
            snapshots,
            temperature,
        }
    }

    pub async fn discover(&self, connection_string: &str) -> Result<RawSchema, OrchestratorError> {
        sqlgate_target::discover_async(connection_string)
            .await
            .map_err(|e| OrchestratorError::Introspection(e.to_string()))
    }

    /// Annotations from the model merged onto `raw`. Any failure, or a reply
    /// whose table and column names differ from `raw`, yields `raw` verbatim.
    pub async fn normalize(&self, connection_id: ConnectionId, raw: RawSchema) -> SchemaSnapshot {
        if raw.tables.is_empty() {
            return raw_snapshot(connection_id, raw);
        }
        match self.annotate(&raw).await {
            Ok(annotated) => {
                info!(connection_id, tables = raw.tables.len(), "schema normalized");
                merge(connection_id, raw, annotated)
            }
            Err(reason) => {
                metrics::counter!("sqlgate_normalize_fallback_total").increment(1);
                warn!(connection_id, %reason, "schema normalization fell back to raw structure");
                raw_snapshot(connection_id, raw)
            }
        }
    }

    async fn annotate(&self, raw: &RawSchema) -> Result<AnnotatedSchema, String> {
        let raw_json = serde_json::to_string(raw).map_err(|e| e.to_string())?;
        let reply = self
            .llm
            .complete(ChatRequest {
                model: None,
                messages: vec![ChatMessage::user(format!("{}{}", NORMALIZE_PROMPT, raw_json))],
                temperature: self.temperature,
                max_tokens: None,
            })
            .await
            .map_err(|e| e.to_string())?;
        let body = JSON_FENCE.replace_all(reply.trim(), "");
        let annotated: AnnotatedSchema =
            serde_json::from_str(body.trim()).map_err(|e| format!("unparsable reply: {}", e))?;
        match annotated.entity_set() {
            Some(set) if set == raw.entity_set() => Ok(annotated),
            Some(_) => Err("reply changed the table or column set".into()),
            None => Err("reply named an entity twice".into()),
        }
    }

    pub async fn persist(&self, snapshot: &SchemaSnapshot) -> Result<(), OrchestratorError> {
        self.snapshots.put_snapshot(snapshot).await?;
        Ok(())
    }

    pub async fn lookup(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<SchemaSnapshot>, OrchestratorError> {
        Ok(self.snapshots.snapshot(connection_id).await?)
    }

    pub async fn get(&self, connection_id: ConnectionId) -> Result<SchemaSnapshot, OrchestratorError> {
        self.lookup(connection_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(SNAPSHOT_MISSING.into()))
    }

    pub async fn discover_and_save(
        &self,
        connection_id: ConnectionId,
        connection_string: &str,
    ) -> Result<SchemaSnapshot, OrchestratorError> {
        let raw = self.discover(connection_string).await?;
        let snapshot = self.normalize(connection_id, raw).await;
        self.persist(&snapshot).await?;
        Ok(snapshot)
    }
}

fn raw_snapshot(connection_id: ConnectionId, raw: RawSchema) -> SchemaSnapshot {
    SchemaSnapshot {
        connection_id,
        database: raw.database,
        source: SnapshotSource::Raw,
        tables: raw.tables,
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn merge(connection_id: ConnectionId, raw: RawSchema, annotated: AnnotatedSchema) -> SchemaSnapshot {
    let mut notes: BTreeMap<String, AnnotatedTable> = annotated
        .tables
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect();
    let tables = raw
        .tables
        .into_iter()
        .map(|mut table| {
            if let Some(note) = notes.remove(&table.name) {
                table.description = non_blank(note.description);
                table.sample_query = non_blank(note.sample_query);
                let mut col_notes: BTreeMap<String, Option<String>> = note
                    .columns
                    .into_iter()
                    .map(|c| (c.name, c.description))
                    .collect();
                for col in &mut table.columns {
                    col.description = non_blank(col_notes.remove(&col.name).flatten());
                }
            }
            table
        })
        .collect();
    SchemaSnapshot {
        connection_id,
        database: raw.database,
        source: SnapshotSource::Llm,
        tables,
    }
}

use std::sync::Arc;

use sqlgate_kernel::HistoryStore;
use sqlgate_policy::ApprovalPolicy;
use sqlgate_protocol::{
    ChartRequest, ChartSuggestion, ConnectionId, ExecuteRequest, ExecutionResult,
    GenerateExecuteSuggestResponse, GenerateRequest, GeneratedQuery, HistoryEntry, HistoryRecord,
    SchemaSnapshot, TableSchema,
};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::chart::ChartAdvisor;
use crate::error::OrchestratorError;
use crate::executor::QueryExecutor;
use crate::schema_catalog::SchemaCatalog;
use crate::sql_generator::{GenerationParams, SqlGenerator};

pub const HISTORY_MISSING: &str = "History not found";
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 500;
const CHART_ROWS: usize = 200;

fn span(op: &'static str) -> tracing::Span {
    info_span!("sqlgate", op, corr_id = %Uuid::new_v4())
}

/// Composes generation, guardrail, execution and audit per entry point.
pub struct Orchestrator {
    generator: SqlGenerator,
    catalog: SchemaCatalog,
    executor: QueryExecutor,
    history: Arc<dyn HistoryStore>,
    audit: AuditSink,
    chart: Arc<dyn ChartAdvisor>,
    approval: ApprovalPolicy,
}

impl Orchestrator {
    pub fn new(
        generator: SqlGenerator,
        catalog: SchemaCatalog,
        executor: QueryExecutor,
        history: Arc<dyn HistoryStore>,
        chart: Arc<dyn ChartAdvisor>,
        approval: ApprovalPolicy,
    ) -> Self {
        Self {
            audit: AuditSink::new(history.clone()),
            generator,
            catalog,
            executor,
            history,
            chart,
            approval,
        }
    }

    /// Guardrail warnings are surfaced; a blocking decision fails the call.
    pub async fn generate(&self, req: &GenerateRequest) -> Result<GeneratedQuery, OrchestratorError> {
        self.generate_inner(req).instrument(span("generate")).await
    }

    async fn generate_inner(&self, req: &GenerateRequest) -> Result<GeneratedQuery, OrchestratorError> {
        let mut provider_warning = None;
        if let Some(requested) = req.provider.as_deref().map(str::trim) {
            if !requested.is_empty() && !requested.eq_ignore_ascii_case(self.generator.provider()) {
                provider_warning = Some(format!(
                    "provider '{}' is not configured; using '{}'",
                    requested,
                    self.generator.provider()
                ));
            }
        }
        let schema = if req.include_schema {
            self.catalog.lookup(req.connection_id).await?
        } else {
            None
        };
        let dialect = self.executor.dialect(req.connection_id).await;
        let params = GenerationParams {
            model: req.model.clone().filter(|m| !m.trim().is_empty()),
            temperature: Some(req.temperature),
            max_tokens: req.max_tokens,
        };
        let mut query = self
            .generator
            .generate(&req.prompt, schema.as_ref(), dialect, &params)
            .await;
        if let Some(w) = provider_warning {
            query.warnings.insert(0, w);
        }

        guard_generated(query)
    }

    /// Guardrail only when the request or global policy asks for it.
    pub async fn execute(&self, req: &ExecuteRequest) -> Result<ExecutionResult, OrchestratorError> {
        async {
            if self.approval.requires_check(req.require_approval) {
                let decision = sqlgate_policy::validate(&req.sql);
                if decision.block {
                    return Err(blocked(&req.sql, decision.warnings));
                }
            }
            let result = self
                .executor
                .execute(&req.sql, req.connection_id, req.timeout_seconds)
                .await?;
            self.audit
                .record(HistoryEntry::from_result(req.connection_id, None, &result));
            Ok::<_, OrchestratorError>(result)
        }
        .instrument(span("execute"))
        .await
    }

    pub async fn generate_and_execute(
        &self,
        req: &GenerateRequest,
    ) -> Result<(GeneratedQuery, ExecutionResult), OrchestratorError> {
        async {
            let query = self.generate_inner(req).await?;
            let result = if query.degraded {
                // nothing ran, so nothing is echoed as executed
                let mut res =
                    ExecutionResult::failure("", 0, "generation degraded; statement not executed");
                res.warnings = query.warnings.clone();
                res
            } else {
                let mut res = self
                    .executor
                    .execute(&query.sql, req.connection_id, None)
                    .await?;
                let mut warnings = query.warnings.clone();
                warnings.append(&mut res.warnings);
                res.warnings = warnings;
                res
            };
            self.audit.record(HistoryEntry::from_result(
                req.connection_id,
                Some(&req.prompt),
                &result,
            ));
            Ok::<_, OrchestratorError>((query, result))
        }
        .instrument(span("generate_and_execute"))
        .await
    }

    pub async fn generate_execute_suggest(
        &self,
        req: &GenerateRequest,
    ) -> Result<GenerateExecuteSuggestResponse, OrchestratorError> {
        let (query, execution) = self.generate_and_execute(req).await?;
        let chart = if execution.success && !execution.columns.is_empty() {
            self.chart
                .suggest(&ChartRequest {
                    columns: execution.columns.clone(),
                    rows: execution.rows.iter().take(CHART_ROWS).cloned().collect(),
                    max_rows: CHART_ROWS,
                    prompt: Some(req.prompt.clone()),
                })
                .await
        } else {
            ChartSuggestion::bar()
        };
        Ok(GenerateExecuteSuggestResponse {
            sql: query.sql,
            execution,
            chart,
        })
    }

    pub async fn suggest_chart(&self, req: &ChartRequest) -> Result<ChartSuggestion, OrchestratorError> {
        if req.columns.is_empty() {
            return Err(OrchestratorError::Invalid("No columns provided".into()));
        }
        Ok(self.chart.suggest(req).await)
    }

    /// Re-executes a stored statement without re-running the guardrail.
    pub async fn rerun(&self, history_id: i64) -> Result<ExecutionResult, OrchestratorError> {
        async {
            let record = self.history_record(history_id).await?;
            let result = self
                .executor
                .execute(&record.sql, record.connection_id, None)
                .await?;
            self.history.mark_rerun(history_id).await?;
            self.audit.record(HistoryEntry::from_result(
                record.connection_id,
                record.prompt.as_deref(),
                &result,
            ));
            Ok::<_, OrchestratorError>(result)
        }
        .instrument(span("rerun"))
        .await
    }

    /// Uses `connection_string` when given, else the stored connection's.
    pub async fn discover_schema(
        &self,
        connection_id: ConnectionId,
        connection_string: Option<&str>,
    ) -> Result<SchemaSnapshot, OrchestratorError> {
        async {
            let conn = match connection_string.map(str::trim).filter(|s| !s.is_empty()) {
                Some(s) => s.to_string(),
                None => self.executor.connection_string(connection_id).await?,
            };
            let snapshot = self.catalog.discover_and_save(connection_id, &conn).await?;
            info!(
                connection_id,
                tables = snapshot.tables.len(),
                source = ?snapshot.source,
                "schema snapshot saved"
            );
            Ok::<_, OrchestratorError>(snapshot)
        }
        .instrument(span("discover_schema"))
        .await
    }

    pub async fn get_schema(&self, connection_id: ConnectionId) -> Result<SchemaSnapshot, OrchestratorError> {
        self.catalog.get(connection_id).await
    }

    /// Table names of the stored snapshot; empty without one.
    pub async fn schema_tables(&self, connection_id: ConnectionId) -> Result<Vec<String>, OrchestratorError> {
        Ok(self
            .catalog
            .lookup(connection_id)
            .await?
            .map(|s| s.tables.into_iter().map(|t| t.name).collect())
            .unwrap_or_default())
    }

    pub async fn schema_table(
        &self,
        connection_id: ConnectionId,
        table: &str,
    ) -> Result<Option<TableSchema>, OrchestratorError> {
        Ok(self
            .catalog
            .lookup(connection_id)
            .await?
            .and_then(|s| s.tables.into_iter().find(|t| t.name == table)))
    }

    pub async fn list_history(&self, limit: Option<i64>) -> Result<Vec<HistoryRecord>, OrchestratorError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.history.list(limit).await?)
    }

    pub async fn set_pinned(&self, history_id: i64, pinned: bool) -> Result<(), OrchestratorError> {
        if self.history.set_pinned(history_id, pinned).await? {
            Ok(())
        } else {
            Err(OrchestratorError::NotFound(HISTORY_MISSING.into()))
        }
    }

    pub async fn delete_history(&self, history_id: i64) -> Result<(), OrchestratorError> {
        if self.history.delete(history_id).await? {
            Ok(())
        } else {
            Err(OrchestratorError::NotFound(HISTORY_MISSING.into()))
        }
    }

    async fn history_record(&self, history_id: i64) -> Result<HistoryRecord, OrchestratorError> {
        self.history
            .get(history_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(HISTORY_MISSING.into()))
    }
}

/// Guardrail warnings follow the generator's own; a block carries both.
fn guard_generated(mut query: GeneratedQuery) -> Result<GeneratedQuery, OrchestratorError> {
    let decision = sqlgate_policy::validate(&query.sql);
    query.warnings.extend(decision.warnings);
    if decision.block {
        return Err(blocked(&query.sql, query.warnings));
    }
    Ok(query)
}

fn blocked(sql: &str, warnings: Vec<String>) -> OrchestratorError {
    metrics::counter!("sqlgate_guardrail_blocked_total").increment(1);
    warn!(sql = %sql, warnings = ?warnings, "statement blocked by guardrails");
    OrchestratorError::ValidationBlocked { warnings }
}

use std::sync::Arc;
use std::time::Duration;

use sqlgate_core::ExecutionSettings;
use sqlgate_kernel::ConnectionStore;
use sqlgate_protocol::{ConnectionId, ExecutionResult};
use sqlgate_target::{Dialect, ExecutionLimits};
use tracing::info;

use crate::error::OrchestratorError;

pub const CONNECTION_MISSING: &str = "Connection not found";

/// Resolves connection ids and runs statements under the configured limits.
pub struct QueryExecutor {
    connections: Arc<dyn ConnectionStore>,
    settings: ExecutionSettings,
}

impl QueryExecutor {
    pub fn new(connections: Arc<dyn ConnectionStore>, settings: ExecutionSettings) -> Self {
        Self {
            connections,
            settings,
        }
    }

    pub async fn connection_string(&self, id: ConnectionId) -> Result<String, OrchestratorError> {
        self.connections
            .connection(id)
            .await?
            .map(|c| c.connection_string)
            .ok_or_else(|| OrchestratorError::NotFound(CONNECTION_MISSING.into()))
    }

    /// Dialect of a stored connection, if it exists and is recognised.
    pub async fn dialect(&self, id: ConnectionId) -> Option<Dialect> {
        match self.connection_string(id).await {
            Ok(conn) => Dialect::detect(&conn),
            Err(_) => None,
        }
    }

    /// Requested seconds clamped to `1..=max`; the max when unset.
    pub fn limits(&self, timeout_seconds: Option<u64>) -> ExecutionLimits {
        let max = self.settings.max_execution_time_seconds.max(1);
        let secs = timeout_seconds.map_or(max, |s| s.clamp(1, max));
        ExecutionLimits {
            timeout: Duration::from_secs(secs),
            max_rows: self.settings.max_rows_returned.max(1),
            read_only: self.settings.read_only_mode,
        }
    }

    /// Only a missing connection is an error; everything the engine reports
    /// comes back inside the result.
    pub async fn execute(
        &self,
        sql: &str,
        connection_id: ConnectionId,
        timeout_seconds: Option<u64>,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let conn = self.connection_string(connection_id).await?;
        let result = sqlgate_target::execute(&conn, sql, self.limits(timeout_seconds)).await;
        info!(
            connection_id,
            success = result.success,
            rows = result.row_count,
            elapsed_ms = result.execution_time_ms,
            "execution finished"
        );
        Ok(result)
    }
}

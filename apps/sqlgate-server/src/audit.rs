use std::sync::Arc;
use std::time::Duration;

use sqlgate_kernel::HistoryStore;
use sqlgate_protocol::HistoryEntry;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const AUDIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Appends execution attempts to history off the response path. One try
/// per entry, bounded by a timeout; failures are logged and counted only.
#[derive(Clone)]
pub struct AuditSink {
    history: Arc<dyn HistoryStore>,
    timeout: Duration,
}

impl AuditSink {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self {
            history,
            timeout: AUDIT_TIMEOUT,
        }
    }

    /// The handle is returned for tests; callers drop it.
    pub fn record(&self, entry: HistoryEntry) -> JoinHandle<()> {
        let history = self.history.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, history.append(entry)).await {
                Ok(Ok(id)) => debug!(history_id = id, "audit entry written"),
                Ok(Err(err)) => audit_failed(&err.to_string()),
                Err(_) => audit_failed("timed out"),
            }
        })
    }
}

fn audit_failed(reason: &str) {
    metrics::counter!("sqlgate_audit_failures_total").increment(1);
    warn!(%reason, "audit entry dropped");
}

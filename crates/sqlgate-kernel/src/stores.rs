use anyhow::Result;
use sqlgate_protocol::{
    ConnectionDescriptor, ConnectionId, HistoryEntry, HistoryRecord, SchemaSnapshot,
};

use crate::Kernel;

/// Read access to connection records. The records themselves are managed
/// elsewhere; the query pipeline only resolves them by id.
#[async_trait::async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn connection(&self, id: ConnectionId) -> Result<Option<ConnectionDescriptor>>;
}

/// Keyed upsert of schema snapshots.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the live snapshot for `snapshot.connection_id`.
    async fn put_snapshot(&self, snapshot: &SchemaSnapshot) -> Result<()>;
    async fn snapshot(&self, connection_id: ConnectionId) -> Result<Option<SchemaSnapshot>>;
}

/// Append-only execution log with pin, rerun stamp and delete.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, entry: HistoryEntry) -> Result<i64>;
    /// Pinned first, then newest first.
    async fn list(&self, limit: i64) -> Result<Vec<HistoryRecord>>;
    async fn get(&self, id: i64) -> Result<Option<HistoryRecord>>;
    /// `false` when no such record exists.
    async fn set_pinned(&self, id: i64, pinned: bool) -> Result<bool>;
    async fn mark_rerun(&self, id: i64) -> Result<bool>;
    async fn delete(&self, id: i64) -> Result<bool>;
}

#[async_trait::async_trait]
impl ConnectionStore for Kernel {
    async fn connection(&self, id: ConnectionId) -> Result<Option<ConnectionDescriptor>> {
        self.get_connection_async(id).await
    }
}

#[async_trait::async_trait]
impl SnapshotStore for Kernel {
    async fn put_snapshot(&self, snapshot: &SchemaSnapshot) -> Result<()> {
        self.upsert_snapshot_async(snapshot).await
    }

    async fn snapshot(&self, connection_id: ConnectionId) -> Result<Option<SchemaSnapshot>> {
        self.get_snapshot_async(connection_id).await
    }
}

#[async_trait::async_trait]
impl HistoryStore for Kernel {
    async fn append(&self, entry: HistoryEntry) -> Result<i64> {
        self.append_history_async(entry).await
    }

    async fn list(&self, limit: i64) -> Result<Vec<HistoryRecord>> {
        self.list_history_async(limit).await
    }

    async fn get(&self, id: i64) -> Result<Option<HistoryRecord>> {
        self.get_history_async(id).await
    }

    async fn set_pinned(&self, id: i64, pinned: bool) -> Result<bool> {
        self.set_history_pinned_async(id, pinned).await
    }

    async fn mark_rerun(&self, id: i64) -> Result<bool> {
        self.mark_history_rerun_async(id).await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        self.delete_history_async(id).await
    }
}

use crate::model::log::{LogRecord, Persistence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store is full and no evictable records remain")]
    Full,

    #[error("record has no timestamp")]
    MissingTimestamp,

    #[error("storage task error: {0}")]
    Task(String),
}

/// Records checked out of the store for delivery, with the checkout id
/// the store assigned to them.
#[derive(Debug, Clone)]
pub struct CheckedOutBatch {
    pub batch_id: String,
    pub logs: Vec<LogRecord>,
}

/// Durable staging queue for telemetry records, keyed by group id and
/// indexed by timestamp.
///
/// `load` checks records out under a fresh batch id: they stay invisible
/// to later loads until `delete_batch` removes them or the process
/// restarts (checkout state is not persisted, so restart makes them
/// eligible again).
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist one record. The record must carry a timestamp.
    async fn save(
        &self,
        log: &LogRecord,
        group_id: &str,
        flags: Persistence,
    ) -> Result<(), StorageError>;

    /// Check out up to `limit` records for `group_id` with timestamps in
    /// `[after, before)` (either bound may be open), skipping records
    /// whose target keys are all in `excluded_target_keys`. Returns
    /// `None` when nothing is eligible.
    async fn load(
        &self,
        group_id: &str,
        limit: usize,
        excluded_target_keys: &BTreeSet<String>,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Option<CheckedOutBatch>, StorageError>;

    /// Delete the records checked out under `batch_id`.
    async fn delete_batch(&self, batch_id: &str, group_id: &str) -> Result<(), StorageError>;

    /// Delete every record staged under `group_id`, checked out or not.
    async fn delete_group(&self, group_id: &str) -> Result<(), StorageError>;

    /// Number of records currently staged under `group_id`.
    async fn count(&self, group_id: &str) -> Result<usize, StorageError>;
}

use super::traits::{CheckedOutBatch, LogStore, StorageError};
use crate::model::log::{LogRecord, Persistence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const DEFAULT_MAX_RECORDS: usize = 10_000;

struct CheckoutEntry {
    group_id: String,
    row_ids: Vec<i64>,
}

/// SQLite implementation of the staging store.
///
/// Rows are indexed by `(group_id, timestamp)`; the record itself is kept
/// as a JSON payload column. Checkout state lives in memory only, so a
/// process restart returns every checked-out record to the eligible set.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    checkouts: Arc<Mutex<HashMap<String, CheckoutEntry>>>,
    next_batch_id: AtomicU64,
    max_records: usize,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Cap the number of staged rows. When full, the oldest non-critical
    /// rows are evicted to make room; saving fails with
    /// [`StorageError::Full`] once only critical rows remain.
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                critical INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_logs_group_time
                ON logs (group_id, timestamp);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            checkouts: Arc::new(Mutex::new(HashMap::new())),
            next_batch_id: AtomicU64::new(1),
            max_records: DEFAULT_MAX_RECORDS,
        })
    }

    fn checked_out_rows(&self, group_id: &str) -> HashSet<i64> {
        let checkouts = self.checkouts.lock().unwrap();
        checkouts
            .values()
            .filter(|entry| entry.group_id == group_id)
            .flat_map(|entry| entry.row_ids.iter().copied())
            .collect()
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn save(
        &self,
        log: &LogRecord,
        group_id: &str,
        flags: Persistence,
    ) -> Result<(), StorageError> {
        let timestamp = log
            .timestamp
            .ok_or(StorageError::MissingTimestamp)?
            .timestamp_millis();
        let payload = serde_json::to_string(log)?;
        let group_id = group_id.to_string();
        let critical = flags.normalized().is_critical();
        let max_records = self.max_records;

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let conn = conn.lock().unwrap();
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
            if total as usize >= max_records {
                let evicted = conn.execute(
                    "DELETE FROM logs WHERE id IN (
                        SELECT id FROM logs WHERE critical = 0
                        ORDER BY timestamp ASC, id ASC LIMIT 1
                    )",
                    [],
                )?;
                if evicted == 0 {
                    return Err(StorageError::Full);
                }
                warn!(group_id = %group_id, "Store full, evicted oldest non-critical record");
            }
            conn.execute(
                "INSERT INTO logs (group_id, timestamp, critical, payload)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![group_id, timestamp, critical as i64, payload],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }

    async fn load(
        &self,
        group_id: &str,
        limit: usize,
        excluded_target_keys: &BTreeSet<String>,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Option<CheckedOutBatch>, StorageError> {
        let checked_out = self.checked_out_rows(group_id);
        let group = group_id.to_string();
        let excluded = excluded_target_keys.clone();
        let after_ms = after.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        let before_ms = before.map(|t| t.timestamp_millis()).unwrap_or(i64::MAX);

        let conn = self.conn.clone();
        let selected = tokio::task::spawn_blocking(
            move || -> Result<Vec<(i64, LogRecord)>, StorageError> {
                let conn = conn.lock().unwrap();
                let mut stmt = conn.prepare(
                    "SELECT id, payload FROM logs
                     WHERE group_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
                     ORDER BY timestamp ASC, id ASC",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![group, after_ms, before_ms],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                )?;

                let mut selected = Vec::new();
                for row in rows {
                    let (row_id, payload) = row?;
                    if checked_out.contains(&row_id) {
                        continue;
                    }
                    let log: LogRecord = serde_json::from_str(&payload)?;
                    let keys = log.target_keys();
                    if !keys.is_empty() && keys.iter().all(|k| excluded.contains(k)) {
                        continue;
                    }
                    selected.push((row_id, log));
                    if selected.len() >= limit {
                        break;
                    }
                }
                Ok(selected)
            },
        )
        .await
        .map_err(|e| StorageError::Task(e.to_string()))??;

        if selected.is_empty() {
            return Ok(None);
        }

        let batch_id = self.next_batch_id.fetch_add(1, Ordering::SeqCst).to_string();
        let (row_ids, logs): (Vec<i64>, Vec<LogRecord>) = selected.into_iter().unzip();
        debug!(
            batch_id = %batch_id,
            group_id = %group_id,
            count = logs.len(),
            "Checked out batch"
        );
        self.checkouts.lock().unwrap().insert(
            batch_id.clone(),
            CheckoutEntry {
                group_id: group_id.to_string(),
                row_ids,
            },
        );
        Ok(Some(CheckedOutBatch { batch_id, logs }))
    }

    async fn delete_batch(&self, batch_id: &str, group_id: &str) -> Result<(), StorageError> {
        let entry = {
            let mut checkouts = self.checkouts.lock().unwrap();
            match checkouts.get(batch_id) {
                Some(entry) if entry.group_id == group_id => checkouts.remove(batch_id),
                _ => None,
            }
        };
        let Some(entry) = entry else {
            debug!(batch_id = %batch_id, group_id = %group_id, "No such checkout, nothing deleted");
            return Ok(());
        };

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let conn = conn.lock().unwrap();
            let ids = entry
                .row_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            conn.execute(&format!("DELETE FROM logs WHERE id IN ({ids})"), [])?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }

    async fn delete_group(&self, group_id: &str) -> Result<(), StorageError> {
        self.checkouts
            .lock()
            .unwrap()
            .retain(|_, entry| entry.group_id != group_id);

        let group = group_id.to_string();
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let conn = conn.lock().unwrap();
            let deleted = conn.execute("DELETE FROM logs WHERE group_id = ?1", [&group])?;
            debug!(group_id = %group, count = deleted, "Deleted group records");
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }

    async fn count(&self, group_id: &str) -> Result<usize, StorageError> {
        let group = group_id.to_string();
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let conn = conn.lock().unwrap();
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM logs WHERE group_id = ?1",
                [&group],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

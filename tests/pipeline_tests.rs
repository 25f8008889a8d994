use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telem::{
    AuthTokenContext, ChannelConfig, ChannelGroup, Ingestion, IngestionError, IngestionResponse,
    LogBatch, LogRecord, LogStore, Persistence, SqliteStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct CountingIngestion {
    batches: AtomicUsize,
    records: AtomicUsize,
    tokens: Mutex<Vec<Option<String>>>,
}

impl CountingIngestion {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: AtomicUsize::new(0),
            records: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Ingestion for CountingIngestion {
    fn is_ready_to_send(&self) -> bool {
        true
    }

    async fn send_batch(
        &self,
        batch: &LogBatch,
        auth_token: Option<&str>,
    ) -> Result<IngestionResponse, IngestionError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.records.fetch_add(batch.logs.len(), Ordering::SeqCst);
        self.tokens
            .lock()
            .unwrap()
            .push(auth_token.map(|t| t.to_string()));
        Ok(IngestionResponse {
            status: 200,
            body: String::new(),
        })
    }
}

async fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    for _ in 0..300 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// The subscriber is process-wide and tests run in one process; the
/// first caller wins and the rest are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telem=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[tokio::test]
async fn test_enqueued_records_drain_through_the_store() {
    init_tracing();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let ingestion = CountingIngestion::new();
    let group = ChannelGroup::new(
        store.clone(),
        ingestion.clone(),
        Arc::new(AuthTokenContext::new()),
    );
    let unit = group.add_unit(
        ChannelConfig::new("analytics")
            .with_batch_size_limit(3)
            .with_pending_batches_limit(2)
            .with_flush_interval(Duration::from_millis(50)),
    ).await.unwrap();

    for i in 0..10 {
        unit.enqueue(
            LogRecord::new("event").with_properties(serde_json::json!({ "index": i })),
        );
    }

    wait_until("all ten records to be delivered", || {
        ingestion.records.load(Ordering::SeqCst) == 10
    })
    .await;
    for _ in 0..300 {
        if store.count("analytics").await.unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.count("analytics").await.unwrap(), 0);

    // Size-bounded batches: ten records cannot fit in fewer than four
    // batches of three.
    assert!(ingestion.batches.load(Ordering::SeqCst) >= 4);
    // No sign-in happened, so every batch went out unsigned.
    assert!(ingestion.tokens.lock().unwrap().iter().all(|t| t.is_none()));
}

#[tokio::test]
async fn test_backlog_from_a_previous_run_is_flushed_on_attach() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("staging.db");

    {
        let store = SqliteStore::new(&path).unwrap();
        for _ in 0..4 {
            let log = LogRecord::new("event").with_timestamp(chrono::Utc::now());
            store.save(&log, "analytics", Persistence::Normal).await.unwrap();
        }
    }

    let store = Arc::new(SqliteStore::new(&path).unwrap());
    let ingestion = CountingIngestion::new();
    let group = ChannelGroup::new(
        store.clone(),
        ingestion.clone(),
        Arc::new(AuthTokenContext::new()),
    );
    let _unit = group.add_unit(
        ChannelConfig::new("analytics")
            .with_batch_size_limit(2)
            .with_pending_batches_limit(1)
            .with_flush_interval(Duration::from_millis(20)),
    ).await.unwrap();

    wait_until("the stale backlog to be delivered", || {
        ingestion.records.load(Ordering::SeqCst) == 4
    })
    .await;
}

#[tokio::test]
async fn test_wipe_then_reenable_round_trip() {
    init_tracing();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let ingestion = CountingIngestion::new();
    let group = ChannelGroup::new(
        store.clone(),
        ingestion.clone(),
        Arc::new(AuthTokenContext::new()),
    );
    let unit = group.add_unit(
        ChannelConfig::new("analytics")
            .with_batch_size_limit(10)
            .with_pending_batches_limit(1),
    ).await.unwrap();

    unit.enqueue(LogRecord::new("event"));
    unit.flush_sync().await;
    assert_eq!(store.count("analytics").await.unwrap(), 1);

    unit.set_enabled(false, true);
    unit.flush_sync().await;
    assert_eq!(store.count("analytics").await.unwrap(), 0);

    unit.enqueue(LogRecord::new("event"));
    unit.flush_sync().await;
    assert_eq!(store.count("analytics").await.unwrap(), 0);

    unit.set_enabled(true, false);
    unit.enqueue(LogRecord::new("event"));
    unit.flush_sync().await;
    assert_eq!(store.count("analytics").await.unwrap(), 1);
}

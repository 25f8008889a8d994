//! Client-side telemetry pipeline: accepts log records from in-process
//! producers, stages them durably, coalesces them into size-bounded
//! batches, and delivers those batches to a remote ingestion endpoint
//! with bounded in-flight concurrency, pause/resume gating, and
//! at-least-once semantics.
//!
//! The entry point is [`ChannelGroup`]: construct it with a store, an
//! ingestion client, and an auth-token context, then attach one
//! [`ChannelUnit`] per log group and enqueue [`LogRecord`]s.

pub mod channel;
pub mod context;
pub mod ingestion;
pub mod model;
pub mod storage;

pub use channel::{
    ChannelConfig, ChannelDelegate, ChannelError, ChannelGroup, ChannelUnit, PauseToken, Priority,
    UnitSnapshot,
};
pub use context::{AuthTokenContext, AuthTokenHistoryEntry, TokenWindow, UserIdContext};
pub use ingestion::{
    HttpIngestion, Ingestion, IngestionConfig, IngestionError, IngestionEvent, IngestionResponse,
};
pub use model::{DeviceInfo, LogBatch, LogRecord, Persistence};
pub use storage::{CheckedOutBatch, LogStore, SqliteStore, StorageError};

use crate::model::batch::LogBatch;
use async_trait::async_trait;
use thiserror::Error;

/// Delivery failure taxonomy.
///
/// `Transport` failures are recoverable: the records stay staged and the
/// client is expected to pause itself. Everything else is terminal for
/// the batch.
#[derive(Debug, Clone, Error)]
pub enum IngestionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("ingestion returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("batch cancelled")]
    Cancelled,
}

impl IngestionError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IngestionError::Transport(_))
    }
}

/// Successful delivery acknowledgement.
#[derive(Debug, Clone)]
pub struct IngestionResponse {
    pub status: u16,
    pub body: String,
}

/// Lifecycle notifications an ingestion client emits to its subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionEvent {
    /// The transport is degraded; stop initiating sends.
    Paused,
    /// The transport recovered; sending may resume.
    Resumed,
    /// The endpoint rejected the client permanently; the pipeline should
    /// shut down and wipe its staged data.
    FatalError,
}

/// Client for the remote ingestion endpoint.
#[async_trait]
pub trait Ingestion: Send + Sync {
    /// Whether the transport is currently willing to accept sends.
    fn is_ready_to_send(&self) -> bool;

    /// Deliver one batch, signed with `auth_token` when present.
    async fn send_batch(
        &self,
        batch: &LogBatch,
        auth_token: Option<&str>,
    ) -> Result<IngestionResponse, IngestionError>;
}

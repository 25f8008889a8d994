use super::traits::{Ingestion, IngestionError, IngestionEvent, IngestionResponse};
use crate::model::batch::LogBatch;
use crate::model::log::LogRecord;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub base_url: String,
    pub app_secret: String,
    pub install_id: Uuid,
    pub timeout: Duration,
    pub retry_interval: Duration,
    pub max_retries: usize,
}

impl IngestionConfig {
    pub fn new(base_url: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            app_secret: app_secret.into(),
            install_id: Uuid::new_v4(),
            timeout: Duration::from_secs(60),
            retry_interval: Duration::from_millis(500),
            max_retries: 3,
        }
    }
}

/// Wire envelope for one delivery.
#[derive(Debug, Serialize)]
struct BatchEnvelope<'a> {
    logs: &'a [LogRecord],
}

/// HTTP client for the ingestion endpoint.
///
/// Transport failures are retried with exponential backoff; once retries
/// are exhausted the client marks itself paused and notifies its
/// subscriber. A later successful send (or an explicit `resume`, e.g.
/// from a connectivity monitor) clears the pause.
pub struct HttpIngestion {
    config: IngestionConfig,
    client: reqwest::Client,
    events: mpsc::UnboundedSender<IngestionEvent>,
    paused: AtomicBool,
}

impl HttpIngestion {
    pub fn new(
        config: IngestionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<IngestionEvent>), IngestionError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IngestionError::Transport(e.to_string()))?;
        let (events, events_rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                config,
                client,
                events,
                paused: AtomicBool::new(false),
            },
            events_rx,
        ))
    }

    /// Clear the transport pause, e.g. when connectivity returns.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(IngestionEvent::Resumed);
        }
    }

    fn enter_paused(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(IngestionEvent::Paused);
        }
    }

    async fn send_once(
        &self,
        batch: &LogBatch,
        auth_token: Option<&str>,
    ) -> Result<IngestionResponse, IngestionError> {
        let url = format!("{}/logs?api-version=1.0.0", self.config.base_url);
        let envelope = BatchEnvelope { logs: &batch.logs };

        let mut request = self
            .client
            .post(&url)
            .header("App-Secret", &self.config.app_secret)
            .header("Install-ID", self.config.install_id.to_string())
            .json(&envelope);
        if let Some(token) = auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| IngestionError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if (200..300).contains(&status) {
            Ok(IngestionResponse { status, body })
        } else {
            if status == 404 {
                error!(status, "Endpoint rejected the client, reporting fatal error");
                let _ = self.events.send(IngestionEvent::FatalError);
            }
            Err(IngestionError::Http {
                status,
                message: body,
            })
        }
    }
}

#[async_trait]
impl Ingestion for HttpIngestion {
    fn is_ready_to_send(&self) -> bool {
        !self.paused.load(Ordering::SeqCst)
    }

    async fn send_batch(
        &self,
        batch: &LogBatch,
        auth_token: Option<&str>,
    ) -> Result<IngestionResponse, IngestionError> {
        let mut attempts = 0;
        let mut backoff = self.config.retry_interval;

        loop {
            match self.send_once(batch, auth_token).await {
                Ok(response) => {
                    debug!(
                        batch_id = %batch.batch_id,
                        status = response.status,
                        "Batch delivered"
                    );
                    self.resume();
                    return Ok(response);
                }
                Err(e) if e.is_recoverable() => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        error!(
                            batch_id = %batch.batch_id,
                            attempts,
                            error = %e,
                            "Transport retries exhausted, pausing ingestion"
                        );
                        self.enter_paused();
                        return Err(e);
                    }
                    warn!(
                        batch_id = %batch.batch_id,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis(),
                        error = %e,
                        "Send failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_secs(60));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

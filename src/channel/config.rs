use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relative scheduling priority among groups. Broadcast operations visit
/// higher-priority groups first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Background,
    Default,
    High,
}

/// Per-group channel configuration. Immutable once the unit is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Logical partition the unit serves.
    pub group_id: String,

    #[serde(default = "default_priority")]
    pub priority: Priority,

    /// How long a partially filled accumulator may wait before flushing.
    /// Zero flushes on the next scheduler pass.
    #[serde(default = "default_flush_interval", with = "duration_secs")]
    pub flush_interval: Duration,

    /// Maximum records per batch.
    #[serde(default = "default_batch_size_limit")]
    pub batch_size_limit: usize,

    /// Maximum batches awaiting acknowledgement at once.
    #[serde(default = "default_pending_batches_limit")]
    pub pending_batches_limit: usize,
}

fn default_priority() -> Priority {
    Priority::Default
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(6)
}

fn default_batch_size_limit() -> usize {
    50
}

fn default_pending_batches_limit() -> usize {
    3
}

impl ChannelConfig {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            priority: default_priority(),
            flush_interval: default_flush_interval(),
            batch_size_limit: default_batch_size_limit(),
            pending_batches_limit: default_pending_batches_limit(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_batch_size_limit(mut self, batch_size_limit: usize) -> Self {
        self.batch_size_limit = batch_size_limit.max(1);
        self
    }

    pub fn with_pending_batches_limit(mut self, pending_batches_limit: usize) -> Self {
        self.pending_batches_limit = pending_batches_limit.max(1);
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_clamps_limits() {
        let config = ChannelConfig::new("analytics")
            .with_batch_size_limit(0)
            .with_pending_batches_limit(0);
        assert_eq!(config.batch_size_limit, 1);
        assert_eq!(config.pending_batches_limit, 1);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Default);
        assert!(Priority::Default > Priority::Background);
    }

    #[test]
    fn test_serde_defaults() {
        let config: ChannelConfig =
            serde_json::from_str(r#"{ "group_id": "analytics" }"#).unwrap();
        assert_eq!(config.priority, Priority::Default);
        assert_eq!(config.batch_size_limit, 50);
        assert_eq!(config.pending_batches_limit, 3);
        assert_eq!(config.flush_interval, Duration::from_secs(6));
    }
}

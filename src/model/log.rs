use crate::model::device::DeviceInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A single telemetry record produced by an in-process producer.
///
/// Most fields are optional at construction time; the channel fills in
/// identity, timestamp, device and ambient user id during enqueue, before
/// any observer sees the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Stable record id. Assigned on enqueue if absent.
    #[serde(default)]
    pub id: Option<Uuid>,

    /// Wall-clock timestamp. Assigned on enqueue if absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Device descriptor. Assigned on enqueue if absent.
    #[serde(default)]
    pub device: Option<DeviceInfo>,

    /// User identity, taken from ambient context on enqueue if absent.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Record kind discriminator (e.g. "event", "error", "page").
    pub kind: String,

    /// Schema-free payload body.
    #[serde(default)]
    pub properties: serde_json::Value,

    /// Transmission-target tokens of the form `<key>-<secret>`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub targets: BTreeSet<String>,
}

impl LogRecord {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: None,
            device: None,
            user_id: None,
            kind: kind.into(),
            properties: serde_json::Value::Null,
            targets: BTreeSet::new(),
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn add_target(&mut self, token: impl Into<String>) {
        self.targets.insert(token.into());
    }

    /// The set of target keys this record is addressed to, derived from
    /// its transmission-target tokens.
    pub fn target_keys(&self) -> BTreeSet<String> {
        self.targets.iter().map(|t| target_key(t).to_string()).collect()
    }
}

/// Extract the target key from a transmission-target token: the prefix up
/// to the first `-`. Tokens without a `-` are their own key.
pub fn target_key(token: &str) -> &str {
    token.split('-').next().unwrap_or(token)
}

/// Persistence hint attached to a record at enqueue time.
///
/// `Critical` records survive store eviction longest; `Default` normalizes
/// to `Normal`. The flag carries no ordering privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persistence {
    Default,
    Normal,
    Critical,
}

impl Persistence {
    pub fn normalized(self) -> Self {
        match self {
            Persistence::Default => Persistence::Normal,
            other => other,
        }
    }

    pub fn is_critical(self) -> bool {
        matches!(self, Persistence::Critical)
    }
}

impl Default for Persistence {
    fn default() -> Self {
        Persistence::Default
    }
}

use crate::channel::pause::PauseToken;
use crate::ingestion::traits::IngestionError;
use crate::model::log::{LogRecord, Persistence};
use std::sync::Arc;

/// Observer of a channel unit's lifecycle.
///
/// All callbacks run on the group's serial context, in registration
/// order. For a given record the sequence is: `on_prepare_log`,
/// `on_log_prepared`, `on_enqueue_complete`, then zero or more of
/// `on_will_send` / `on_send_succeeded` / `on_send_failed`. A record's
/// identity fields never change after `on_log_prepared`.
#[allow(unused_variables)]
pub trait ChannelDelegate: Send + Sync {
    /// The record is about to be staged; transient metadata may still be
    /// attached here.
    fn on_prepare_log(&self, log: &mut LogRecord) {}

    fn on_log_prepared(&self, log: &LogRecord, internal_id: u64, flags: Persistence) {}

    fn on_enqueue_complete(&self, log: &LogRecord, internal_id: u64) {}

    /// Return true to veto persistence of this record. A veto is silent:
    /// no error is surfaced anywhere.
    fn should_filter_log(&self, log: &LogRecord) -> bool {
        false
    }

    fn on_will_send(&self, log: &LogRecord) {}

    fn on_send_succeeded(&self, log: &LogRecord) {}

    fn on_send_failed(&self, log: &LogRecord, error: &IngestionError) {}

    fn on_paused(&self, token: PauseToken) {}

    fn on_resumed(&self, token: PauseToken) {}
}

/// Ordered delegate list.
///
/// Fan-out always iterates a snapshot, so a delegate may add or remove
/// delegates (or pause the unit) from within a callback without
/// invalidating the iteration in progress.
pub struct DelegateSet {
    delegates: Vec<Arc<dyn ChannelDelegate>>,
}

impl DelegateSet {
    pub fn new() -> Self {
        Self {
            delegates: Vec::new(),
        }
    }

    pub fn add(&mut self, delegate: Arc<dyn ChannelDelegate>) {
        self.delegates.push(delegate);
    }

    /// Remove a previously added delegate, matched by identity.
    pub fn remove(&mut self, delegate: &Arc<dyn ChannelDelegate>) {
        self.delegates.retain(|d| !Arc::ptr_eq(d, delegate));
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn ChannelDelegate>> {
        self.delegates.clone()
    }
}

impl Default for DelegateSet {
    fn default() -> Self {
        Self::new()
    }
}

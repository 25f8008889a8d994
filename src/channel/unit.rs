use crate::channel::config::ChannelConfig;
use crate::channel::delegate::DelegateSet;
use crate::channel::group::{GroupCommand, GroupShared};
use crate::channel::pause::{PauseSet, PauseToken};
use crate::ingestion::traits::{IngestionError, IngestionResponse};
use crate::model::batch::LogBatch;
use crate::model::log::{target_key, LogRecord, Persistence};
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A batch that has been handed to ingestion and not yet acknowledged.
struct PendingBatch {
    batch_id: String,
    logs: Vec<LogRecord>,
    auth_token: Option<String>,
}

/// Point-in-time view of a unit's state, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct UnitSnapshot {
    pub enabled: bool,
    pub paused: bool,
    pub discard_logs: bool,
    pub items_count: u64,
    pub pending_batch_ids: Vec<String>,
    pub pending_queue_full: bool,
    pub paused_target_keys: BTreeSet<String>,
}

/// Per-group scheduler state.
///
/// Every method runs on the owning group's serial context; none of them
/// block on ingestion. Sends are spawned and complete by posting a
/// command back to the same context.
pub(crate) struct UnitState {
    config: ChannelConfig,
    enabled: bool,
    discard_logs: bool,
    paused_by: PauseSet,
    paused_target_keys: BTreeSet<String>,
    pending: Vec<PendingBatch>,
    items_count: u64,
    timer_armed: bool,
    timer_generation: u64,
    next_internal_id: u64,
    pub(crate) delegates: DelegateSet,
}

impl UnitState {
    pub(crate) fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            enabled: true,
            discard_logs: false,
            paused_by: PauseSet::new(),
            paused_target_keys: BTreeSet::new(),
            pending: Vec::new(),
            items_count: 0,
            timer_armed: false,
            timer_generation: 0,
            next_internal_id: 1,
            delegates: DelegateSet::new(),
        }
    }

    pub(crate) fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Paused by any identifier, or disabled.
    pub(crate) fn paused(&self) -> bool {
        !self.enabled || !self.paused_by.is_empty()
    }

    fn pending_queue_full(&self) -> bool {
        self.pending.len() >= self.config.pending_batches_limit
    }

    /// Seed the staged-record counter from the store, so a backlog left
    /// by a previous process resumes flushing.
    pub(crate) fn seed_items_count(&mut self, count: u64) {
        self.items_count = count;
    }

    pub(crate) async fn enqueue(
        &mut self,
        mut log: LogRecord,
        flags: Persistence,
        shared: &GroupShared,
    ) {
        if log.id.is_none() {
            log.id = Some(Uuid::new_v4());
        }
        if log.timestamp.is_none() {
            log.timestamp = Some(chrono::Utc::now());
        }
        if log.device.is_none() {
            log.device = Some(shared.device.clone());
        }
        if log.user_id.is_none() {
            log.user_id = shared.user.user_id();
        }

        let flags = flags.normalized();
        let delegates = self.delegates.snapshot();
        for delegate in &delegates {
            delegate.on_prepare_log(&mut log);
        }
        let internal_id = self.next_internal_id;
        self.next_internal_id += 1;
        for delegate in &delegates {
            delegate.on_log_prepared(&log, internal_id, flags);
        }
        for delegate in &delegates {
            delegate.on_enqueue_complete(&log, internal_id);
        }

        if self.discard_logs {
            debug!(
                group_id = %self.config.group_id,
                internal_id,
                "Discarding record, unit is disabled with wipe"
            );
            return;
        }
        if delegates.iter().any(|d| d.should_filter_log(&log)) {
            debug!(
                group_id = %self.config.group_id,
                internal_id,
                "Record vetoed by a delegate"
            );
            return;
        }

        match shared.store.save(&log, &self.config.group_id, flags).await {
            Ok(()) => {
                self.items_count += 1;
                self.check_pending_logs(shared).await;
            }
            Err(e) => {
                error!(
                    group_id = %self.config.group_id,
                    error = %e,
                    "Failed to persist record"
                );
            }
        }
    }

    /// Decide whether staged records warrant a flush now, a timer, or
    /// nothing.
    pub(crate) async fn check_pending_logs(&mut self, shared: &GroupShared) {
        if self.paused() || self.pending_queue_full() {
            return;
        }
        if self.items_count >= self.config.batch_size_limit as u64 {
            self.cancel_timer();
            self.flush_queue(shared).await;
        } else if self.items_count > 0 && !self.timer_armed {
            self.arm_timer(shared);
        }
    }

    /// Check out and send at most one batch, partitioned so it never
    /// straddles a token-validity boundary.
    async fn flush_queue(&mut self, shared: &GroupShared) {
        if self.paused() || self.pending_queue_full() {
            return;
        }
        if !shared.ingestion.is_ready_to_send() {
            debug!(group_id = %self.config.group_id, "Ingestion not ready, flush skipped");
            return;
        }

        let windows = shared.auth.windows();
        for (i, window) in windows.iter().enumerate() {
            let last = i + 1 == windows.len();
            let before = if last { None } else { window.end };
            let loaded = shared
                .store
                .load(
                    &self.config.group_id,
                    self.config.batch_size_limit,
                    &self.paused_target_keys,
                    window.start,
                    before,
                )
                .await;
            match loaded {
                Ok(Some(batch)) => {
                    self.items_count = self.items_count.saturating_sub(batch.logs.len() as u64);
                    info!(
                        group_id = %self.config.group_id,
                        batch_id = %batch.batch_id,
                        count = batch.logs.len(),
                        signed = window.token.is_some(),
                        "Sending batch"
                    );
                    self.send_batch(
                        PendingBatch {
                            batch_id: batch.batch_id,
                            logs: batch.logs,
                            auth_token: window.token.clone(),
                        },
                        shared,
                    );
                    return;
                }
                Ok(None) => continue,
                Err(e) => {
                    error!(
                        group_id = %self.config.group_id,
                        error = %e,
                        "Failed to load a batch"
                    );
                    return;
                }
            }
        }
    }

    fn send_batch(&mut self, pending: PendingBatch, shared: &GroupShared) {
        let delegates = self.delegates.snapshot();
        for log in &pending.logs {
            for delegate in &delegates {
                delegate.on_will_send(log);
            }
        }

        let batch = LogBatch {
            batch_id: pending.batch_id.clone(),
            group_id: self.config.group_id.clone(),
            logs: pending.logs.clone(),
        };
        let auth_token = pending.auth_token.clone();
        self.pending.push(pending);

        let ingestion = shared.ingestion.clone();
        let commands = shared.commands.clone();
        tokio::spawn(async move {
            let result = ingestion.send_batch(&batch, auth_token.as_deref()).await;
            let _ = commands.send(GroupCommand::SendCompleted {
                group_id: batch.group_id,
                batch_id: batch.batch_id,
                result,
            });
        });
    }

    pub(crate) async fn handle_send_completion(
        &mut self,
        batch_id: &str,
        result: Result<IngestionResponse, IngestionError>,
        shared: &GroupShared,
    ) {
        let Some(position) = self.pending.iter().position(|p| p.batch_id == batch_id) else {
            warn!(
                group_id = %self.config.group_id,
                batch_id = %batch_id,
                "Completion for an unknown batch dropped"
            );
            return;
        };
        let pending = self.pending.remove(position);
        let delegates = self.delegates.snapshot();

        match result {
            Ok(response) => {
                debug!(
                    group_id = %self.config.group_id,
                    batch_id = %batch_id,
                    status = response.status,
                    "Batch acknowledged"
                );
                for log in &pending.logs {
                    for delegate in &delegates {
                        delegate.on_send_succeeded(log);
                    }
                }
                if let Err(e) = shared.store.delete_batch(batch_id, &self.config.group_id).await {
                    error!(
                        group_id = %self.config.group_id,
                        batch_id = %batch_id,
                        error = %e,
                        "Failed to delete an acknowledged batch"
                    );
                }
                self.check_pending_logs(shared).await;
            }
            Err(e) if e.is_recoverable() => {
                // The records stay checked out in the store; ingestion is
                // expected to pause us until the transport recovers.
                warn!(
                    group_id = %self.config.group_id,
                    batch_id = %batch_id,
                    error = %e,
                    "Recoverable send failure"
                );
            }
            Err(e) => {
                warn!(
                    group_id = %self.config.group_id,
                    batch_id = %batch_id,
                    error = %e,
                    "Batch is unsendable, dropping it"
                );
                for log in &pending.logs {
                    for delegate in &delegates {
                        delegate.on_send_failed(log, &e);
                    }
                }
                if let Err(e) = shared.store.delete_batch(batch_id, &self.config.group_id).await {
                    error!(
                        group_id = %self.config.group_id,
                        batch_id = %batch_id,
                        error = %e,
                        "Failed to delete an unsendable batch"
                    );
                }
                self.check_pending_logs(shared).await;
            }
        }
    }

    fn arm_timer(&mut self, shared: &GroupShared) {
        self.timer_generation += 1;
        let generation = self.timer_generation;
        self.timer_armed = true;

        let group_id = self.config.group_id.clone();
        let interval = self.config.flush_interval;
        let commands = shared.commands.clone();
        tokio::spawn(async move {
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
            let _ = commands.send(GroupCommand::FlushTimerFired {
                group_id,
                generation,
            });
        });
    }

    /// Invalidate any armed timer; a fire carrying a stale generation is
    /// ignored.
    fn cancel_timer(&mut self) {
        self.timer_armed = false;
        self.timer_generation += 1;
    }

    pub(crate) async fn timer_fired(&mut self, generation: u64, shared: &GroupShared) {
        if !self.timer_armed || generation != self.timer_generation {
            return;
        }
        self.timer_armed = false;
        self.flush_queue(shared).await;
    }

    pub(crate) fn pause(&mut self, token: PauseToken) {
        let was_paused = self.paused();
        if self.paused_by.pause(token) {
            debug!(
                group_id = %self.config.group_id,
                holders = self.paused_by.len(),
                "Channel paused"
            );
        }
        if !was_paused && self.paused() {
            self.cancel_timer();
        }
        for delegate in self.delegates.snapshot() {
            delegate.on_paused(token);
        }
    }

    pub(crate) async fn resume(&mut self, token: PauseToken, shared: &GroupShared) {
        let was_paused = self.paused();
        if self.paused_by.resume(token) {
            debug!(
                group_id = %self.config.group_id,
                holders = self.paused_by.len(),
                "Pause identifier released"
            );
        }
        for delegate in self.delegates.snapshot() {
            delegate.on_resumed(token);
        }
        if was_paused && !self.paused() {
            self.check_pending_logs(shared).await;
        }
    }

    /// Stop selecting records addressed only to this token's target key.
    /// Such records are still stored, just not sent.
    pub(crate) fn pause_target(&mut self, target_token: &str) {
        let key = target_key(target_token).to_string();
        if self.paused_target_keys.insert(key.clone()) {
            debug!(
                group_id = %self.config.group_id,
                target = %key,
                "Paused transmission target"
            );
        }
    }

    pub(crate) async fn resume_target(&mut self, target_token: &str, shared: &GroupShared) {
        let key = target_key(target_token);
        if self.paused_target_keys.remove(key) {
            debug!(
                group_id = %self.config.group_id,
                target = %key,
                "Resumed transmission target"
            );
            self.check_pending_logs(shared).await;
        }
    }

    pub(crate) async fn set_enabled(
        &mut self,
        enabled: bool,
        delete_data: bool,
        shared: &GroupShared,
    ) {
        if enabled {
            let was_paused = self.paused();
            self.enabled = true;
            self.discard_logs = false;
            info!(group_id = %self.config.group_id, "Channel enabled");
            if was_paused && !self.paused() {
                self.check_pending_logs(shared).await;
            }
            return;
        }

        self.enabled = false;
        self.cancel_timer();
        if delete_data {
            self.discard_logs = true;
            if let Err(e) = shared.store.delete_group(&self.config.group_id).await {
                error!(
                    group_id = %self.config.group_id,
                    error = %e,
                    "Failed to wipe group records"
                );
            }
            let delegates = self.delegates.snapshot();
            let error = IngestionError::Cancelled;
            for pending in std::mem::take(&mut self.pending) {
                for log in &pending.logs {
                    for delegate in &delegates {
                        delegate.on_send_failed(log, &error);
                    }
                }
            }
            self.items_count = 0;
        }
        info!(
            group_id = %self.config.group_id,
            wiped = delete_data,
            "Channel disabled"
        );
    }

    pub(crate) fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            enabled: self.enabled,
            paused: self.paused(),
            discard_logs: self.discard_logs,
            items_count: self.items_count,
            pending_batch_ids: self.pending.iter().map(|p| p.batch_id.clone()).collect(),
            pending_queue_full: self.pending_queue_full(),
            paused_target_keys: self.paused_target_keys.clone(),
        }
    }
}

use crate::channel::config::ChannelConfig;
use crate::channel::delegate::ChannelDelegate;
use crate::channel::pause::PauseToken;
use crate::channel::unit::{UnitSnapshot, UnitState};
use crate::context::auth::AuthTokenContext;
use crate::context::user::UserIdContext;
use crate::ingestion::traits::{Ingestion, IngestionError, IngestionEvent, IngestionResponse};
use crate::model::device::DeviceInfo;
use crate::model::log::{LogRecord, Persistence};
use crate::storage::traits::LogStore;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Misuse of the channel surface. Record-path failures never show up
/// here; those are delivered through delegate callbacks.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("unit already attached for group {0}")]
    UnitAlreadyAttached(String),

    #[error("no unit attached for group {0}")]
    UnknownGroup(String),

    #[error("channel group has shut down")]
    Closed,
}

/// Collaborators shared by every unit of a group.
pub(crate) struct GroupShared {
    pub(crate) store: Arc<dyn LogStore>,
    pub(crate) ingestion: Arc<dyn Ingestion>,
    pub(crate) auth: Arc<AuthTokenContext>,
    pub(crate) user: Arc<UserIdContext>,
    pub(crate) device: DeviceInfo,
    pub(crate) commands: mpsc::UnboundedSender<GroupCommand>,
}

/// Work submitted to the group's serial context. Everything that touches
/// unit state flows through here, including completions and timer fires.
pub(crate) enum GroupCommand {
    AttachUnit {
        config: ChannelConfig,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    AddDelegate {
        group_id: String,
        delegate: Arc<dyn ChannelDelegate>,
    },
    RemoveDelegate {
        group_id: String,
        delegate: Arc<dyn ChannelDelegate>,
    },
    Enqueue {
        group_id: String,
        log: LogRecord,
        flags: Persistence,
    },
    Pause {
        group_id: String,
        token: PauseToken,
    },
    Resume {
        group_id: String,
        token: PauseToken,
    },
    PauseTarget {
        group_id: String,
        target_token: String,
    },
    ResumeTarget {
        group_id: String,
        target_token: String,
    },
    SetEnabled {
        group_id: String,
        enabled: bool,
        delete_data: bool,
    },
    PauseAll {
        token: PauseToken,
    },
    ResumeAll {
        token: PauseToken,
    },
    SetEnabledAll {
        enabled: bool,
        delete_data: bool,
    },
    FlushTimerFired {
        group_id: String,
        generation: u64,
    },
    SendCompleted {
        group_id: String,
        batch_id: String,
        result: Result<IngestionResponse, IngestionError>,
    },
    Snapshot {
        group_id: String,
        reply: oneshot::Sender<Option<UnitSnapshot>>,
    },
    Barrier {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

struct GroupActor {
    shared: GroupShared,
    units: HashMap<String, UnitState>,
}

impl GroupActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<GroupCommand>) {
        while let Some(command) = commands.recv().await {
            if matches!(command, GroupCommand::Shutdown) {
                break;
            }
            self.handle(command).await;
        }
        debug!("Channel group stopped");
    }

    /// Group ids ordered for broadcasts: higher priority first, then by
    /// name for determinism.
    fn broadcast_order(&self) -> Vec<String> {
        let mut ids: Vec<&UnitState> = self.units.values().collect();
        ids.sort_by(|a, b| {
            b.config()
                .priority
                .cmp(&a.config().priority)
                .then_with(|| a.config().group_id.cmp(&b.config().group_id))
        });
        ids.iter().map(|u| u.config().group_id.clone()).collect()
    }

    async fn handle(&mut self, command: GroupCommand) {
        match command {
            GroupCommand::AttachUnit { config, reply } => {
                let group_id = config.group_id.clone();
                if self.units.contains_key(&group_id) {
                    warn!(group_id = %group_id, "Unit already attached");
                    let _ = reply.send(Err(ChannelError::UnitAlreadyAttached(group_id)));
                    return;
                }
                let mut unit = UnitState::new(config);
                match self.shared.store.count(&group_id).await {
                    Ok(count) => unit.seed_items_count(count as u64),
                    Err(e) => error!(
                        group_id = %group_id,
                        error = %e,
                        "Failed to count staged records"
                    ),
                }
                info!(group_id = %group_id, "Unit attached");
                self.units.insert(group_id.clone(), unit);
                if let Some(unit) = self.units.get_mut(&group_id) {
                    unit.check_pending_logs(&self.shared).await;
                }
                let _ = reply.send(Ok(()));
            }
            GroupCommand::AddDelegate { group_id, delegate } => {
                if let Some(unit) = self.units.get_mut(&group_id) {
                    unit.delegates.add(delegate);
                }
            }
            GroupCommand::RemoveDelegate { group_id, delegate } => {
                if let Some(unit) = self.units.get_mut(&group_id) {
                    unit.delegates.remove(&delegate);
                }
            }
            GroupCommand::Enqueue {
                group_id,
                log,
                flags,
            } => {
                if let Some(unit) = self.units.get_mut(&group_id) {
                    unit.enqueue(log, flags, &self.shared).await;
                } else {
                    warn!(group_id = %group_id, "Enqueue for an unknown group dropped");
                }
            }
            GroupCommand::Pause { group_id, token } => {
                if let Some(unit) = self.units.get_mut(&group_id) {
                    unit.pause(token);
                }
            }
            GroupCommand::Resume { group_id, token } => {
                if let Some(unit) = self.units.get_mut(&group_id) {
                    unit.resume(token, &self.shared).await;
                }
            }
            GroupCommand::PauseTarget {
                group_id,
                target_token,
            } => {
                if let Some(unit) = self.units.get_mut(&group_id) {
                    unit.pause_target(&target_token);
                }
            }
            GroupCommand::ResumeTarget {
                group_id,
                target_token,
            } => {
                if let Some(unit) = self.units.get_mut(&group_id) {
                    unit.resume_target(&target_token, &self.shared).await;
                }
            }
            GroupCommand::SetEnabled {
                group_id,
                enabled,
                delete_data,
            } => {
                if let Some(unit) = self.units.get_mut(&group_id) {
                    unit.set_enabled(enabled, delete_data, &self.shared).await;
                }
            }
            GroupCommand::PauseAll { token } => {
                for group_id in self.broadcast_order() {
                    if let Some(unit) = self.units.get_mut(&group_id) {
                        unit.pause(token);
                    }
                }
            }
            GroupCommand::ResumeAll { token } => {
                for group_id in self.broadcast_order() {
                    if let Some(unit) = self.units.get_mut(&group_id) {
                        unit.resume(token, &self.shared).await;
                    }
                }
            }
            GroupCommand::SetEnabledAll {
                enabled,
                delete_data,
            } => {
                for group_id in self.broadcast_order() {
                    if let Some(unit) = self.units.get_mut(&group_id) {
                        unit.set_enabled(enabled, delete_data, &self.shared).await;
                    }
                }
            }
            GroupCommand::FlushTimerFired {
                group_id,
                generation,
            } => {
                if let Some(unit) = self.units.get_mut(&group_id) {
                    unit.timer_fired(generation, &self.shared).await;
                }
            }
            GroupCommand::SendCompleted {
                group_id,
                batch_id,
                result,
            } => {
                if let Some(unit) = self.units.get_mut(&group_id) {
                    unit.handle_send_completion(&batch_id, result, &self.shared)
                        .await;
                }
            }
            GroupCommand::Snapshot { group_id, reply } => {
                let _ = reply.send(self.units.get(&group_id).map(|u| u.snapshot()));
            }
            GroupCommand::Barrier { reply } => {
                let _ = reply.send(());
            }
            GroupCommand::Shutdown => {}
        }
    }
}

/// Owner of a set of channel units sharing one serial context and one
/// ingestion client.
///
/// All collaborators are passed in explicitly; tests inject fakes
/// through the same constructor the production wiring uses.
pub struct ChannelGroup {
    commands: mpsc::UnboundedSender<GroupCommand>,
    ingestion_token: PauseToken,
}

impl ChannelGroup {
    pub fn new(
        store: Arc<dyn LogStore>,
        ingestion: Arc<dyn Ingestion>,
        auth: Arc<AuthTokenContext>,
    ) -> Self {
        Self::with_context(
            store,
            ingestion,
            auth,
            Arc::new(UserIdContext::new()),
            DeviceInfo::collect(),
            None,
        )
    }

    /// Full constructor: ambient contexts and, when given, the ingestion
    /// client's event stream. Transport pause/resume events pause and
    /// resume every unit under the group's own identifier; a fatal error
    /// disables the whole group and wipes its staged data.
    pub fn with_context(
        store: Arc<dyn LogStore>,
        ingestion: Arc<dyn Ingestion>,
        auth: Arc<AuthTokenContext>,
        user: Arc<UserIdContext>,
        device: DeviceInfo,
        ingestion_events: Option<mpsc::UnboundedReceiver<IngestionEvent>>,
    ) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let shared = GroupShared {
            store,
            ingestion,
            auth,
            user,
            device,
            commands: commands.clone(),
        };
        let actor = GroupActor {
            shared,
            units: HashMap::new(),
        };
        tokio::spawn(actor.run(commands_rx));

        let ingestion_token = PauseToken::new();
        if let Some(mut events) = ingestion_events {
            let commands = commands.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let command = match event {
                        IngestionEvent::Paused => GroupCommand::PauseAll {
                            token: ingestion_token,
                        },
                        IngestionEvent::Resumed => GroupCommand::ResumeAll {
                            token: ingestion_token,
                        },
                        IngestionEvent::FatalError => {
                            error!("Fatal ingestion error, disabling and wiping all groups");
                            GroupCommand::SetEnabledAll {
                                enabled: false,
                                delete_data: true,
                            }
                        }
                    };
                    if commands.send(command).is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            commands,
            ingestion_token,
        }
    }

    /// Attach a unit for `config.group_id` and return its handle once
    /// the serial context has processed the attachment. Fails if a unit
    /// for this group already exists or the group has shut down.
    pub async fn add_unit(&self, config: ChannelConfig) -> Result<ChannelUnit, ChannelError> {
        let group_id = config.group_id.clone();
        let (reply, attached) = oneshot::channel();
        self.commands
            .send(GroupCommand::AttachUnit { config, reply })
            .map_err(|_| ChannelError::Closed)?;
        attached.await.map_err(|_| ChannelError::Closed)??;
        Ok(ChannelUnit {
            group_id,
            commands: self.commands.clone(),
        })
    }

    /// Enable or disable every unit. Disabling with `delete_data` wipes
    /// staged records and cancels in-flight batches.
    pub fn set_enabled(&self, enabled: bool, delete_data: bool) {
        let _ = self.commands.send(GroupCommand::SetEnabledAll {
            enabled,
            delete_data,
        });
    }

    /// Pause every unit under the given identifier.
    pub fn pause(&self, token: PauseToken) {
        let _ = self.commands.send(GroupCommand::PauseAll { token });
    }

    /// Release the given identifier on every unit.
    pub fn resume(&self, token: PauseToken) {
        let _ = self.commands.send(GroupCommand::ResumeAll { token });
    }

    /// The identifier the group uses when the ingestion client pauses it.
    pub fn ingestion_pause_token(&self) -> PauseToken {
        self.ingestion_token
    }

    /// Wait until every command submitted before this call has been
    /// processed. Intended for teardown and tests.
    pub async fn flush_sync(&self) {
        let (reply, ack) = oneshot::channel();
        if self.commands.send(GroupCommand::Barrier { reply }).is_ok() {
            let _ = ack.await;
        }
    }

    /// Stop the serial context. Commands posted afterwards are dropped.
    pub fn shutdown(&self) {
        let _ = self.commands.send(GroupCommand::Shutdown);
    }
}

/// Handle to one group's channel unit. Cheap to clone; every method
/// submits work to the group's serial context and returns immediately.
#[derive(Clone)]
pub struct ChannelUnit {
    group_id: String,
    commands: mpsc::UnboundedSender<GroupCommand>,
}

impl ChannelUnit {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn enqueue(&self, log: LogRecord) {
        self.enqueue_with_flags(log, Persistence::Default);
    }

    pub fn enqueue_with_flags(&self, log: LogRecord, flags: Persistence) {
        let _ = self.commands.send(GroupCommand::Enqueue {
            group_id: self.group_id.clone(),
            log,
            flags,
        });
    }

    pub fn add_delegate(&self, delegate: Arc<dyn ChannelDelegate>) {
        let _ = self.commands.send(GroupCommand::AddDelegate {
            group_id: self.group_id.clone(),
            delegate,
        });
    }

    pub fn remove_delegate(&self, delegate: Arc<dyn ChannelDelegate>) {
        let _ = self.commands.send(GroupCommand::RemoveDelegate {
            group_id: self.group_id.clone(),
            delegate,
        });
    }

    pub fn pause(&self, token: PauseToken) {
        let _ = self.commands.send(GroupCommand::Pause {
            group_id: self.group_id.clone(),
            token,
        });
    }

    pub fn resume(&self, token: PauseToken) {
        let _ = self.commands.send(GroupCommand::Resume {
            group_id: self.group_id.clone(),
            token,
        });
    }

    /// Pause the target key carried by `target_token`. Records addressed
    /// only to paused keys stay staged and are not sent.
    pub fn pause_target(&self, target_token: &str) {
        let _ = self.commands.send(GroupCommand::PauseTarget {
            group_id: self.group_id.clone(),
            target_token: target_token.to_string(),
        });
    }

    pub fn resume_target(&self, target_token: &str) {
        let _ = self.commands.send(GroupCommand::ResumeTarget {
            group_id: self.group_id.clone(),
            target_token: target_token.to_string(),
        });
    }

    pub fn set_enabled(&self, enabled: bool, delete_data: bool) {
        let _ = self.commands.send(GroupCommand::SetEnabled {
            group_id: self.group_id.clone(),
            enabled,
            delete_data,
        });
    }

    /// Current unit state, observed from the serial context.
    pub async fn snapshot(&self) -> Result<UnitSnapshot, ChannelError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(GroupCommand::Snapshot {
                group_id: self.group_id.clone(),
                reply,
            })
            .map_err(|_| ChannelError::Closed)?;
        match response.await {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => Err(ChannelError::UnknownGroup(self.group_id.clone())),
            Err(_) => Err(ChannelError::Closed),
        }
    }

    /// Wait until every command submitted before this call has been
    /// processed. Intended for teardown and tests.
    pub async fn flush_sync(&self) {
        let (reply, ack) = oneshot::channel();
        if self.commands.send(GroupCommand::Barrier { reply }).is_ok() {
            let _ = ack.await;
        }
    }
}

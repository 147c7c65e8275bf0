//! One chat room, wired end to end.
//!
//! [`ChatSession`] is a handle. All state lives in a driver task that owns
//! the connection manager, the message store, the presence signaler and
//! every deadline, and applies commands, transport deliveries and timer
//! expiries one at a time from a single `select!` loop. Dropping the handle
//! shuts the driver down the same way [`ChatSession::dispose`] does.

use std::future::pending;
use std::ops::ControlFlow;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::MessagesApi;
use crate::connection::{ConnectionManager, Delivery};
use crate::entities::{ChatMessage, PendingMessage};
use crate::presence::{PresenceSignaler, PresenceState};
use crate::settings::SyncSettings;
use crate::store::{MergeOutcome, MessageStore};
use crate::timer::Deadlines;
use crate::transport::{Connector, HttpConnector, SendFuture, SendReceipt};
use crate::types::{
    ConnectionState, ConnectionStatus, Identity, InboundFrame, MessageId, MessageType,
    OutboundFrame, RoomId, SyncError, SyncResult,
};

const EVENT_CAPACITY: usize = 32;

/// How a send completed.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The server stored the message and returned it.
    Confirmed(ChatMessage),
    /// The live channel accepted the message; its echo will replace the draft.
    AwaitingConfirmation { temp_id: MessageId },
}

/// Send-level notifications that do not fit the message or status streams.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A live send was never echoed back and its draft was removed.
    SendTimedOut { draft: PendingMessage },
    /// The server reported an error on the live channel.
    RemoteError { message: String },
}

enum Command {
    Send {
        content: String,
        message_type: MessageType,
        reply: oneshot::Sender<SyncResult<SendOutcome>>,
    },
    Typing,
    MarkRead {
        message_id: MessageId,
    },
    ForceReconnect,
    Dispose {
        done: oneshot::Sender<()>,
    },
}

pub struct ChatSession {
    room_id: RoomId,
    identity: Identity,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionState>,
    messages: watch::Receiver<Vec<ChatMessage>>,
    presence: watch::Receiver<PresenceState>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatSession {
    /// Start a session for `room_id`. Must be called from within a tokio runtime.
    pub fn start(
        room_id: impl Into<RoomId>,
        identity: Identity,
        settings: SyncSettings,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let room_id = room_id.into();
        let manager = ConnectionManager::new(room_id.clone(), Arc::clone(&connector), &settings);
        let status = manager.subscribe();

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (messages_tx, messages) = watch::channel(Vec::new());
        let (presence_tx, presence) = watch::channel(PresenceState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let driver = SessionDriver {
            room_id: room_id.clone(),
            identity: identity.clone(),
            manager,
            store: MessageStore::new(room_id.clone()),
            presence: PresenceSignaler::new(identity.sender_type, &settings),
            settings,
            commands: commands_rx,
            messages_tx,
            presence_tx,
            events_tx: events.clone(),
            history: Some(connector.history()),
            in_flight: FuturesUnordered::new(),
            unconfirmed: Deadlines::new(),
        };
        tokio::spawn(driver.run());

        info!(%room_id, sender_type = %identity.sender_type, "chat session started");

        Self {
            room_id,
            identity,
            commands: commands_tx,
            status,
            messages,
            presence,
            events,
        }
    }

    /// Start a session against the studio's HTTP and WebSocket endpoints.
    pub fn connect(
        room_id: impl Into<RoomId>,
        identity: Identity,
        settings: SyncSettings,
        api: MessagesApi,
    ) -> SyncResult<Self> {
        let room_id = room_id.into();
        let connector = HttpConnector::new(api, room_id.clone(), identity.clone(), &settings)?;
        Ok(Self::start(room_id, identity, settings, connector.shared()))
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub async fn send(&self, content: impl Into<String>) -> SyncResult<SendOutcome> {
        self.send_as(content, MessageType::Text).await
    }

    /// Send a message. The draft is shown at once and is either confirmed or
    /// rolled back; a failure is returned to the caller.
    pub async fn send_as(
        &self,
        content: impl Into<String>,
        message_type: MessageType,
    ) -> SyncResult<SendOutcome> {
        let content = content.into();
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::validation("message content is empty"));
        }

        let (reply, outcome) = oneshot::channel();
        self.command(Command::Send {
            content: content.to_string(),
            message_type,
            reply,
        })?;
        outcome.await.map_err(|_| SyncError::Disposed)?
    }

    /// Signal that the local participant is typing. Throttled; dropped unless live.
    pub fn notify_typing(&self) -> SyncResult<()> {
        self.command(Command::Typing)
    }

    /// Mark a message read locally and tell the other side when live.
    pub fn mark_read(&self, message_id: impl Into<MessageId>) -> SyncResult<()> {
        self.command(Command::MarkRead {
            message_id: message_id.into(),
        })
    }

    pub fn force_reconnect(&self) -> SyncResult<()> {
        self.command(Command::ForceReconnect)
    }

    /// Tear everything down. Safe to call any number of times.
    pub async fn dispose(&self) {
        let (done, finished) = oneshot::channel();
        if self.command(Command::Dispose { done }).is_ok() {
            let _ = finished.await;
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().status
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.borrow().clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.messages.clone()
    }

    pub fn presence(&self) -> PresenceState {
        self.presence.borrow().clone()
    }

    pub fn subscribe_presence(&self) -> watch::Receiver<PresenceState> {
        self.presence.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn command(&self, command: Command) -> SyncResult<()> {
        self.commands.send(command).map_err(|_| SyncError::Disposed)
    }
}

struct SettledSend {
    pending: PendingMessage,
    result: SyncResult<SendReceipt>,
    reply: oneshot::Sender<SyncResult<SendOutcome>>,
}

struct SessionDriver {
    room_id: RoomId,
    identity: Identity,
    settings: SyncSettings,
    manager: ConnectionManager,
    store: MessageStore,
    presence: PresenceSignaler,
    commands: mpsc::UnboundedReceiver<Command>,
    messages_tx: watch::Sender<Vec<ChatMessage>>,
    presence_tx: watch::Sender<PresenceState>,
    events_tx: broadcast::Sender<SessionEvent>,
    history: Option<BoxFuture<'static, SyncResult<Vec<ChatMessage>>>>,
    in_flight: FuturesUnordered<BoxFuture<'static, SettledSend>>,
    unconfirmed: Deadlines<Uuid>,
}

impl SessionDriver {
    async fn run(mut self) {
        if let Err(error) = self.manager.start() {
            warn!(room_id = %self.room_id, %error, "unable to start connection");
            return;
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).is_break() {
                            return;
                        }
                    }
                    None => {
                        self.shutdown();
                        return;
                    }
                },
                delivery = self.manager.next_delivery() => self.apply(delivery),
                Some(settled) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.settle(settled);
                }
                result = settle_history(&mut self.history) => self.apply_history(result),
                sender_type = self.presence.next_expiry() => {
                    debug!(room_id = %self.room_id, %sender_type, "typing indicator expired");
                    self.publish_presence();
                }
                token = self.unconfirmed.expired() => self.expire(token),
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Send {
                content,
                message_type,
                reply,
            } => self.begin_send(content, message_type, reply),
            Command::Typing => {
                if self.manager.is_live() && self.presence.notify_typing() {
                    self.send_best_effort(OutboundFrame::Typing);
                }
            }
            Command::MarkRead { message_id } => {
                if self.store.mark_read(&message_id) {
                    self.publish_messages();
                }
                if self.manager.is_live() {
                    self.send_best_effort(OutboundFrame::Read { message_id });
                }
            }
            Command::ForceReconnect => {
                if let Err(error) = self.manager.force_reconnect() {
                    debug!(room_id = %self.room_id, %error, "reconnect ignored");
                }
            }
            Command::Dispose { done } => {
                self.shutdown();
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn begin_send(
        &mut self,
        content: String,
        message_type: MessageType,
        reply: oneshot::Sender<SyncResult<SendOutcome>>,
    ) {
        let pending = PendingMessage::new(self.room_id.clone(), &self.identity, content, message_type);
        self.store.insert_optimistic(pending.clone());

        match self.manager.send(pending.to_frame()) {
            Ok(delivery) => {
                self.publish_messages();
                self.in_flight.push(Box::pin(async move {
                    SettledSend {
                        result: delivery.await,
                        pending,
                        reply,
                    }
                }));
            }
            Err(error) => {
                self.store.remove_optimistic(&pending.temp_id);
                warn!(room_id = %self.room_id, %error, "send failed, draft rolled back");
                let _ = reply.send(Err(error));
            }
        }
    }

    fn settle(&mut self, settled: SettledSend) {
        let SettledSend {
            pending,
            result,
            reply,
        } = settled;

        let outcome = match result {
            Ok(SendReceipt::Confirmed(record)) => {
                self.unconfirmed.cancel(&pending.token);
                let merged = self.store.confirm_pending(&pending.temp_id, record.clone());
                self.publish_messages();
                match merged {
                    // Duplicate: the live echo or a poll stored the record first.
                    MergeOutcome::Inserted
                    | MergeOutcome::Replaced(_)
                    | MergeOutcome::Duplicate => Ok(SendOutcome::Confirmed(record)),
                    MergeOutcome::Ignored => {
                        warn!(
                            room_id = %self.room_id,
                            confirmed_room = %record.room_id,
                            "send confirmed for another room, draft rolled back"
                        );
                        Err(SyncError::rejected(format!(
                            "message was stored in room {}",
                            record.room_id
                        )))
                    }
                }
            }
            Ok(SendReceipt::Accepted) => {
                // The echo may already have replaced the draft.
                if self.store.has_pending(pending.token) {
                    self.unconfirmed
                        .schedule(pending.token, self.settings.unconfirmed_timeout);
                }
                Ok(SendOutcome::AwaitingConfirmation {
                    temp_id: pending.temp_id,
                })
            }
            Err(error) => {
                if self.store.remove_optimistic(&pending.temp_id).is_some() {
                    self.publish_messages();
                }
                warn!(room_id = %self.room_id, %error, "send failed, draft rolled back");
                Err(error)
            }
        };

        let _ = reply.send(outcome);
    }

    fn apply(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Frame(InboundFrame::Message {
                message,
                client_token,
            }) => {
                let outcome = self.store.reconcile_confirmed(message, client_token);
                if let MergeOutcome::Replaced(pending) = &outcome {
                    self.unconfirmed.cancel(&pending.token);
                }
                if outcome.changed() {
                    self.publish_messages();
                }
            }
            Delivery::Frame(InboundFrame::Typing { sender_type }) => {
                if self.presence.on_remote_typing(sender_type) {
                    self.publish_presence();
                }
            }
            Delivery::Frame(InboundFrame::Presence {
                sender_type,
                online,
            }) => {
                if self.presence.on_presence(sender_type, online) {
                    self.publish_presence();
                }
            }
            Delivery::Frame(InboundFrame::Read { message_id }) => {
                if self.store.mark_read(&message_id) {
                    self.publish_messages();
                }
            }
            Delivery::Frame(InboundFrame::Error { message }) => {
                warn!(room_id = %self.room_id, %message, "server reported an error");
                let _ = self.events_tx.send(SessionEvent::RemoteError { message });
            }
            Delivery::Snapshot(messages) => self.merge(messages),
        }
    }

    fn apply_history(&mut self, result: SyncResult<Vec<ChatMessage>>) {
        match result {
            Ok(messages) => {
                debug!(room_id = %self.room_id, count = messages.len(), "history loaded");
                self.merge(messages);
            }
            Err(error) => warn!(room_id = %self.room_id, %error, "history load failed"),
        }
    }

    fn merge(&mut self, messages: Vec<ChatMessage>) {
        let summary = self.store.merge_snapshot(messages);
        for pending in &summary.replaced {
            self.unconfirmed.cancel(&pending.token);
        }
        if summary.changed() {
            self.publish_messages();
        }
    }

    fn expire(&mut self, token: Uuid) {
        if let Some(draft) = self.store.remove_pending_by_token(token) {
            self.publish_messages();
            warn!(
                room_id = %self.room_id,
                temp_id = %draft.temp_id,
                "send was never confirmed, draft rolled back"
            );
            let _ = self.events_tx.send(SessionEvent::SendTimedOut { draft });
        }
    }

    fn send_best_effort(&self, frame: OutboundFrame) {
        let kind = frame.kind_name();
        match self.manager.send(frame) {
            Ok(delivery) => spawn_best_effort(self.room_id.clone(), kind, delivery),
            Err(error) => debug!(room_id = %self.room_id, kind, %error, "frame not sent"),
        }
    }

    fn shutdown(&mut self) {
        self.commands.close();
        self.manager.dispose();
        self.presence.clear();
        self.publish_presence();
        self.unconfirmed.clear();
        self.history = None;
        self.in_flight = FuturesUnordered::new();
        info!(room_id = %self.room_id, "chat session disposed");
    }

    fn publish_messages(&self) {
        self.messages_tx.send_replace(self.store.messages());
    }

    fn publish_presence(&self) {
        self.presence_tx.send_replace(self.presence.state().clone());
    }
}

fn spawn_best_effort(room_id: RoomId, kind: &'static str, delivery: SendFuture) {
    tokio::spawn(async move {
        if let Err(error) = delivery.await {
            debug!(%room_id, kind, %error, "best-effort frame failed");
        }
    });
}

async fn settle_history(
    slot: &mut Option<BoxFuture<'static, SyncResult<Vec<ChatMessage>>>>,
) -> SyncResult<Vec<ChatMessage>> {
    match slot {
        Some(load) => {
            let result = load.await;
            *slot = None;
            result
        }
        None => pending().await,
    }
}

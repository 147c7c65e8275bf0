//! Which transport is active, and how the session gets back to live.
//!
//! The manager starts on the live channel. Every close of the live channel
//! counts as a failed attempt and schedules a retry after a fixed delay;
//! once the attempt bound is reached it reports `disconnected` and falls
//! back to polling, where it stays until [`ConnectionManager::force_reconnect`].
//! A successful open resets the attempt count.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::entities::ChatMessage;
use crate::settings::SyncSettings;
use crate::timer::Timer;
use crate::transport::{
    Connector, EventSink, SendFuture, Transport, TransportEvent, TransportKind, TransportSignal,
};
use crate::types::{
    ConnectionState, ConnectionStatus, InboundFrame, OutboundFrame, RoomId, SyncError, SyncResult,
};

/// Inbound data for the session to merge.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Frame(InboundFrame),
    Snapshot(Vec<ChatMessage>),
}

struct ActiveTransport {
    transport: Box<dyn Transport>,
    generation: u64,
    ready: bool,
}

pub struct ConnectionManager {
    room_id: RoomId,
    connector: Arc<dyn Connector>,
    settings: SyncSettings,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    active: Option<ActiveTransport>,
    generation: u64,
    retry: Timer,
    disposed: bool,
}

impl ConnectionManager {
    pub fn new(
        room_id: impl Into<RoomId>,
        connector: Arc<dyn Connector>,
        settings: &SyncSettings,
    ) -> Self {
        let state = ConnectionState::initial();
        let (state_tx, _) = watch::channel(state);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            room_id: room_id.into(),
            connector,
            settings: settings.clone(),
            state,
            state_tx,
            events_tx,
            events_rx,
            active: None,
            generation: 0,
            retry: Timer::new(),
            disposed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The transport able to send right now, if any.
    pub fn active_kind(&self) -> Option<TransportKind> {
        self.active
            .as_ref()
            .filter(|active| active.ready)
            .map(|active| active.transport.kind())
    }

    pub fn is_live(&self) -> bool {
        self.active_kind() == Some(TransportKind::Live)
    }

    /// Generation of the most recently opened transport.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Open the live channel. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> SyncResult<()> {
        self.ensure_alive()?;
        self.connect_live();
        Ok(())
    }

    /// Drop whatever is active and start over on the live channel with a
    /// fresh attempt count.
    pub fn force_reconnect(&mut self) -> SyncResult<()> {
        self.ensure_alive()?;
        info!(room_id = %self.room_id, "manual reconnect requested");
        self.retry.cancel();
        self.state.reconnect_attempts = 0;
        self.connect_live();
        Ok(())
    }

    /// Hand `frame` to the active transport.
    pub fn send(&self, frame: OutboundFrame) -> SyncResult<SendFuture> {
        self.ensure_alive()?;
        match &self.active {
            Some(active) if active.ready => Ok(active.transport.send(frame)),
            _ => Err(SyncError::NotConnected),
        }
    }

    /// Tear down the active transport and cancel the retry timer.
    /// Calling this more than once has no further effect.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.retry.cancel();
        self.teardown();
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Wait for the next transport event or retry deadline and apply it.
    /// Returns data for the session when the event carried any.
    pub async fn step(&mut self) -> Option<Delivery> {
        tokio::select! {
            () = self.retry.fired() => {
                self.on_retry();
                None
            }
            Some(event) = self.events_rx.recv() => self.handle(event),
        }
    }

    /// Drive the manager until something needs merging.
    pub async fn next_delivery(&mut self) -> Delivery {
        loop {
            if let Some(delivery) = self.step().await {
                return delivery;
            }
        }
    }

    fn ensure_alive(&self) -> SyncResult<()> {
        if self.disposed {
            Err(SyncError::Disposed)
        } else {
            Ok(())
        }
    }

    fn handle(&mut self, event: TransportEvent) -> Option<Delivery> {
        let current = self
            .active
            .as_ref()
            .is_some_and(|active| active.generation == event.generation);
        if !current {
            debug!(
                room_id = %self.room_id,
                generation = event.generation,
                kind = event.kind.as_str(),
                "dropping event from stale transport"
            );
            return None;
        }

        match event.signal {
            TransportSignal::Opened => {
                self.on_opened(event.kind);
                None
            }
            TransportSignal::Frame(frame) => Some(Delivery::Frame(frame)),
            TransportSignal::Snapshot(messages) => Some(Delivery::Snapshot(messages)),
            TransportSignal::Closed { reason } => {
                match event.kind {
                    TransportKind::Live => self.on_live_closed(&reason),
                    TransportKind::Poll => self.on_poll_closed(&reason),
                }
                None
            }
        }
    }

    fn on_opened(&mut self, kind: TransportKind) {
        if let Some(active) = self.active.as_mut() {
            active.ready = true;
        }
        if kind == TransportKind::Live {
            self.state.reconnect_attempts = 0;
            self.set_status(ConnectionStatus::Connected);
        }
    }

    fn on_live_closed(&mut self, reason: &str) {
        self.teardown();
        self.state.reconnect_attempts = self.state.reconnect_attempts.saturating_add(1);
        let attempt = self.state.reconnect_attempts;

        if attempt >= self.settings.max_reconnect_attempts {
            warn!(room_id = %self.room_id, attempt, reason, "live channel unavailable, falling back to polling");
            self.set_status(ConnectionStatus::Disconnected);
            self.engage_polling();
        } else {
            warn!(room_id = %self.room_id, attempt, reason, "live channel closed, retrying");
            self.set_status(ConnectionStatus::Reconnecting);
            self.retry.arm(self.settings.reconnect_delay);
        }
    }

    fn on_poll_closed(&mut self, reason: &str) {
        warn!(room_id = %self.room_id, reason, "poll transport stopped, restarting");
        self.teardown();
        self.retry.arm(self.settings.reconnect_delay);
    }

    fn on_retry(&mut self) {
        if self.status() == ConnectionStatus::Polling {
            self.engage_polling();
        } else {
            self.connect_live();
        }
    }

    fn connect_live(&mut self) {
        self.set_status(ConnectionStatus::Connecting);
        self.open(TransportKind::Live);
    }

    fn engage_polling(&mut self) {
        self.open(TransportKind::Poll);
        self.set_status(ConnectionStatus::Polling);
    }

    fn open(&mut self, kind: TransportKind) {
        self.teardown();
        self.generation += 1;

        let mut transport = match kind {
            TransportKind::Live => self.connector.live(),
            TransportKind::Poll => self.connector.poll(),
        };
        debug!(room_id = %self.room_id, generation = self.generation, kind = kind.as_str(), "opening transport");
        transport.open(EventSink::new(
            self.generation,
            kind,
            self.events_tx.clone(),
        ));

        self.active = Some(ActiveTransport {
            transport,
            generation: self.generation,
            // Polling can send through REST as soon as it exists.
            ready: kind == TransportKind::Poll,
        });
    }

    fn teardown(&mut self) {
        if let Some(mut active) = self.active.take() {
            debug!(
                room_id = %self.room_id,
                generation = active.generation,
                kind = active.transport.kind().as_str(),
                "closing transport"
            );
            active.transport.close();
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        let changed = self.state.status != status;
        self.state.status = status;
        self.state_tx.send_replace(self.state);

        if changed {
            info!(
                room_id = %self.room_id,
                status = %status,
                attempt = self.state.reconnect_attempts,
                "connection status changed"
            );
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

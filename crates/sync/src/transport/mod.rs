//! Delivery mechanisms for a chat room.
//!
//! A transport reports everything it observes through the [`EventSink`] it
//! was opened with. Each sink carries the generation of the transport
//! instance it belongs to, so events from an instance that has since been
//! replaced can be recognised and discarded by the receiver.

pub mod live;
pub mod poll;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use reqwest::Url;
use tokio::sync::mpsc;

pub use live::LiveTransport;
pub use poll::PollTransport;

use crate::api::MessagesApi;
use crate::entities::ChatMessage;
use crate::settings::SyncSettings;
use crate::types::{Identity, InboundFrame, OutboundFrame, RoomId, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Persistent bidirectional channel
    Live,
    /// Periodic fetch fallback
    Poll,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Live => "live",
            TransportKind::Poll => "poll",
        }
    }
}

/// How a transport acknowledged an outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SendReceipt {
    /// The frame was written to the channel; confirmation arrives as an echo.
    Accepted,
    /// The server stored the message and returned the record.
    Confirmed(ChatMessage),
}

pub type SendFuture = BoxFuture<'static, SyncResult<SendReceipt>>;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    Opened,
    Frame(InboundFrame),
    Snapshot(Vec<ChatMessage>),
    Closed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub generation: u64,
    pub kind: TransportKind,
    pub signal: TransportSignal,
}

/// Where a transport instance reports to.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    kind: TransportKind,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub fn new(
        generation: u64,
        kind: TransportKind,
        tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            generation,
            kind,
            tx,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    // Each emitter returns false once the receiving side is gone.

    pub fn opened(&self) -> bool {
        self.emit(TransportSignal::Opened)
    }

    pub fn frame(&self, frame: InboundFrame) -> bool {
        self.emit(TransportSignal::Frame(frame))
    }

    pub fn snapshot(&self, messages: Vec<ChatMessage>) -> bool {
        self.emit(TransportSignal::Snapshot(messages))
    }

    pub fn closed(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportSignal::Closed {
            reason: reason.into(),
        })
    }

    fn emit(&self, signal: TransportSignal) -> bool {
        self.tx
            .send(TransportEvent {
                generation: self.generation,
                kind: self.kind,
                signal,
            })
            .is_ok()
    }
}

/// A delivery mechanism. `open` must be called from within a tokio runtime.
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Start delivering; progress is reported through `sink`.
    fn open(&mut self, sink: EventSink);

    fn send(&self, frame: OutboundFrame) -> SendFuture;

    /// Stop delivering. Nothing is reported after this returns.
    fn close(&mut self);
}

/// Builds transports for one room and identity.
pub trait Connector: Send + Sync {
    fn live(&self) -> Box<dyn Transport>;

    fn poll(&self) -> Box<dyn Transport>;

    /// The recent message window loaded once when a session starts.
    fn history(&self) -> BoxFuture<'static, SyncResult<Vec<ChatMessage>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// Connector backed by the studio's HTTP and WebSocket endpoints.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    api: MessagesApi,
    room_id: RoomId,
    identity: Identity,
    endpoint: Url,
    settings: SyncSettings,
}

impl HttpConnector {
    pub fn new(
        api: MessagesApi,
        room_id: impl Into<RoomId>,
        identity: Identity,
        settings: &SyncSettings,
    ) -> SyncResult<Self> {
        let room_id = room_id.into();
        let endpoint = live::endpoint_for(api.base_url(), &room_id, &identity)?;

        Ok(Self {
            api,
            room_id,
            identity,
            endpoint,
            settings: settings.clone(),
        })
    }

    pub fn shared(self) -> Arc<dyn Connector> {
        Arc::new(self)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Connector for HttpConnector {
    fn live(&self) -> Box<dyn Transport> {
        Box::new(LiveTransport::new(self.endpoint.clone(), self.room_id.clone()))
    }

    fn poll(&self) -> Box<dyn Transport> {
        Box::new(PollTransport::new(
            self.api.clone(),
            self.room_id.clone(),
            self.identity.clone(),
            &self.settings,
        ))
    }

    fn history(&self) -> BoxFuture<'static, SyncResult<Vec<ChatMessage>>> {
        let api = self.api.clone();
        let room_id = self.room_id.clone();
        let per_page = self.settings.poll_page_size;
        Box::pin(async move { api.fetch_recent(&room_id, per_page).await })
    }
}

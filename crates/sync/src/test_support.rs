//! Scripted transports for exercising sessions without a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::future::{self, BoxFuture};

use crate::entities::ChatMessage;
use crate::transport::{Connector, EventSink, SendFuture, SendReceipt, Transport, TransportKind};
use crate::types::{Identity, InboundFrame, OutboundFrame, RoomId, SyncError, SyncResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a scripted live transport does when opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveBehavior {
    /// Report the channel as open immediately.
    Open,
    /// Report the channel as closed immediately.
    Refuse,
    /// Report nothing until the test drives the handle.
    Hang,
}

#[derive(Debug)]
struct HandleState {
    kind: TransportKind,
    sink: Option<EventSink>,
    sent: Vec<OutboundFrame>,
    closed: bool,
}

/// Test-side view of one transport instance.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    state: Arc<Mutex<HandleState>>,
}

impl TransportHandle {
    fn new(kind: TransportKind) -> Self {
        Self {
            state: Arc::new(Mutex::new(HandleState {
                kind,
                sink: None,
                sent: Vec::new(),
                closed: false,
            })),
        }
    }

    pub fn kind(&self) -> TransportKind {
        lock(&self.state).kind
    }

    pub fn generation(&self) -> Option<u64> {
        lock(&self.state).sink.as_ref().map(EventSink::generation)
    }

    /// Frames handed to this transport, in order.
    pub fn sent(&self) -> Vec<OutboundFrame> {
        lock(&self.state).sent.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn open(&self) -> bool {
        self.with_sink(EventSink::opened)
    }

    pub fn deliver(&self, frame: InboundFrame) -> bool {
        self.with_sink(|sink| sink.frame(frame))
    }

    /// Deliver a raw text frame the way the live channel would, dropping it
    /// when it does not parse.
    pub fn deliver_text(&self, text: &str, room_id: &str) -> bool {
        match InboundFrame::parse(text, room_id) {
            Ok(frame) => self.deliver(frame),
            Err(_) => false,
        }
    }

    pub fn snapshot(&self, messages: Vec<ChatMessage>) -> bool {
        self.with_sink(|sink| sink.snapshot(messages))
    }

    pub fn drop_connection(&self, reason: &str) -> bool {
        self.with_sink(|sink| sink.closed(reason))
    }

    fn with_sink(&self, emit: impl FnOnce(&EventSink) -> bool) -> bool {
        let sink = lock(&self.state).sink.clone();
        sink.as_ref().map_or(false, emit)
    }

    fn record(&self, frame: OutboundFrame) {
        lock(&self.state).sent.push(frame);
    }
}

#[derive(Debug)]
struct Script {
    live_plan: VecDeque<LiveBehavior>,
    default_live: LiveBehavior,
    send_failure: Option<String>,
    stored_room: Option<RoomId>,
    history: Vec<ChatMessage>,
    live: Vec<TransportHandle>,
    poll: Vec<TransportHandle>,
    rest_counter: u64,
}

/// Connector whose transports follow a script instead of touching the network.
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    room_id: RoomId,
    identity: Identity,
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub fn new(room_id: impl Into<RoomId>, identity: Identity) -> Self {
        Self {
            room_id: room_id.into(),
            identity,
            script: Arc::new(Mutex::new(Script {
                live_plan: VecDeque::new(),
                default_live: LiveBehavior::Open,
                send_failure: None,
                stored_room: None,
                history: Vec::new(),
                live: Vec::new(),
                poll: Vec::new(),
                rest_counter: 0,
            })),
        }
    }

    pub fn shared(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Behaviour for live attempts once the scripted plan is used up.
    pub fn with_default_live(self, behavior: LiveBehavior) -> Self {
        lock(&self.script).default_live = behavior;
        self
    }

    /// Behaviours for the next live attempts, in order.
    pub fn with_live_plan(self, plan: impl IntoIterator<Item = LiveBehavior>) -> Self {
        lock(&self.script).live_plan.extend(plan);
        self
    }

    pub fn with_history(self, history: Vec<ChatMessage>) -> Self {
        lock(&self.script).history = history;
        self
    }

    /// Make every subsequent send fail with a rejection.
    pub fn fail_sends(&self, message: Option<&str>) {
        lock(&self.script).send_failure = message.map(str::to_string);
    }

    /// Make REST sends report the record as stored in `room_id`.
    pub fn store_sends_in(&self, room_id: Option<&str>) {
        lock(&self.script).stored_room = room_id.map(str::to_string);
    }

    pub fn set_default_live(&self, behavior: LiveBehavior) {
        lock(&self.script).default_live = behavior;
    }

    pub fn live_attempts(&self) -> usize {
        lock(&self.script).live.len()
    }

    pub fn poll_opens(&self) -> usize {
        lock(&self.script).poll.len()
    }

    pub fn last_live(&self) -> Option<TransportHandle> {
        lock(&self.script).live.last().cloned()
    }

    pub fn last_poll(&self) -> Option<TransportHandle> {
        lock(&self.script).poll.last().cloned()
    }

    fn next_live_behavior(&self) -> LiveBehavior {
        let mut script = lock(&self.script);
        let fallback = script.default_live;
        script.live_plan.pop_front().unwrap_or(fallback)
    }
}

impl Connector for ScriptedConnector {
    fn live(&self) -> Box<dyn Transport> {
        let behavior = self.next_live_behavior();
        let handle = TransportHandle::new(TransportKind::Live);
        lock(&self.script).live.push(handle.clone());

        Box::new(ScriptedTransport {
            kind: TransportKind::Live,
            behavior,
            handle,
            owner: self.clone(),
        })
    }

    fn poll(&self) -> Box<dyn Transport> {
        let handle = TransportHandle::new(TransportKind::Poll);
        lock(&self.script).poll.push(handle.clone());

        Box::new(ScriptedTransport {
            kind: TransportKind::Poll,
            behavior: LiveBehavior::Open,
            handle,
            owner: self.clone(),
        })
    }

    fn history(&self) -> BoxFuture<'static, SyncResult<Vec<ChatMessage>>> {
        let history = lock(&self.script).history.clone();
        Box::pin(future::ready(Ok(history)))
    }
}

struct ScriptedTransport {
    kind: TransportKind,
    behavior: LiveBehavior,
    handle: TransportHandle,
    owner: ScriptedConnector,
}

impl ScriptedTransport {
    fn stored_record(&self, content: String, frame: &OutboundFrame) -> ChatMessage {
        let mut script = lock(&self.owner.script);
        script.rest_counter += 1;
        let message_type = match frame {
            OutboundFrame::Message { message_type, .. } => *message_type,
            _ => Default::default(),
        };

        ChatMessage {
            id: format!("rest-{}", script.rest_counter),
            room_id: script
                .stored_room
                .clone()
                .unwrap_or_else(|| self.owner.room_id.clone()),
            sender_type: self.owner.identity.sender_type,
            sender_id: self.owner.identity.sender_id.clone(),
            content,
            message_type,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn open(&mut self, sink: EventSink) {
        lock(&self.handle.state).sink = Some(sink.clone());

        match (self.kind, self.behavior) {
            (TransportKind::Poll, _) | (TransportKind::Live, LiveBehavior::Open) => {
                sink.opened();
            }
            (TransportKind::Live, LiveBehavior::Refuse) => {
                sink.closed("connection refused");
            }
            (TransportKind::Live, LiveBehavior::Hang) => {}
        }
    }

    fn send(&self, frame: OutboundFrame) -> SendFuture {
        self.handle.record(frame.clone());

        if let Some(message) = lock(&self.owner.script).send_failure.clone() {
            return Box::pin(future::ready(Err(SyncError::rejected(message))));
        }

        let result = match (self.kind, &frame) {
            (TransportKind::Live, _) => Ok(SendReceipt::Accepted),
            (TransportKind::Poll, OutboundFrame::Message { content, .. }) => Ok(
                SendReceipt::Confirmed(self.stored_record(content.clone(), &frame)),
            ),
            (TransportKind::Poll, other) => Err(SyncError::unsupported(
                other.kind_name(),
                TransportKind::Poll.as_str(),
            )),
        };
        Box::pin(future::ready(result))
    }

    // The sink stays reachable so tests can emit late events from a
    // replaced instance.
    fn close(&mut self) {
        lock(&self.handle.state).closed = true;
    }
}

/// A confirmed record for `room_id` as the server would echo it.
pub fn confirmed(id: &str, room_id: &str, sender: &Identity, content: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        room_id: room_id.to_string(),
        sender_type: sender.sender_type,
        sender_id: sender.sender_id.clone(),
        content: content.to_string(),
        message_type: Default::default(),
        is_read: false,
        created_at: Utc::now(),
    }
}

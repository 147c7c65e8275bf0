//! WebSocket transport.

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{EventSink, SendFuture, SendReceipt, Transport, TransportKind};
use crate::types::{Identity, InboundFrame, OutboundFrame, RoomId, SyncError, SyncResult};

const WS_PATH: &str = "api/chat/ws";

/// Live channel endpoint for a room, derived from the HTTP base URL.
pub fn endpoint_for(base_url: &Url, room_id: &str, identity: &Identity) -> SyncResult<Url> {
    let mut url = base_url
        .join(WS_PATH)
        .map_err(|error| SyncError::configuration(format!("invalid live channel url: {error}")))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(SyncError::configuration(format!(
                "unsupported url scheme {other:?}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| SyncError::configuration(format!("cannot switch url scheme to {scheme}")))?;

    url.query_pairs_mut()
        .clear()
        .append_pair("room_id", room_id)
        .append_pair("sender_type", identity.sender_type.as_str())
        .append_pair("sender_id", &identity.sender_id);

    Ok(url)
}

struct Outgoing {
    text: String,
    reply: oneshot::Sender<SyncResult<()>>,
}

pub struct LiveTransport {
    endpoint: Url,
    room_id: RoomId,
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    task: Option<JoinHandle<()>>,
}

impl LiveTransport {
    pub fn new(endpoint: Url, room_id: impl Into<RoomId>) -> Self {
        Self {
            endpoint,
            room_id: room_id.into(),
            outgoing: None,
            task: None,
        }
    }
}

impl Transport for LiveTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Live
    }

    fn open(&mut self, sink: EventSink) {
        self.close();

        let (tx, rx) = mpsc::unbounded_channel();
        self.outgoing = Some(tx);
        self.task = Some(tokio::spawn(run_connection(
            self.endpoint.clone(),
            self.room_id.clone(),
            sink,
            rx,
        )));
    }

    fn send(&self, frame: OutboundFrame) -> SendFuture {
        let encoded = serde_json::to_string(&frame);
        let outgoing = self.outgoing.clone();

        Box::pin(async move {
            let text = encoded?;
            let outgoing = outgoing.ok_or(SyncError::NotConnected)?;
            let (reply, written) = oneshot::channel();
            outgoing
                .send(Outgoing { text, reply })
                .map_err(|_| SyncError::NotConnected)?;
            written.await.map_err(|_| SyncError::NotConnected)??;
            Ok(SendReceipt::Accepted)
        })
    }

    fn close(&mut self) {
        self.outgoing = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LiveTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    endpoint: Url,
    room_id: RoomId,
    sink: EventSink,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) {
    let generation = sink.generation();

    let stream = match connect_async(endpoint.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(error) => {
            warn!(%room_id, generation, %error, "live channel failed to connect");
            sink.closed(error.to_string());
            return;
        }
    };

    debug!(%room_id, generation, "live channel open");
    let (mut writer, mut reader) = stream.split();
    sink.opened();

    let reason = loop {
        tokio::select! {
            Some(Outgoing { text, reply }) = outgoing.recv() => {
                let result = writer.send(Message::Text(text)).await.map_err(SyncError::from);
                let failure = result.as_ref().err().map(ToString::to_string);
                let _ = reply.send(result);
                if let Some(reason) = failure {
                    break reason;
                }
            }
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => deliver(&sink, &text, &room_id),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => deliver(&sink, &text, &room_id),
                    Err(_) => debug!(%room_id, generation, "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(_))) => break "closed by server".to_string(),
                Some(Ok(_)) => {}
                Some(Err(error)) => break error.to_string(),
                None => break "stream ended".to_string(),
            },
        }
    };

    warn!(%room_id, generation, %reason, "live channel closed");
    sink.closed(reason);
}

fn deliver(sink: &EventSink, text: &str, room_id: &str) {
    match InboundFrame::parse(text, room_id) {
        Ok(frame) => {
            sink.frame(frame);
        }
        Err(error) => {
            debug!(room_id, generation = sink.generation(), %error, "dropping malformed frame");
        }
    }
}

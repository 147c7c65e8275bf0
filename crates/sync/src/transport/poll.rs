//! Periodic fetch fallback.

use std::time::Duration;

use futures_util::future;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::{EventSink, SendFuture, SendReceipt, Transport, TransportKind};
use crate::api::{MessagesApi, NewMessage};
use crate::settings::SyncSettings;
use crate::types::{Identity, OutboundFrame, RoomId, SyncError};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct PollTransport {
    api: MessagesApi,
    room_id: RoomId,
    identity: Identity,
    page_size: u32,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl PollTransport {
    pub fn new(
        api: MessagesApi,
        room_id: impl Into<RoomId>,
        identity: Identity,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            api,
            room_id: room_id.into(),
            identity,
            page_size: settings.poll_page_size,
            interval: settings.poll_interval.max(MIN_INTERVAL),
            task: None,
        }
    }
}

impl Transport for PollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Poll
    }

    fn open(&mut self, sink: EventSink) {
        self.close();
        self.task = Some(tokio::spawn(run_polling(
            self.api.clone(),
            self.room_id.clone(),
            self.page_size,
            self.interval,
            sink,
        )));
    }

    /// Messages go out as a one-shot POST; nothing else can be sent.
    fn send(&self, frame: OutboundFrame) -> SendFuture {
        match frame {
            OutboundFrame::Message {
                content,
                message_type,
                ..
            } => {
                let api = self.api.clone();
                let body = NewMessage {
                    room_id: self.room_id.clone(),
                    sender_type: self.identity.sender_type,
                    sender_id: self.identity.sender_id.clone(),
                    content,
                    message_type,
                };
                Box::pin(async move { api.post_message(&body).await.map(SendReceipt::Confirmed) })
            }
            other => Box::pin(future::ready(Err(SyncError::unsupported(
                other.kind_name(),
                TransportKind::Poll.as_str(),
            )))),
        }
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_polling(
    api: MessagesApi,
    room_id: RoomId,
    page_size: u32,
    period: Duration,
    sink: EventSink,
) {
    let generation = sink.generation();
    sink.opened();

    // The first tick completes immediately.
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match api.fetch_recent(&room_id, page_size).await {
            Ok(messages) => {
                if !sink.snapshot(messages) {
                    debug!(%room_id, generation, "poll receiver gone, stopping");
                    return;
                }
            }
            Err(error) => warn!(%room_id, generation, %error, "poll fetch failed"),
        }
    }
}

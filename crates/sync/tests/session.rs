//! End-to-end session behaviour over scripted transports.

use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::sleep;
use uuid::Uuid;

use studio_chat_sync::test_support::{confirmed, LiveBehavior, ScriptedConnector, TransportHandle};
use studio_chat_sync::types::{InboundFrame, OutboundFrame};
use studio_chat_sync::{
    ChatMessage, ChatSession, ConnectionStatus, Identity, MessageType, SendOutcome, SenderType,
    SessionEvent, SyncError, SyncSettings,
};

const ROOM: &str = "r1";

fn client() -> Identity {
    Identity::client("c1")
}

fn artist() -> Identity {
    Identity::artist("a1")
}

async fn wait_for_status(session: &ChatSession, status: ConnectionStatus) {
    let mut receiver = session.subscribe_status();
    receiver
        .wait_for(|state| state.status == status)
        .await
        .expect("status channel closed");
}

async fn wait_for_messages(session: &ChatSession, ready: impl FnMut(&Vec<ChatMessage>) -> bool) {
    let mut receiver = session.subscribe_messages();
    receiver.wait_for(ready).await.expect("message channel closed");
}

async fn connected_session(connector: &ScriptedConnector) -> (ChatSession, TransportHandle) {
    let session = ChatSession::start(ROOM, client(), SyncSettings::default(), connector.shared());
    wait_for_status(&session, ConnectionStatus::Connected).await;
    let live = connector.last_live().expect("live transport opened");
    (session, live)
}

fn last_token(handle: &TransportHandle) -> Option<Uuid> {
    handle.sent().into_iter().rev().find_map(|frame| match frame {
        OutboundFrame::Message { client_token, .. } => client_token,
        _ => None,
    })
}

fn typing_frames(handle: &TransportHandle) -> usize {
    handle
        .sent()
        .iter()
        .filter(|frame| matches!(frame, OutboundFrame::Typing))
        .count()
}

fn ids(session: &ChatSession) -> Vec<String> {
    session.messages().into_iter().map(|message| message.id).collect()
}

#[tokio::test(start_paused = true)]
async fn send_while_connecting_fails_then_echo_confirms_later_send() {
    let connector = ScriptedConnector::new(ROOM, client()).with_default_live(LiveBehavior::Hang);
    let session = ChatSession::start(ROOM, client(), SyncSettings::default(), connector.shared());

    let error = session.send("Hi").await.unwrap_err();
    assert!(matches!(error, SyncError::NotConnected));
    assert!(session.messages().is_empty());

    let live = connector.last_live().unwrap();
    live.open();
    wait_for_status(&session, ConnectionStatus::Connected).await;

    let outcome = session.send("Hi").await.unwrap();
    assert!(matches!(outcome, SendOutcome::AwaitingConfirmation { .. }));
    let shown = session.messages();
    assert_eq!(shown.len(), 1);
    assert!(shown[0].is_temporary());

    live.deliver(InboundFrame::Message {
        message: confirmed("m42", ROOM, &client(), "Hi"),
        client_token: last_token(&live),
    });
    wait_for_messages(&session, |list| list.iter().any(|m| m.id == "m42")).await;

    let shown = session.messages();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].id, "m42");
    assert_eq!(shown[0].content, "Hi");
}

#[tokio::test(start_paused = true)]
async fn echo_without_token_reconciles_by_content() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;

    session.send("hello").await.unwrap();
    live.deliver(InboundFrame::Message {
        message: confirmed("m1", ROOM, &client(), "hello"),
        client_token: None,
    });
    wait_for_messages(&session, |list| list.iter().any(|m| m.id == "m1")).await;

    assert_eq!(ids(&session), ["m1"]);
}

#[tokio::test(start_paused = true)]
async fn silent_drop_during_backoff_produces_no_duplicates() {
    let connector = ScriptedConnector::new(ROOM, client())
        .with_live_plan([LiveBehavior::Open])
        .with_default_live(LiveBehavior::Hang);
    let (session, first) = connected_session(&connector).await;

    first.deliver(InboundFrame::Message {
        message: confirmed("m1", ROOM, &artist(), "Welcome"),
        client_token: None,
    });
    wait_for_messages(&session, |list| list.len() == 1).await;

    first.drop_connection("network lost");
    sleep(Duration::from_secs(20)).await;

    assert_eq!(connector.poll_opens(), 0);
    assert_eq!(connector.live_attempts(), 2);
    assert_eq!(session.status(), ConnectionStatus::Connecting);

    let second = connector.last_live().unwrap();
    second.open();
    second.deliver(InboundFrame::Message {
        message: confirmed("m1", ROOM, &artist(), "Welcome"),
        client_token: None,
    });
    second.deliver(InboundFrame::Message {
        message: confirmed("m2", ROOM, &artist(), "Still there?"),
        client_token: None,
    });
    wait_for_messages(&session, |list| list.iter().any(|m| m.id == "m2")).await;

    assert_eq!(session.status(), ConnectionStatus::Connected);
    assert_eq!(ids(&session), ["m1", "m2"]);
}

#[tokio::test(start_paused = true)]
async fn failed_live_send_rolls_back_draft() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, _live) = connected_session(&connector).await;

    connector.fail_sends(Some("socket closed"));
    let error = session.send("Hi").await.unwrap_err();

    assert!(matches!(error, SyncError::Rejected { .. }));
    assert!(session.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_content_is_rejected_without_a_draft() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;

    let error = session.send("   \n").await.unwrap_err();

    assert!(matches!(error, SyncError::Validation { .. }));
    assert!(session.messages().is_empty());
    assert!(live.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn content_is_trimmed_before_sending() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;

    session.send_as("  see you  ", MessageType::Text).await.unwrap();

    assert!(matches!(
        live.sent().as_slice(),
        [OutboundFrame::Message { content, .. }] if content == "see you"
    ));
}

#[tokio::test(start_paused = true)]
async fn typing_is_throttled_to_one_frame_per_window() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;

    for _ in 0..10 {
        session.notify_typing().unwrap();
        sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(typing_frames(&live), 1);
}

#[tokio::test(start_paused = true)]
async fn typing_after_window_sends_again() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;

    session.notify_typing().unwrap();
    sleep(Duration::from_millis(2_500)).await;
    session.notify_typing().unwrap();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(typing_frames(&live), 2);
}

#[tokio::test(start_paused = true)]
async fn polling_sends_through_rest_and_skips_typing() {
    let connector = ScriptedConnector::new(ROOM, client()).with_default_live(LiveBehavior::Refuse);
    let settings = SyncSettings {
        max_reconnect_attempts: 1,
        ..SyncSettings::default()
    };
    let session = ChatSession::start(ROOM, client(), settings, connector.shared());
    wait_for_status(&session, ConnectionStatus::Polling).await;

    let outcome = session.send("Hi").await.unwrap();
    let record = match outcome {
        SendOutcome::Confirmed(record) => record,
        other => panic!("expected a stored record, got {other:?}"),
    };
    assert_eq!(ids(&session), [record.id.clone()]);

    session.notify_typing().unwrap();
    sleep(Duration::from_millis(10)).await;
    let poll = connector.last_poll().unwrap();
    assert_eq!(typing_frames(&poll), 0);

    poll.snapshot(vec![record.clone()]);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(ids(&session), [record.id]);
}

#[tokio::test(start_paused = true)]
async fn rest_confirmation_for_another_room_rolls_back_draft() {
    let connector = ScriptedConnector::new(ROOM, client()).with_default_live(LiveBehavior::Refuse);
    let settings = SyncSettings {
        max_reconnect_attempts: 1,
        ..SyncSettings::default()
    };
    let session = ChatSession::start(ROOM, client(), settings, connector.shared());
    wait_for_status(&session, ConnectionStatus::Polling).await;
    connector.store_sends_in(Some("r2"));

    let error = session.send("Hi").await.unwrap_err();

    assert!(matches!(error, SyncError::Rejected { .. }), "unexpected error {error:?}");
    assert!(session.messages().is_empty());

    connector.store_sends_in(None);
    let outcome = session.send("Hi again").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Confirmed(_)));
    assert_eq!(session.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn same_record_over_live_and_poll_is_stored_once() {
    let connector = ScriptedConnector::new(ROOM, client())
        .with_live_plan([LiveBehavior::Open])
        .with_default_live(LiveBehavior::Refuse);
    let settings = SyncSettings {
        max_reconnect_attempts: 1,
        ..SyncSettings::default()
    };
    let session = ChatSession::start(ROOM, client(), settings, connector.shared());
    wait_for_status(&session, ConnectionStatus::Connected).await;

    let record = confirmed("m5", ROOM, &artist(), "Booked!");
    let live = connector.last_live().unwrap();
    live.deliver(InboundFrame::Message {
        message: record.clone(),
        client_token: None,
    });
    live.drop_connection("gone");
    wait_for_status(&session, ConnectionStatus::Polling).await;

    connector.last_poll().unwrap().snapshot(vec![record]);
    sleep(Duration::from_millis(10)).await;

    assert_eq!(ids(&session), ["m5"]);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_send_times_out_and_is_reported() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, _live) = connected_session(&connector).await;
    let mut events = session.subscribe_events();

    session.send("Anyone?").await.unwrap();
    assert_eq!(session.messages().len(), 1);

    match events.recv().await.unwrap() {
        SessionEvent::SendTimedOut { draft } => assert_eq!(draft.content, "Anyone?"),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(session.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn echo_before_deadline_cancels_timeout() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;
    let mut events = session.subscribe_events();

    session.send("Hi").await.unwrap();
    sleep(Duration::from_secs(5)).await;
    live.deliver(InboundFrame::Message {
        message: confirmed("m9", ROOM, &client(), "Hi"),
        client_token: last_token(&live),
    });
    sleep(Duration::from_secs(20)).await;

    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(ids(&session), ["m9"]);
}

#[tokio::test(start_paused = true)]
async fn history_is_merged_in_order() {
    let mut older = confirmed("m1", ROOM, &artist(), "first");
    older.created_at -= chrono::Duration::minutes(5);
    let newer = confirmed("m2", ROOM, &client(), "second");

    let connector = ScriptedConnector::new(ROOM, client()).with_history(vec![newer, older]);
    let session = ChatSession::start(ROOM, client(), SyncSettings::default(), connector.shared());
    wait_for_messages(&session, |list| list.len() == 2).await;

    assert_eq!(ids(&session), ["m1", "m2"]);
}

#[tokio::test(start_paused = true)]
async fn remote_typing_indicator_expires() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;

    live.deliver(InboundFrame::Typing {
        sender_type: SenderType::Artist,
    });
    let mut presence = session.subscribe_presence();
    presence
        .wait_for(|state| state.is_typing(SenderType::Artist))
        .await
        .unwrap();

    sleep(Duration::from_millis(3_100)).await;
    assert!(!session.presence().is_typing(SenderType::Artist));
}

#[tokio::test(start_paused = true)]
async fn presence_frames_update_online_set() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;
    let mut presence = session.subscribe_presence();

    live.deliver(InboundFrame::Presence {
        sender_type: SenderType::Artist,
        online: true,
    });
    presence
        .wait_for(|state| state.is_online(SenderType::Artist))
        .await
        .unwrap();

    live.deliver(InboundFrame::Presence {
        sender_type: SenderType::Artist,
        online: false,
    });
    presence
        .wait_for(|state| !state.is_online(SenderType::Artist))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn read_receipts_flow_both_ways() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;

    live.deliver(InboundFrame::Message {
        message: confirmed("m1", ROOM, &artist(), "Your slot is Friday"),
        client_token: None,
    });
    live.deliver(InboundFrame::Message {
        message: confirmed("m2", ROOM, &client(), "Great"),
        client_token: None,
    });
    wait_for_messages(&session, |list| list.len() == 2).await;

    session.mark_read("m1").unwrap();
    live.deliver(InboundFrame::Read {
        message_id: "m2".to_string(),
    });
    wait_for_messages(&session, |list| list.iter().all(|m| m.is_read)).await;

    assert!(live
        .sent()
        .contains(&OutboundFrame::Read {
            message_id: "m1".to_string()
        }));
}

#[tokio::test(start_paused = true)]
async fn server_errors_are_published_as_events() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;
    let mut events = session.subscribe_events();

    live.deliver(InboundFrame::Error {
        message: "room archived".to_string(),
    });

    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::RemoteError {
            message: "room archived".to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn force_reconnect_returns_from_polling() {
    let connector = ScriptedConnector::new(ROOM, client()).with_default_live(LiveBehavior::Refuse);
    let settings = SyncSettings {
        max_reconnect_attempts: 2,
        ..SyncSettings::default()
    };
    let session = ChatSession::start(ROOM, client(), settings, connector.shared());
    wait_for_status(&session, ConnectionStatus::Polling).await;
    assert_eq!(connector.live_attempts(), 2);

    connector.set_default_live(LiveBehavior::Open);
    session.force_reconnect().unwrap();
    wait_for_status(&session, ConnectionStatus::Connected).await;

    assert_eq!(session.connection_state().reconnect_attempts, 0);
    assert!(connector.last_poll().unwrap().is_closed());
}

#[tokio::test(start_paused = true)]
async fn dispose_is_idempotent_and_final() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;

    session.dispose().await;
    session.dispose().await;

    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert!(live.is_closed());
    assert!(matches!(session.send("late").await, Err(SyncError::Disposed)));
    assert!(matches!(session.notify_typing(), Err(SyncError::Disposed)));
    assert!(matches!(session.force_reconnect(), Err(SyncError::Disposed)));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_tears_down_the_transport() {
    let connector = ScriptedConnector::new(ROOM, client());
    let (session, live) = connected_session(&connector).await;

    drop(session);
    sleep(Duration::from_millis(10)).await;

    assert!(live.is_closed());
}

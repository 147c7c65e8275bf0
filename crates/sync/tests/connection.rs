//! Connection manager state machine: backoff, fallback and teardown.

use std::time::Duration;

use tokio::time::{timeout, Instant};

use studio_chat_sync::test_support::{confirmed, LiveBehavior, ScriptedConnector};
use studio_chat_sync::types::{InboundFrame, OutboundFrame};
use studio_chat_sync::{
    ConnectionManager, ConnectionStatus, Delivery, Identity, SyncError, SyncSettings,
    TransportKind,
};

fn connector(default_live: LiveBehavior) -> ScriptedConnector {
    ScriptedConnector::new("r1", Identity::client("c1")).with_default_live(default_live)
}

async fn drive_until(manager: &mut ConnectionManager, status: ConnectionStatus) {
    while manager.status() != status {
        manager.step().await;
    }
}

#[tokio::test(start_paused = true)]
async fn opens_live_channel_and_reports_connected() {
    let connector = connector(LiveBehavior::Open);
    let mut manager = ConnectionManager::new("r1", connector.shared(), &SyncSettings::default());

    assert_eq!(manager.status(), ConnectionStatus::Connecting);
    manager.start().unwrap();
    assert!(manager.step().await.is_none());

    assert_eq!(manager.status(), ConnectionStatus::Connected);
    assert!(manager.is_live());
    assert_eq!(connector.live_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn five_failures_fall_back_to_polling_without_further_live_attempts() {
    let connector = connector(LiveBehavior::Refuse);
    let mut manager = ConnectionManager::new("r1", connector.shared(), &SyncSettings::default());
    let started = Instant::now();

    manager.start().unwrap();
    drive_until(&mut manager, ConnectionStatus::Polling).await;

    assert_eq!(connector.live_attempts(), 5);
    assert_eq!(manager.state().reconnect_attempts, 5);
    assert_eq!(started.elapsed(), Duration::from_secs(12));
    assert_eq!(manager.active_kind(), Some(TransportKind::Poll));
    assert!(connector.last_live().unwrap().is_closed());

    let idle = timeout(Duration::from_secs(120), async {
        loop {
            manager.step().await;
        }
    })
    .await;
    assert!(idle.is_err());
    assert_eq!(connector.live_attempts(), 5);
    assert_eq!(manager.status(), ConnectionStatus::Polling);
}

#[tokio::test(start_paused = true)]
async fn force_reconnect_leaves_polling_with_fresh_attempts() {
    let connector = connector(LiveBehavior::Refuse);
    let mut manager = ConnectionManager::new("r1", connector.shared(), &SyncSettings::default());
    manager.start().unwrap();
    drive_until(&mut manager, ConnectionStatus::Polling).await;

    connector.set_default_live(LiveBehavior::Open);
    manager.force_reconnect().unwrap();

    assert_eq!(manager.status(), ConnectionStatus::Connecting);
    assert_eq!(manager.state().reconnect_attempts, 0);
    assert!(connector.last_poll().unwrap().is_closed());

    drive_until(&mut manager, ConnectionStatus::Connected).await;
    assert_eq!(connector.live_attempts(), 6);
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_attempt_count() {
    let connector = ScriptedConnector::new("r1", Identity::client("c1"))
        .with_live_plan([LiveBehavior::Refuse, LiveBehavior::Refuse, LiveBehavior::Open]);
    let mut manager = ConnectionManager::new("r1", connector.shared(), &SyncSettings::default());

    manager.start().unwrap();
    manager.step().await;
    assert_eq!(manager.status(), ConnectionStatus::Reconnecting);
    assert_eq!(manager.state().reconnect_attempts, 1);

    drive_until(&mut manager, ConnectionStatus::Connected).await;
    assert_eq!(manager.state().reconnect_attempts, 0);
    assert_eq!(connector.live_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_is_retried_after_fixed_delay() {
    let connector = connector(LiveBehavior::Open);
    let settings = SyncSettings {
        reconnect_delay: Duration::from_millis(750),
        ..SyncSettings::default()
    };
    let mut manager = ConnectionManager::new("r1", connector.shared(), &settings);
    manager.start().unwrap();
    drive_until(&mut manager, ConnectionStatus::Connected).await;

    connector.last_live().unwrap().drop_connection("reset by peer");
    manager.step().await;
    assert_eq!(manager.status(), ConnectionStatus::Reconnecting);
    assert!(manager.active_kind().is_none());

    let dropped_at = Instant::now();
    drive_until(&mut manager, ConnectionStatus::Connected).await;
    assert_eq!(dropped_at.elapsed(), Duration::from_millis(750));
    assert_eq!(connector.live_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn events_from_replaced_transport_are_ignored() {
    let me = Identity::client("c1");
    let connector = connector(LiveBehavior::Open);
    let mut manager = ConnectionManager::new("r1", connector.shared(), &SyncSettings::default());
    manager.start().unwrap();
    drive_until(&mut manager, ConnectionStatus::Connected).await;

    let first = connector.last_live().unwrap();
    manager.force_reconnect().unwrap();
    let second = connector.last_live().unwrap();
    assert_ne!(first.generation(), second.generation());

    assert!(manager.step().await.is_none());
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    first.drop_connection("late close");
    first.deliver(InboundFrame::Message {
        message: confirmed("stale", "r1", &me, "old"),
        client_token: None,
    });
    assert!(manager.step().await.is_none());
    assert!(manager.step().await.is_none());
    assert_eq!(manager.status(), ConnectionStatus::Connected);
    assert_eq!(manager.state().reconnect_attempts, 0);

    second.deliver(InboundFrame::Typing {
        sender_type: studio_chat_sync::SenderType::Artist,
    });
    assert!(matches!(
        manager.step().await,
        Some(Delivery::Frame(InboundFrame::Typing { .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn send_without_open_transport_fails() {
    let connector = connector(LiveBehavior::Hang);
    let mut manager = ConnectionManager::new("r1", connector.shared(), &SyncSettings::default());

    assert!(matches!(
        manager.send(OutboundFrame::Typing),
        Err(SyncError::NotConnected)
    ));

    manager.start().unwrap();
    assert_eq!(manager.status(), ConnectionStatus::Connecting);
    assert!(matches!(
        manager.send(OutboundFrame::Typing),
        Err(SyncError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn polling_forwards_snapshots() {
    let me = Identity::client("c1");
    let connector = connector(LiveBehavior::Refuse);
    let settings = SyncSettings {
        max_reconnect_attempts: 1,
        ..SyncSettings::default()
    };
    let mut manager = ConnectionManager::new("r1", connector.shared(), &settings);
    manager.start().unwrap();
    drive_until(&mut manager, ConnectionStatus::Polling).await;
    assert_eq!(connector.live_attempts(), 1);

    let poll = connector.last_poll().unwrap();
    poll.snapshot(vec![confirmed("m1", "r1", &me, "Hi")]);

    let delivery = manager.next_delivery().await;
    assert!(matches!(delivery, Delivery::Snapshot(messages) if messages.len() == 1));
}

#[tokio::test(start_paused = true)]
async fn dispose_tears_down_and_is_idempotent() {
    let connector = connector(LiveBehavior::Open);
    let mut manager = ConnectionManager::new("r1", connector.shared(), &SyncSettings::default());
    let status = manager.subscribe();
    manager.start().unwrap();
    drive_until(&mut manager, ConnectionStatus::Connected).await;

    manager.dispose();
    manager.dispose();

    assert!(manager.is_disposed());
    assert_eq!(status.borrow().status, ConnectionStatus::Disconnected);
    assert!(connector.last_live().unwrap().is_closed());
    assert!(matches!(
        manager.send(OutboundFrame::Typing),
        Err(SyncError::Disposed)
    ));
    assert!(matches!(manager.start(), Err(SyncError::Disposed)));
    assert!(matches!(manager.force_reconnect(), Err(SyncError::Disposed)));
}

#[tokio::test(start_paused = true)]
async fn dispose_cancels_pending_retry() {
    let connector = connector(LiveBehavior::Refuse);
    let mut manager = ConnectionManager::new("r1", connector.shared(), &SyncSettings::default());
    manager.start().unwrap();
    manager.step().await;
    assert_eq!(manager.status(), ConnectionStatus::Reconnecting);

    manager.dispose();

    let idle = timeout(Duration::from_secs(30), manager.step()).await;
    assert!(idle.is_err());
    assert_eq!(connector.live_attempts(), 1);
}

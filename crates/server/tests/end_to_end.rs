//! The murmur client library talking to a real server over TCP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use murmur_client::{
    ClientConfig, ConnectionManager, ConnectionState, DeliveryState, SessionEvent,
    WebSocketConnector,
};
use tokio::sync::broadcast;
use url::Url;

async fn manager(server: &TestServer, token: &str) -> ConnectionManager {
    let url = Url::parse(&format!("ws://{}/ws/messaging", server.addr)).unwrap();
    let mut config = ClientConfig::new(url, token);
    config.sound_enabled = false;
    let connector = Arc::new(WebSocketConnector {
        connect_timeout: Some(Duration::from_secs(5)),
    });
    let manager = ConnectionManager::new(config, connector);
    manager.connect();

    let mut state = manager.watch_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Ready))
        .await
        .expect("client never became ready")
        .unwrap();
    manager
}

/// Poll until `check` holds.
async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

async fn notification(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event @ SessionEvent::Notification(_)) => return event,
                Ok(_) => {}
                Err(e) => panic!("event bus: {e}"),
            }
        }
    })
    .await
    .expect("no notification")
}

#[tokio::test]
async fn test_two_clients_exchange_a_message() {
    let server = spawn_server(Duration::from_secs(5)).await;
    let alice = manager(&server, "t-alice").await;
    let bob = manager(&server, "t-bob").await;
    assert_eq!(alice.local_user(), "alice");

    let mut bob_events = bob.subscribe_events();
    assert!(alice.commands().join_conversation("c1"));
    assert!(bob.commands().join_conversation("c1"));
    eventually(|| alice.conversation("c1").is_some() && bob.conversation("c1").is_some()).await;

    let pending_id = alice
        .commands()
        .send_chat_message("c1", "salam")
        .expect("alice is ready");

    eventually(|| {
        alice.conversation("c1").is_some_and(|c| {
            c.messages.len() == 1 && c.messages[0].delivery_state == DeliveryState::Delivered
        })
    })
    .await;
    let sent = &alice.conversation("c1").unwrap().messages[0];
    assert_eq!(sent.pending_id.as_deref(), Some(pending_id.as_str()));
    assert_eq!(sent.seq, Some(1));
    let message_id = sent.id.clone().expect("confirmed id");

    match notification(&mut bob_events).await {
        SessionEvent::Notification(n) => {
            assert_eq!(n.message_id, message_id);
            assert_eq!(n.sender_id, "alice");
            assert_eq!(n.preview, "salam");
        }
        _ => unreachable!(),
    }
    assert_eq!(bob.unread_count("c1"), 1);

    assert!(bob.commands().mark_message_read("c1", vec![message_id]));
    eventually(|| {
        alice
            .conversation("c1")
            .is_some_and(|c| c.messages[0].delivery_state == DeliveryState::Read)
    })
    .await;
    eventually(|| bob.unread_count("c1") == 0).await;

    alice.dispose().await;
    bob.dispose().await;
}

#[tokio::test]
async fn test_presence_reaches_peer() {
    let server = spawn_server(Duration::from_secs(5)).await;
    let alice = manager(&server, "t-alice").await;
    let bob = manager(&server, "t-bob").await;

    eventually(|| alice.presence("bob") == murmur_shared::PresenceStatus::Online).await;
    assert!(bob.commands().set_presence(murmur_shared::PresenceStatus::Away));
    eventually(|| alice.presence("bob") == murmur_shared::PresenceStatus::Away).await;

    bob.disconnect();
    eventually(|| alice.presence("bob") == murmur_shared::PresenceStatus::Offline).await;
    alice.dispose().await;
}

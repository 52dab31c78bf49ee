//! Typing indicator timing, local and remote.

mod common;

use std::time::Duration;

use common::{backend_and_client, me, other, room, settle, wait_for_state};
use marquee_core::ChannelState;
use marquee_harness::SimBackend;
use marquee_proto::NewMessage;

const STARTED: &str = r#"{"type":"typing","is_typing":true}"#;
const STOPPED: &str = r#"{"type":"typing","is_typing":false}"#;

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn burst_sends_one_start_and_one_stop() {
    let (backend, client) = backend_and_client();
    let handle = client.subscribe_room(room()).await.unwrap();
    wait_for_state(&handle, ChannelState::Open).await;
    let topic = SimBackend::room_topic(&room());

    // Keystrokes at 0s, 1s, 2s and 3.5s
    handle.send_typing().unwrap();
    sleep_ms(1000).await;
    handle.send_typing().unwrap();
    sleep_ms(1000).await;
    handle.send_typing().unwrap();
    sleep_ms(1500).await;
    handle.send_typing().unwrap();

    sleep_ms(4900).await;
    assert_eq!(backend.take_client_frames(&topic), vec![STARTED.to_string()]);

    sleep_ms(200).await;
    assert_eq!(backend.take_client_frames(&topic), vec![STOPPED.to_string()]);

    sleep_ms(30_000).await;
    assert!(backend.take_client_frames(&topic).is_empty());
}

#[tokio::test(start_paused = true)]
async fn sending_a_message_ends_the_burst() {
    let (backend, client) = backend_and_client();
    let handle = client.subscribe_room(room()).await.unwrap();
    wait_for_state(&handle, ChannelState::Open).await;
    let topic = SimBackend::room_topic(&room());

    handle.send_typing().unwrap();
    settle().await;
    handle.send_message(NewMessage::text("on my way")).await.unwrap();
    settle().await;

    assert_eq!(backend.take_client_frames(&topic), vec![STARTED.to_string(), STOPPED.to_string()]);

    sleep_ms(10_000).await;
    assert!(backend.take_client_frames(&topic).is_empty());
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_without_burst_sends_nothing() {
    let (backend, client) = backend_and_client();
    let handle = client.subscribe_room(room()).await.unwrap();
    wait_for_state(&handle, ChannelState::Open).await;

    handle.stop_typing().unwrap();
    settle().await;
    assert!(backend.take_client_frames(&SimBackend::room_topic(&room())).is_empty());
}

#[tokio::test(start_paused = true)]
async fn remote_typing_flag_expires() {
    let (backend, client) = backend_and_client();
    let handle = client.subscribe_room(room()).await.unwrap();
    wait_for_state(&handle, ChannelState::Open).await;
    let mut changes = handle.typing_changes();

    backend.push_typing(&room(), &other(), true);
    settle().await;
    let started = changes.try_recv().unwrap();
    assert_eq!(started.participant, other());
    assert!(started.is_typing);
    assert!(handle.presence_of(&other()).unwrap().typing);

    sleep_ms(5900).await;
    assert!(handle.presence_of(&other()).unwrap().typing);

    sleep_ms(200).await;
    assert!(!handle.presence_of(&other()).unwrap().typing);
    let expired = changes.try_recv().unwrap();
    assert_eq!(expired.participant, other());
    assert!(!expired.is_typing);
}

#[tokio::test(start_paused = true)]
async fn remote_stop_clears_at_once_and_own_echo_is_ignored() {
    let (backend, client) = backend_and_client();
    let handle = client.subscribe_room(room()).await.unwrap();
    wait_for_state(&handle, ChannelState::Open).await;
    let mut changes = handle.typing_changes();

    backend.push_typing(&room(), &me(), true);
    backend.push_typing(&room(), &other(), true);
    backend.push_typing(&room(), &other(), false);
    settle().await;

    assert!(changes.try_recv().unwrap().is_typing);
    assert!(!changes.try_recv().unwrap().is_typing);
    assert!(changes.try_recv().is_err());
    assert!(handle.presence_of(&me()).is_none());
    assert!(!handle.presence_of(&other()).unwrap().typing);

    // No expiry fires for a flag that was already cleared
    sleep_ms(10_000).await;
    assert!(changes.try_recv().is_err());
}

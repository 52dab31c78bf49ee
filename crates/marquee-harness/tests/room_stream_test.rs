//! Room timeline scenarios: paging, live pushes, resync and teardown.
//!
//! Every scenario that mutates a timeline ends each step with the standard
//! invariant checks (unique ids, ascending order, sticky read flags).

mod common;

use std::time::Duration;

use common::{backend_and_client, check, me, other, room, settle, wait_for_state};
use marquee_client::{ClientError, LoadOutcome, RoomHandle};
use marquee_core::ChannelState;
use marquee_harness::{
    InvariantRegistry, MessagesRetained, NOTIFICATIONS_TOPIC, SimBackend, TimelineRecorder,
};
use marquee_proto::NewMessage;

fn ids(handle: &RoomHandle) -> Vec<String> {
    handle.timeline().iter().map(|m| m.id.to_string()).collect()
}

fn id_range(first: u32, last: u32) -> Vec<String> {
    (first..=last).map(|n| format!("m{n:04}")).collect()
}

#[tokio::test(start_paused = true)]
async fn paging_with_a_push_in_between() {
    let registry = InvariantRegistry::standard();
    let mut recorder = TimelineRecorder::new();
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 45);

    let handle = client.subscribe_room(room()).await.unwrap();
    assert_eq!(ids(&handle), id_range(31, 45));
    assert!(handle.has_older());
    check(&registry, &mut recorder, &handle, "initial");

    assert_eq!(handle.load_older().await.unwrap(), LoadOutcome::Loaded { added: 15 });
    assert_eq!(ids(&handle), id_range(16, 45));
    check(&registry, &mut recorder, &handle, "page 2");

    wait_for_state(&handle, ChannelState::Open).await;
    backend.push_message(&room(), &other(), "live");
    settle().await;
    assert_eq!(ids(&handle), id_range(16, 46));
    check(&registry, &mut recorder, &handle, "push");

    // The push shifted the server's pages by one, so page 3 repeats m0016
    assert_eq!(handle.load_older().await.unwrap(), LoadOutcome::Loaded { added: 14 });
    check(&registry, &mut recorder, &handle, "page 3");

    assert_eq!(handle.load_older().await.unwrap(), LoadOutcome::Loaded { added: 1 });
    assert!(!handle.has_older());
    assert_eq!(handle.load_older().await.unwrap(), LoadOutcome::Skipped);

    assert_eq!(ids(&handle), id_range(1, 46));
    check(&registry, &mut recorder, &handle, "page 4");
}

#[tokio::test(start_paused = true)]
async fn concurrent_older_loads_fetch_once() {
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 40);
    let handle = client.subscribe_room(room()).await.unwrap();
    backend.set_page_delay(Duration::from_millis(100));

    let (first, second) = tokio::join!(handle.load_older(), handle.load_older());

    assert_eq!(first.unwrap(), LoadOutcome::Loaded { added: 15 });
    assert_eq!(second.unwrap(), LoadOutcome::Skipped);
    assert_eq!(backend.calls().iter().filter(|c| c.path.ends_with("?page=2")).count(), 1);
    assert_eq!(handle.timeline().len(), 30);
}

#[tokio::test(start_paused = true)]
async fn sent_message_is_not_duplicated_by_its_echo() {
    let registry = InvariantRegistry::standard();
    let mut recorder = TimelineRecorder::new();
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 3);
    let handle = client.subscribe_room(room()).await.unwrap();
    wait_for_state(&handle, ChannelState::Open).await;
    let mut inserted = handle.messages();

    let stored = handle.send_message(NewMessage::text("see you at the door")).await.unwrap();
    settle().await;

    assert_eq!(stored.sender.user_id, me());
    assert_eq!(handle.timeline().iter().filter(|m| m.id == stored.id).count(), 1);
    assert_eq!(handle.timeline().last().map(|m| m.id.clone()), Some(stored.id.clone()));
    assert_eq!(inserted.try_recv().unwrap().id, stored.id);
    assert!(inserted.try_recv().is_err());
    check(&registry, &mut recorder, &handle, "after send");
}

#[tokio::test(start_paused = true)]
async fn mark_all_read_flips_incoming_only() {
    let registry = InvariantRegistry::standard();
    let mut recorder = TimelineRecorder::new();
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 4);
    let handle = client.subscribe_room(room()).await.unwrap();
    handle.send_message(NewMessage::text("mine")).await.unwrap();
    check(&registry, &mut recorder, &handle, "before read");

    assert_eq!(handle.mark_all_read(), 4);
    assert_eq!(handle.mark_all_read(), 0);
    settle().await;

    assert!(handle.timeline().iter().filter(|m| m.sender.user_id == other()).all(|m| m.is_read));
    assert_eq!(backend.calls_to(&format!("/chat/rooms/{}/mark_read/", room())), 1);
    check(&registry, &mut recorder, &handle, "after read");

    let first = handle.timeline()[0].id.clone();
    assert!(!handle.mark_read(&first));
}

#[tokio::test(start_paused = true)]
async fn page_landing_after_unsubscribe_is_discarded() {
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 30);
    let handle = client.subscribe_room(room()).await.unwrap();
    backend.set_page_delay(Duration::from_millis(100));

    let unsubscribe = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.unsubscribe_room(&room())
    };
    let (outcome, removed) = tokio::join!(handle.load_older(), unsubscribe);

    assert!(removed);
    assert_eq!(outcome.unwrap(), LoadOutcome::Discarded);
    assert!(handle.is_closed());
    assert!(handle.timeline().is_empty());
    assert_eq!(handle.load_older().await.unwrap(), LoadOutcome::Discarded);
}

#[tokio::test(start_paused = true)]
async fn page_landing_after_reload_is_discarded() {
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 30);
    let handle = client.subscribe_room(room()).await.unwrap();
    backend.set_page_delay(Duration::from_millis(100));

    let reload = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.set_page_delay(Duration::from_millis(10));
        handle.load_initial().await
    };
    let (older, reloaded) = tokio::join!(handle.load_older(), reload);

    assert_eq!(reloaded.unwrap(), LoadOutcome::Loaded { added: 15 });
    assert_eq!(older.unwrap(), LoadOutcome::Discarded);
    assert_eq!(ids(&handle), id_range(16, 30));
    assert!(handle.has_older());
}

#[tokio::test(start_paused = true)]
async fn abandoned_older_load_can_be_retried() {
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 30);
    let handle = client.subscribe_room(room()).await.unwrap();
    backend.set_page_delay(Duration::from_millis(100));

    let abandoned = tokio::time::timeout(Duration::from_millis(50), handle.load_older()).await;
    assert!(abandoned.is_err());
    assert_eq!(handle.timeline().len(), 15);

    backend.set_page_delay(Duration::ZERO);
    assert_eq!(handle.load_older().await.unwrap(), LoadOutcome::Loaded { added: 15 });
}

#[tokio::test(start_paused = true)]
async fn reconnect_fills_the_gap() {
    let registry = InvariantRegistry::standard();
    let mut recorder = TimelineRecorder::new();
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 20);
    let handle = client.subscribe_room(room()).await.unwrap();
    wait_for_state(&handle, ChannelState::Open).await;
    let before = ids(&handle);
    check(&registry, &mut recorder, &handle, "before outage");

    let topic = SimBackend::room_topic(&room());
    assert_eq!(backend.drop_connections(&topic), 1);
    settle().await;
    assert_eq!(handle.connection_state(), ChannelState::ReconnectWait);

    let missed = backend.create_message(&room(), &other(), "sent while offline");
    tokio::time::sleep(Duration::from_millis(3100)).await;

    assert_eq!(handle.connection_state(), ChannelState::Open);
    assert_eq!(backend.dial_count(&topic), 2);

    let mut expected = before;
    expected.push(missed.id.to_string());
    assert_eq!(ids(&handle), expected);
    check(&registry, &mut recorder, &handle, "after resync");
}

fn growing_registry() -> InvariantRegistry {
    let mut registry = InvariantRegistry::standard();
    registry.add(MessagesRetained);
    registry
}

#[tokio::test(start_paused = true)]
async fn push_during_initial_load_survives_the_page() {
    let registry = growing_registry();
    let mut recorder = TimelineRecorder::new();
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 5);
    backend.set_page_delay(Duration::from_millis(100));

    let push = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.push_message(&room(), &other(), "doors open")
    };
    let (handle, pushed) = tokio::join!(client.subscribe_room(room()), push);
    let handle = handle.unwrap();

    assert_eq!(pushed.id.to_string(), "m0006");
    assert_eq!(ids(&handle), id_range(1, 6));
    check(&registry, &mut recorder, &handle, "after subscribe");

    // Same race on a reload of a live room
    let push = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.push_message(&room(), &other(), "last call")
    };
    let (reloaded, pushed) = tokio::join!(handle.load_initial(), push);

    assert_eq!(reloaded.unwrap(), LoadOutcome::Loaded { added: 7 });
    assert_eq!(pushed.id.to_string(), "m0007");
    assert_eq!(ids(&handle), id_range(1, 7));
    check(&registry, &mut recorder, &handle, "after reload");
}

#[tokio::test(start_paused = true)]
async fn long_outage_after_paging_back_is_recovered() {
    let registry = growing_registry();
    let mut recorder = TimelineRecorder::new();
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 60);
    let handle = client.subscribe_room(room()).await.unwrap();
    wait_for_state(&handle, ChannelState::Open).await;

    handle.load_older().await.unwrap();
    handle.load_older().await.unwrap();
    assert_eq!(ids(&handle), id_range(16, 60));
    check(&registry, &mut recorder, &handle, "paged back");

    let topic = SimBackend::room_topic(&room());
    backend.drop_connections(&topic);
    settle().await;
    for n in 0..30 {
        backend.create_message(&room(), &other(), &format!("offline {n}"));
    }
    tokio::time::sleep(Duration::from_millis(3100)).await;

    assert_eq!(handle.connection_state(), ChannelState::Open);
    assert_eq!(ids(&handle), id_range(16, 90));
    check(&registry, &mut recorder, &handle, "after resync");

    while handle.has_older() {
        handle.load_older().await.unwrap();
        check(&registry, &mut recorder, &handle, "paging after resync");
    }
    assert_eq!(ids(&handle), id_range(1, 90));
    assert_eq!(backend.history(&room()).len(), 90);
}

#[tokio::test(start_paused = true)]
async fn unknown_and_malformed_frames_are_skipped() {
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 5);
    let handle = client.subscribe_room(room()).await.unwrap();
    wait_for_state(&handle, ChannelState::Open).await;
    let before = ids(&handle);

    let topic = SimBackend::room_topic(&room());
    assert_eq!(backend.push_frame(&topic, r#"{"type":"seat_map_update","seats":[12,13]}"#), 1);
    assert_eq!(backend.push_frame(&topic, "not json"), 1);
    settle().await;

    assert_eq!(handle.connection_state(), ChannelState::Open);
    assert_eq!(ids(&handle), before);
    assert_eq!(backend.dial_count(&topic), 1);

    backend.push_message(&room(), &other(), "still flowing");
    settle().await;
    assert_eq!(handle.timeline().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn subscribing_requires_a_session() {
    let (backend, client) = backend_and_client();
    client.logout();

    let err = client.subscribe_room(room()).await.unwrap_err();
    assert_eq!(err, ClientError::SessionInactive);
    assert!(matches!(client.subscribe_notifications(), Err(ClientError::SessionInactive)));
    assert_eq!(backend.dial_count(&SimBackend::room_topic(&room())), 0);
    assert!(backend.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn subscribe_is_idempotent() {
    let (backend, client) = backend_and_client();
    let first = client.subscribe_room(room()).await.unwrap();
    let second = client.subscribe_room(room()).await.unwrap();
    settle().await;

    assert_eq!(first.room_id(), second.room_id());
    assert_eq!(client.channels().rooms(), vec![room()]);
    assert_eq!(backend.dial_count(&SimBackend::room_topic(&room())), 1);
}

#[tokio::test(start_paused = true)]
async fn logout_closes_every_channel() {
    let (backend, client) = backend_and_client();
    backend.seed_history(&room(), &other(), 5);
    let handle = client.subscribe_room(room()).await.unwrap();
    let notifications = client.subscribe_notifications().unwrap();
    wait_for_state(&handle, ChannelState::Open).await;
    let mut feed_state = notifications.state_changes();
    feed_state.wait_for(|s| *s == ChannelState::Open).await.unwrap();

    assert!(client.logout());
    settle().await;

    let topic = SimBackend::room_topic(&room());
    assert!(handle.is_closed());
    assert!(handle.timeline().is_empty());
    assert_eq!(handle.connection_state(), ChannelState::Closed);
    assert_eq!(notifications.connection_state(), ChannelState::Closed);
    assert_eq!(backend.open_connections(&topic), 0);
    assert_eq!(backend.open_connections(NOTIFICATIONS_TOPIC), 0);
    assert!(client.channels().rooms().is_empty());

    assert!(matches!(
        handle.send_message(NewMessage::text("too late")).await,
        Err(ClientError::Unsubscribed(_))
    ));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.dial_count(&topic), 1);
}

#[tokio::test(start_paused = true)]
async fn presence_is_seeded_and_ignores_own_echoes() {
    let (backend, client) = backend_and_client();
    backend.set_counterpart(&room(), &other(), true);
    let handle = client.subscribe_room(room()).await.unwrap();

    let seeded = handle.presence_of(&other()).unwrap();
    assert!(seeded.online);
    assert_eq!(seeded.status_text.as_deref(), Some("online"));

    wait_for_state(&handle, ChannelState::Open).await;
    let mut changes = handle.presence_changes();
    backend.push_status(&room(), &other(), false);
    backend.push_status(&room(), &me(), true);
    settle().await;

    let change = changes.try_recv().unwrap();
    assert_eq!(change.participant, other());
    assert!(!change.record.online);
    assert!(changes.try_recv().is_err());
    assert!(!handle.presence_of(&other()).unwrap().online);
    assert!(handle.presence_of(&me()).is_none());
}

#[tokio::test(start_paused = true)]
async fn zero_event_buffer_is_usable() {
    let backend = SimBackend::new(me());
    let mut config = SimBackend::config().unwrap();
    config.event_buffer = 0;
    let client = backend.client(config);

    let handle = client.subscribe_room(room()).await.unwrap();
    wait_for_state(&handle, ChannelState::Open).await;
    let mut inserted = handle.messages();

    let pushed = backend.push_message(&room(), &other(), "still flowing");
    settle().await;
    assert_eq!(inserted.try_recv().unwrap().id, pushed.id);
    assert!(client.subscribe_notifications().is_ok());
}

//! Shared scenario helpers.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use marquee_client::{MarqueeClient, RoomHandle};
use marquee_core::ChannelState;
use marquee_harness::{InvariantRegistry, SimBackend, TimelineRecorder};
use marquee_proto::{ParticipantId, RoomId};

pub fn me() -> ParticipantId {
    ParticipantId::new("7")
}

pub fn other() -> ParticipantId {
    ParticipantId::new("42")
}

pub fn room() -> RoomId {
    RoomId::new("3f0c9a1e-5b7d-4c2a-9e11-0d6f8a2b4c10")
}

pub fn backend_and_client() -> (Arc<SimBackend>, MarqueeClient) {
    let backend = SimBackend::new(me());
    let client = backend.client(SimBackend::config().unwrap());
    (backend, client)
}

/// Let spawned tasks run to quiescence without moving the clock noticeably.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Wait until the connection reaches `target`. Fails after 60 virtual
/// seconds.
pub async fn wait_for_state(handle: &RoomHandle, target: ChannelState) {
    let mut changes = handle.state_changes();
    tokio::time::timeout(Duration::from_secs(60), changes.wait_for(|state| *state == target))
        .await
        .unwrap()
        .unwrap();
}

/// Check the standard invariants on `handle` after a step.
pub fn check(
    registry: &InvariantRegistry,
    recorder: &mut TimelineRecorder,
    handle: &RoomHandle,
    step: &str,
) {
    let snapshot = recorder.observe([handle]);
    registry.assert_all(&snapshot, step);
}

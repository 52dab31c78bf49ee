//! Observable timeline snapshots for invariant checking.
//!
//! Invariants run on snapshots rather than live handles so a check sees one
//! consistent state. Properties that span two steps (read flags) compare the
//! current snapshot with the one before it, which [`TimelineRecorder`]
//! keeps.

use std::collections::HashMap;

use marquee_client::RoomHandle;
use marquee_proto::{Message, RoomId};

/// Snapshot of every observed room.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-room snapshots.
    pub rooms: Vec<TimelineSnapshot>,
}

impl SystemSnapshot {
    /// Snapshot with no rooms.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot of a single room.
    pub fn single(room: TimelineSnapshot) -> Self {
        Self { rooms: vec![room] }
    }
}

/// One room's timeline at a point in time.
#[derive(Debug, Clone)]
pub struct TimelineSnapshot {
    /// Room id.
    pub room: RoomId,
    /// Timeline, oldest first.
    pub messages: Vec<Message>,
    /// Timeline at the previous observation. Empty on the first.
    pub previous: Vec<Message>,
}

impl TimelineSnapshot {
    /// Snapshot without history.
    pub fn new(room: RoomId, messages: Vec<Message>) -> Self {
        Self { room, messages, previous: Vec::new() }
    }
}

/// Remembers the last timeline of each room between observations.
#[derive(Debug, Default)]
pub struct TimelineRecorder {
    last: HashMap<RoomId, Vec<Message>>,
}

impl TimelineRecorder {
    /// Recorder with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the given rooms.
    pub fn observe<'a>(
        &mut self,
        rooms: impl IntoIterator<Item = &'a RoomHandle>,
    ) -> SystemSnapshot {
        let rooms = rooms
            .into_iter()
            .map(|handle| self.record(handle.room_id().clone(), handle.timeline()))
            .collect();
        SystemSnapshot { rooms }
    }

    /// Snapshot a timeline that did not come from a handle.
    pub fn record(&mut self, room: RoomId, messages: Vec<Message>) -> TimelineSnapshot {
        let previous = self.last.insert(room.clone(), messages.clone()).unwrap_or_default();
        TimelineSnapshot { room, messages, previous }
    }
}

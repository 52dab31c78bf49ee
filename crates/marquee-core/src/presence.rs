//! Presence and typing signals.
//!
//! Everything here is ephemeral: nothing is persisted, nothing is retried.
//! A lost stop-typing frame heals itself because remote typing flags expire.

use std::{
    collections::HashMap,
    ops::Add,
    time::Duration,
};

use marquee_proto::{OutboundFrame, ParticipantId, RoomSummary, StatusUpdate, TypingSignal};

/// Quiet period after the last keystroke before "stopped typing" is sent.
pub const DEFAULT_TYPING_STOP: Duration = Duration::from_secs(5);

/// How long a remote typing flag survives without a refresh.
pub const DEFAULT_REMOTE_TYPING_EXPIRY: Duration = Duration::from_secs(6);

/// Typing configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingConfig {
    /// Delay from the last local keystroke to the stop frame
    pub stop_after: Duration,
    /// Lifetime of a remote typing flag
    pub remote_expiry: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self { stop_after: DEFAULT_TYPING_STOP, remote_expiry: DEFAULT_REMOTE_TYPING_EXPIRY }
    }
}

/// What the client knows about one participant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceRecord {
    /// Connected flag
    pub online: bool,
    /// Human-readable status
    pub status_text: Option<String>,
    /// Last-seen timestamp as sent by the backend
    pub last_seen: Option<String>,
    /// Typing flag
    pub typing: bool,
}

/// Presence records keyed by participant.
#[derive(Debug, Clone)]
pub struct PresenceBook<I> {
    records: HashMap<ParticipantId, PresenceRecord>,
    typing_until: HashMap<ParticipantId, I>,
    remote_expiry: Duration,
}

impl<I> PresenceBook<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Empty book.
    pub fn new(remote_expiry: Duration) -> Self {
        Self { records: HashMap::new(), typing_until: HashMap::new(), remote_expiry }
    }

    /// Record for `participant`, if anything is known.
    pub fn get(&self, participant: &ParticipantId) -> Option<&PresenceRecord> {
        self.records.get(participant)
    }

    /// Number of participants with a record.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the book is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Apply a status update. Going offline also clears typing.
    pub fn apply_status(&mut self, update: &StatusUpdate) -> PresenceRecord {
        let record = self.records.entry(update.user_id.clone()).or_default();
        record.online = update.is_online;
        if update.status_text.is_some() {
            record.status_text.clone_from(&update.status_text);
        }
        if update.last_seen.is_some() {
            record.last_seen.clone_from(&update.last_seen);
        }
        if !update.is_online {
            record.typing = false;
            self.typing_until.remove(&update.user_id);
        }
        record.clone()
    }

    /// Apply a typing signal. Returns `true` if the visible flag changed.
    pub fn apply_typing(&mut self, signal: &TypingSignal, now: I) -> bool {
        let record = self.records.entry(signal.user_id.clone()).or_default();
        let changed = record.typing != signal.is_typing;
        record.typing = signal.is_typing;

        if signal.is_typing {
            self.typing_until.insert(signal.user_id.clone(), now + self.remote_expiry);
        } else {
            self.typing_until.remove(&signal.user_id);
        }
        changed
    }

    /// Clear typing flags whose expiry has passed. Returns the participants
    /// that stopped typing.
    pub fn expire(&mut self, now: I) -> Vec<ParticipantId> {
        let expired: Vec<ParticipantId> = self
            .typing_until
            .iter()
            .filter(|(_, until)| **until <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.typing_until.remove(id);
            if let Some(record) = self.records.get_mut(id) {
                record.typing = false;
            }
        }
        expired
    }

    /// Earliest pending typing expiry.
    pub fn next_expiry(&self) -> Option<I> {
        self.typing_until.values().copied().min()
    }

    /// Seed the counterpart's status from a history page's room block.
    pub fn seed(&mut self, room: &RoomSummary) {
        let (Some(participant), Some(status)) =
            (&room.other_participant, &room.other_participant_online_status)
        else {
            return;
        };

        let record = self.records.entry(participant.user_id.clone()).or_default();
        record.online = status.is_online;
        record.status_text.clone_from(&status.status_text);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.records.clear();
        self.typing_until.clear();
    }
}

/// Local typing debouncer.
///
/// The first keystroke of a burst produces `typing: true` right away; a
/// single deadline, pushed back by every keystroke, produces `typing: false`
/// once the user has been quiet for `stop_after`.
#[derive(Debug, Clone)]
pub struct TypingDebouncer<I> {
    stop_after: Duration,
    deadline: Option<I>,
}

impl<I> TypingDebouncer<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Idle debouncer.
    pub fn new(stop_after: Duration) -> Self {
        Self { stop_after, deadline: None }
    }

    /// Register a keystroke. Returns the start frame on the first keystroke
    /// of a burst.
    pub fn keystroke(&mut self, now: I) -> Option<OutboundFrame> {
        let starting = self.deadline.is_none();
        self.deadline = Some(now + self.stop_after);
        starting.then_some(OutboundFrame::Typing { is_typing: true })
    }

    /// Returns the stop frame once the deadline has passed.
    pub fn poll(&mut self, now: I) -> Option<OutboundFrame> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(OutboundFrame::Typing { is_typing: false })
            },
            _ => None,
        }
    }

    /// End the burst early (the message was sent). Returns the stop frame if
    /// a burst was active.
    pub fn stop(&mut self) -> Option<OutboundFrame> {
        self.deadline.take().map(|_| OutboundFrame::Typing { is_typing: false })
    }

    /// Drop the pending deadline without emitting anything.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Pending stop deadline.
    pub fn deadline(&self) -> Option<I> {
        self.deadline
    }

    /// Whether a burst is active.
    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }
}

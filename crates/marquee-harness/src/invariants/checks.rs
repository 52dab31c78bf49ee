//! Standard timeline invariants.

use std::collections::HashSet;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// No message id appears twice in a timeline.
pub struct UniqueMessageIds;

impl Invariant for UniqueMessageIds {
    fn name(&self) -> &'static str {
        "unique_message_ids"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            let mut seen = HashSet::new();
            for message in &room.messages {
                if !seen.insert(&message.id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("room {}: duplicate id {}", room.room, message.id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Timelines are strictly ascending by `(created_at, id)`.
///
/// Arrival order (page vs push, before or after a reconnect) must never
/// show through.
pub struct AscendingOrder;

impl Invariant for AscendingOrder {
    fn name(&self) -> &'static str {
        "ascending_order"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            for window in room.messages.windows(2) {
                if window[0].order_key() >= window[1].order_key() {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "room {}: {} ({}) before {} ({})",
                            room.room,
                            window[0].id,
                            window[0].created_at,
                            window[1].id,
                            window[1].created_at
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A message read at the previous observation is still read, as long as it
/// is still present.
pub struct ReadFlagsPreserved;

impl Invariant for ReadFlagsPreserved {
    fn name(&self) -> &'static str {
        "read_flags_preserved"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            let read: HashSet<_> =
                room.previous.iter().filter(|m| m.is_read).map(|m| &m.id).collect();

            if let Some(lost) = room.messages.iter().find(|m| read.contains(&m.id) && !m.is_read) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("room {}: {} became unread", room.room, lost.id),
                });
            }
        }
        Ok(())
    }
}

/// Every message present at the previous observation is still present.
///
/// Holds while a room only grows: pushes, older pages and resyncs. Not part
/// of the standard set because a reload legitimately drops older pages.
pub struct MessagesRetained;

impl Invariant for MessagesRetained {
    fn name(&self) -> &'static str {
        "messages_retained"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            let present: HashSet<_> = room.messages.iter().map(|m| &m.id).collect();
            if let Some(lost) = room.previous.iter().find(|m| !present.contains(&m.id)) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("room {}: {} disappeared", room.room, lost.id),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use marquee_proto::{Message, MessageId, MessageKind, ParticipantId, RoomId, Sender};

    use super::*;
    use crate::invariants::TimelineSnapshot;

    fn message(id: &str, secs: i64, read: bool) -> Message {
        Message {
            id: MessageId::new(id),
            sender: Sender { user_id: ParticipantId::new("1"), full_name: None },
            kind: MessageKind::Text,
            content: String::new(),
            media_url: None,
            media_filename: None,
            created_at: DateTime::from_timestamp(secs, 0).unwrap_or_default(),
            is_read: read,
        }
    }

    fn snapshot(messages: Vec<Message>, previous: Vec<Message>) -> SystemSnapshot {
        let mut room = TimelineSnapshot::new(RoomId::new("r"), messages);
        room.previous = previous;
        SystemSnapshot::single(room)
    }

    #[test]
    fn duplicates_are_reported() {
        let state = snapshot(vec![message("a", 1, false), message("a", 1, false)], Vec::new());
        assert!(UniqueMessageIds.check(&state).is_err());
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let ok = snapshot(vec![message("a", 1, false), message("b", 1, false)], Vec::new());
        assert!(AscendingOrder.check(&ok).is_ok());

        let swapped = snapshot(vec![message("b", 1, false), message("a", 1, false)], Vec::new());
        assert!(AscendingOrder.check(&swapped).is_err());
    }

    #[test]
    fn unread_after_read_is_reported() {
        let state = snapshot(vec![message("a", 1, false)], vec![message("a", 1, true)]);
        assert!(ReadFlagsPreserved.check(&state).is_err());

        let dropped = snapshot(Vec::new(), vec![message("a", 1, true)]);
        assert!(ReadFlagsPreserved.check(&dropped).is_ok());
    }

    #[test]
    fn vanished_message_is_reported() {
        let grown = snapshot(
            vec![message("a", 1, false), message("b", 2, false)],
            vec![message("a", 1, false)],
        );
        assert!(MessagesRetained.check(&grown).is_ok());

        let shrunk = snapshot(vec![message("b", 2, false)], vec![message("a", 1, false)]);
        assert!(MessagesRetained.check(&shrunk).is_err());
    }
}

//! Notification stream payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::RoomId;

/// Body of a `notification` frame.
///
/// The backend sends either a structured `notification` object or a bare
/// `message` string (connection acknowledgements).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationFrame {
    /// Structured entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationPayload>,
    /// Plain acknowledgement text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One structured notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Notification kind, e.g. `new_message` or `new_event`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Display text.
    #[serde(default)]
    pub message: String,
    /// Related room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    /// Related event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Fields this client does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn keeps_unknown_fields() {
        let payload: NotificationPayload = serde_json::from_value(json!({
            "type": "new_event",
            "message": "Jazz night added",
            "event_id": "e-1",
            "organizer": "blue note"
        }))
        .unwrap();

        assert_eq!(payload.kind, "new_event");
        assert_eq!(payload.event_id.as_deref(), Some("e-1"));
        assert_eq!(payload.extra.get("organizer"), Some(&json!("blue note")));
    }
}

//! Chat messages and history pages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    MessageId, ParticipantId,
    errors::{ProtocolError, Result},
};

/// Sender reference embedded in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Participant id of the author.
    pub user_id: ParticipantId,
    /// Display name, when the backend includes the profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// Message body kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text in `content`.
    #[default]
    Text,
    /// Media locator in `media_url`.
    #[serde(rename = "image", alias = "media")]
    Media,
}

/// A chat message as served by the backend.
///
/// The server is authoritative for `id` and `created_at`; the client only ever
/// flips `is_read` locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned id.
    #[serde(rename = "message_id", alias = "id")]
    pub id: MessageId,
    /// Author.
    pub sender: Sender,
    /// Body kind.
    #[serde(rename = "message_type", default)]
    pub kind: MessageKind,
    /// Text body. Empty for media messages.
    #[serde(default)]
    pub content: String,
    /// Media locator for [`MessageKind::Media`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Original media file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_filename: Option<String>,
    /// Server creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Read flag.
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// Total-order key: creation time, ties broken by id.
    pub fn order_key(&self) -> (DateTime<Utc>, &MessageId) {
        (self.created_at, &self.id)
    }
}

/// Online status block attached to a room summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineStatus {
    /// Whether the participant is connected.
    pub is_online: bool,
    /// Human-readable status (e.g. "last seen 5 minutes ago").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
}

/// Room metadata optionally included with the first history page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// The counterpart in a one-to-one room.
    #[serde(default)]
    pub other_participant: Option<Sender>,
    /// The counterpart's status at fetch time.
    #[serde(default)]
    pub other_participant_online_status: Option<OnlineStatus>,
}

/// One page of room history.
///
/// Pages are numbered from 1 (newest). Within a page the backend lists
/// messages newest first; consumers must not rely on that order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    /// Messages on this page.
    #[serde(default)]
    pub results: Vec<Message>,
    /// Link to the next (older) page. `None` on the last page.
    #[serde(default)]
    pub next: Option<String>,
    /// Room metadata, when included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomSummary>,
}

impl MessagePage {
    /// Decode a page from a REST response body.
    pub fn from_json(body: &Value) -> Result<Self> {
        Self::deserialize(body).map_err(|e| ProtocolError::InvalidFrame {
            kind: "message_page".to_string(),
            reason: e.to_string(),
        })
    }

    /// Whether an older page exists.
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// Body of a "send message" call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    /// Text body. Empty for media.
    pub content: String,
    /// Body kind.
    #[serde(rename = "message_type")]
    pub kind: MessageKind,
    /// Uploaded media locator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Uploaded media file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_filename: Option<String>,
}

impl NewMessage {
    /// Text message.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageKind::Text,
            media_url: None,
            media_filename: None,
        }
    }

    /// Media message referencing an already uploaded file.
    pub fn media(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            kind: MessageKind::Media,
            media_url: Some(url.into()),
            media_filename: Some(filename.into()),
        }
    }

    /// JSON request body.
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_backend_message() {
        let msg: Message = serde_json::from_value(json!({
            "message_id": "6b1e",
            "content": "hi",
            "sender": { "user_id": 7, "full_name": "Ada" },
            "is_read": false,
            "created_at": "2025-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(msg.id, MessageId::new("6b1e"));
        assert_eq!(msg.sender.user_id, ParticipantId::new("7"));
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn media_kind_accepts_image_and_media() {
        let image: MessageKind = serde_json::from_str("\"image\"").unwrap();
        let media: MessageKind = serde_json::from_str("\"media\"").unwrap();
        assert_eq!(image, MessageKind::Media);
        assert_eq!(media, MessageKind::Media);
    }

    #[test]
    fn page_without_next_is_last() {
        let page = MessagePage::from_json(&json!({ "results": [], "next": null })).unwrap();
        assert!(!page.has_next());
        assert!(page.room.is_none());
    }

    #[test]
    fn media_body_omits_absent_fields() {
        let text = NewMessage::text("hello").to_json().unwrap();
        assert_eq!(text, json!({ "content": "hello", "message_type": "text" }));

        let media = NewMessage::media("https://cdn/x.png", "x.png").to_json().unwrap();
        assert_eq!(media["message_type"], "image");
        assert_eq!(media["media_filename"], "x.png");
    }
}

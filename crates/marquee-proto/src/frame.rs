//! Realtime channel frames.
//!
//! Every frame is a JSON object with a string `type` discriminator. Decoding
//! is lenient at the edges: an unknown discriminator is not an error, it
//! simply yields no frame, so a newer backend can add kinds without breaking
//! older clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Message, ParticipantId,
    errors::{ProtocolError, Result},
    notification::NotificationFrame,
};

/// Discriminators this client understands.
const KNOWN_KINDS: &[&str] =
    &["message", "participant_status", "user_status", "typing", "pong", "notification"];

/// Presence update for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Participant the update is about.
    pub user_id: ParticipantId,
    /// Whether the participant is connected.
    pub is_online: bool,
    /// Human-readable status text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    /// Last-seen timestamp as sent by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

/// Typing indicator for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    /// Participant who is (or stopped) typing.
    pub user_id: ParticipantId,
    /// Typing flag.
    pub is_typing: bool,
}

/// Server to client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A new chat message.
    Message {
        /// The message.
        message: Message,
    },
    /// A presence change.
    #[serde(alias = "user_status")]
    ParticipantStatus(StatusUpdate),
    /// A typing indicator.
    Typing(TypingSignal),
    /// Keep-alive reply.
    Pong {
        /// Server timestamp, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },
    /// Entry or acknowledgement on the notification stream.
    Notification(NotificationFrame),
}

impl InboundFrame {
    /// Decode a text frame.
    ///
    /// Returns `Ok(None)` for a well-formed frame whose discriminator is not
    /// known to this client.
    ///
    /// # Errors
    ///
    /// - `Malformed` if the text is not JSON
    /// - `MissingDiscriminator` if there is no string `type` field
    /// - `InvalidFrame` if a known kind has the wrong shape
    pub fn decode(text: &str) -> Result<Option<Self>> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingDiscriminator)?
            .to_owned();

        if !KNOWN_KINDS.contains(&kind.as_str()) {
            return Ok(None);
        }

        Self::deserialize(value)
            .map(Some)
            .map_err(|e| ProtocolError::InvalidFrame { kind, reason: e.to_string() })
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Wire discriminator of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::ParticipantStatus(_) => "participant_status",
            Self::Typing(_) => "typing",
            Self::Pong { .. } => "pong",
            Self::Notification(_) => "notification",
        }
    }
}

/// Client to server frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Local typing indicator.
    Typing {
        /// Typing flag.
        is_typing: bool,
    },
    /// Keep-alive probe.
    Ping,
}

impl OutboundFrame {
    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn outbound_wire_format() {
        insta::assert_snapshot!(
            OutboundFrame::Typing { is_typing: true }.encode().unwrap(),
            @r#"{"type":"typing","is_typing":true}"#
        );
        insta::assert_snapshot!(OutboundFrame::Ping.encode().unwrap(), @r#"{"type":"ping"}"#);
    }

    #[test]
    fn user_status_is_alias_of_participant_status() {
        let frame = InboundFrame::decode(
            r#"{"type":"user_status","user_id":5,"is_online":true,"status_text":"online"}"#,
        )
        .unwrap()
        .unwrap();

        match frame {
            InboundFrame::ParticipantStatus(update) => {
                assert_eq!(update.user_id, ParticipantId::new("5"));
                assert!(update.is_online);
            },
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_not_an_error() {
        assert_eq!(InboundFrame::decode(r#"{"type":"reaction","emoji":"x"}"#).unwrap(), None);
    }

    #[test]
    fn missing_type_is_rejected() {
        assert_eq!(
            InboundFrame::decode(r#"{"user_id":1}"#).unwrap_err(),
            ProtocolError::MissingDiscriminator
        );
    }

    #[test]
    fn known_kind_with_wrong_shape_is_invalid() {
        let err = InboundFrame::decode(r#"{"type":"typing","is_typing":"yes"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFrame { ref kind, .. } if kind == "typing"));
    }

    #[test]
    fn inbound_encode_decodes_back() {
        let frame = InboundFrame::Typing(TypingSignal {
            user_id: ParticipantId::new("9"),
            is_typing: false,
        });
        let text = frame.encode().unwrap();
        assert_eq!(InboundFrame::decode(&text).unwrap(), Some(frame));
    }
}

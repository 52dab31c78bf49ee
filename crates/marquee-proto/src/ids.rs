//! Identifier newtypes.
//!
//! The backend serializes identifiers inconsistently: room and message ids
//! are UUID strings, while participant ids arrive either as strings (channel
//! frames) or as integers (REST profiles). All three are normalized to
//! strings so that equality never depends on which endpoint produced them.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                RawId::deserialize(deserializer).map(|raw| Self(raw.into_string()))
            }
        }
    };
}

string_id!(
    /// Room (topic) identifier.
    RoomId
);

string_id!(
    /// Server-assigned message identifier, unique within a room.
    MessageId
);

string_id!(
    /// Participant (user) identifier.
    ParticipantId
);

/// Accepts either a JSON string or a JSON integer.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Signed(n) => n.to_string(),
            Self::Unsigned(n) => n.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_string_ids_compare_equal() {
        let from_int: ParticipantId = serde_json::from_str("42").unwrap();
        let from_str: ParticipantId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_int, from_str);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = RoomId::new("3f0c");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"3f0c\"");
    }
}

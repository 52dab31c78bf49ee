//! Error types for the client runtime.
//!
//! Three layers, three enums. [`TransportError`] is what a socket or HTTP
//! stack can report. [`RequestError`] is what a REST caller sees after the
//! auth coordinator has done its work. [`ClientError`] adds the failures of
//! the channel manager surface.

use marquee_proto::{ProtocolError, RoomId};
use serde_json::Value;
use thiserror::Error;

/// Failures of the underlying HTTP or duplex transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Request or connection failed at the network level
    #[error("network failure: {0}")]
    Network(String),

    /// Duplex handshake failed or was refused
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Transport was closed
    #[error("transport closed")]
    Closed,

    /// Target URL could not be built
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Failure of one REST call as seen by its caller.
///
/// `Clone` so that a single refresh failure can be handed to every request
/// that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// Transport failure (no response)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Credential rejected and no further replay is allowed
    #[error("authorization expired")]
    AuthorizationExpired,

    /// Session refresh failed; the session has been terminated
    #[error("session refresh failed: {0}")]
    RefreshFailed(String),

    /// Non-2xx response other than an authorization failure
    #[error("request failed with status {status}")]
    Status {
        /// HTTP status
        status: u16,
        /// Backend `detail` message, when present
        detail: Option<String>,
        /// Full response body
        body: Value,
    },

    /// Response body did not have the expected shape
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RequestError {
    /// HTTP status of the failure, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::AuthorizationExpired => Some(401),
            Self::Transport(_) | Self::RefreshFailed(_) | Self::Decode(_) => None,
        }
    }
}

impl From<ProtocolError> for RequestError {
    fn from(err: ProtocolError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Failures of the client surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Operation requires an authenticated session
    #[error("session is not authenticated")]
    SessionInactive,

    /// A REST call failed
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Configuration is unusable
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The room is not (or no longer) subscribed
    #[error("room {0} is not subscribed")]
    Unsubscribed(RoomId),
}

//! Error types for the core state machines.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ChannelState;

/// Errors produced by the channel connection state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The server refused the duplex handshake
    #[error("handshake rejected: {reason}")]
    HandshakeRejected {
        /// Transport-level reason
        reason: String,
    },

    /// An open connection closed without being asked to
    #[error("connection dropped: {reason}")]
    ConnectionDropped {
        /// Transport-level reason
        reason: String,
    },

    /// No inbound traffic within the idle timeout
    #[error("idle timeout after {elapsed:?}")]
    IdleTimeout {
        /// How long the connection was silent
        elapsed: Duration,
    },

    /// Operation not valid in the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// State when the operation was attempted
        state: ChannelState,
        /// Operation that was attempted
        operation: &'static str,
    },
}

impl ChannelError {
    /// Returns true if the failure is expected to clear up on its own.
    ///
    /// Drops and idle timeouts are network weather. A rejected handshake
    /// usually means the server does not accept the session; the reconnect
    /// loop still retries, but the driver reports it louder.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionDropped { .. } | Self::IdleTimeout { .. })
    }
}

/// A result arrived for an operation that has since been superseded.
///
/// Returned when a page fetch resolves after its room was closed or after
/// the timeline was replaced. Callers discard the result silently.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("stale operation result discarded")]
pub struct StaleOperation;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_and_timeouts_are_transient() {
        assert!(ChannelError::ConnectionDropped { reason: "reset".to_string() }.is_transient());
        assert!(ChannelError::IdleTimeout { elapsed: Duration::from_secs(61) }.is_transient());
    }

    #[test]
    fn rejections_are_not_transient() {
        assert!(!ChannelError::HandshakeRejected { reason: "4001".to_string() }.is_transient());
        assert!(
            !ChannelError::InvalidState { state: ChannelState::Closed, operation: "send" }
                .is_transient()
        );
    }
}

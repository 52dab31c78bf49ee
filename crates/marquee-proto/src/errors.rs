//! Protocol error types.

use thiserror::Error;

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input was not valid JSON.
    #[error("malformed JSON: {0}")]
    Malformed(String),

    /// Frame is a JSON value without a string `type` field.
    #[error("frame has no `type` discriminator")]
    MissingDiscriminator,

    /// Frame has a known discriminator but the body does not match it.
    #[error("invalid `{kind}` frame: {reason}")]
    InvalidFrame {
        /// Discriminator of the offending frame
        kind: String,
        /// Decoder error
        reason: String,
    },

    /// Value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
}

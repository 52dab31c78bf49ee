//! Marquee wire protocol
//!
//! Value types exchanged with the REST backend and the realtime channel
//! backend. Nothing here performs I/O; the types only know how to encode and
//! decode themselves.
//!
//! # Components
//!
//! - [`RequestEnvelope`]: one outbound REST call (method, path, payload, retry
//!   marker)
//! - [`InboundFrame`] / [`OutboundFrame`]: JSON channel frames discriminated
//!   by their `type` field
//! - [`Message`] and [`MessagePage`]: chat history as served by the backend
//! - [`NotificationPayload`]: entries of the per-user notification stream

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod envelope;
pub mod errors;
pub mod frame;
pub mod ids;
pub mod message;
pub mod notification;

pub use envelope::{Method, RequestEnvelope};
pub use errors::{ProtocolError, Result};
pub use frame::{InboundFrame, OutboundFrame, StatusUpdate, TypingSignal};
pub use ids::{MessageId, ParticipantId, RoomId};
pub use message::{Message, MessageKind, MessagePage, NewMessage, OnlineStatus, RoomSummary, Sender};
pub use notification::{NotificationFrame, NotificationPayload};

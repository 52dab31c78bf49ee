//! Marquee core
//!
//! Pure state machines behind the client communication layer. Nothing in this
//! crate performs I/O or reads a clock: time is passed in as `now`, and every
//! operation returns either a value or a list of actions for the driver to
//! execute.
//!
//! # Components
//!
//! - [`RefreshGate`]: single-flight bookkeeping for session refresh
//! - [`ChannelConnection`]: lifecycle of one realtime connection (dial,
//!   reconnect, heartbeat, outbound buffer)
//! - [`Timeline`]: ordered, deduplicated message history with paging
//! - [`PresenceBook`] and [`TypingDebouncer`]: ephemeral participant signals
//! - [`NotificationFeed`]: per-user notification list
//! - [`Session`]: authentication flag and subject

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod connection;
pub mod error;
pub mod notifications;
pub mod presence;
pub mod session;
pub mod timeline;

pub use auth::{RefreshGate, Role, Verdict};
pub use connection::{
    ChannelAction, ChannelConfig, ChannelConnection, ChannelState, ReconnectPolicy,
};
pub use error::{ChannelError, StaleOperation};
pub use notifications::{DEFAULT_FEED_LIMIT, Notification, NotificationFeed};
pub use presence::{PresenceBook, PresenceRecord, TypingConfig, TypingDebouncer};
pub use session::{Session, TerminationReason};
pub use timeline::{LoadTicket, Timeline};

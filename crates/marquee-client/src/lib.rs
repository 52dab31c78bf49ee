//! Marquee client runtime
//!
//! Drives the pure state machines of `marquee-core` on tokio:
//!
//! - [`AuthCoordinator`] wraps every REST call and keeps at most one session
//!   refresh in flight.
//! - [`ChannelManager`] runs one connection task per subscribed room (and one
//!   for the notification stream), each with its own reconnect loop.
//! - [`MarqueeClient`] ties both to one [`SessionHandle`]; a terminated
//!   session closes every connection.
//!
//! Transports are traits ([`HttpTransport`], [`Dialer`]) with `reqwest` and
//! `tokio-tungstenite` implementations, so tests can substitute an in-memory
//! backend.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod channel;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod manager;
pub mod notifications;
pub mod room;
pub mod session;
pub mod transport;

pub use client::MarqueeClient;
pub use config::ClientConfig;
pub use coordinator::AuthCoordinator;
pub use error::{ClientError, RequestError, TransportError};
pub use http::{HttpResponse, HttpTransport, ReqwestTransport};
pub use manager::ChannelManager;
pub use notifications::NotificationsHandle;
pub use room::{LoadOutcome, PresenceChange, RoomHandle, TypingChange};
pub use session::SessionHandle;
pub use transport::{ChannelLink, Dialer, WsDialer};

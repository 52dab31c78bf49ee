//! Deterministic test harness for the Marquee client.
//!
//! [`SimBackend`] is an in-memory REST API and realtime gateway implementing
//! the client's transport traits, so a real [`marquee_client::MarqueeClient`]
//! runs against it unchanged. Combined with tokio's paused clock, reconnect
//! delays and typing timers become exact.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks timeline properties (unique ids, ascending
//! order, sticky read flags) after every step of a scenario. Use
//! [`InvariantRegistry::standard()`] for the full set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_backend;

pub use invariants::{
    AscendingOrder, Invariant, InvariantRegistry, InvariantResult, MessagesRetained,
    ReadFlagsPreserved, SystemSnapshot, TimelineRecorder, TimelineSnapshot, UniqueMessageIds,
    Violation,
};
pub use sim_backend::{
    NOTIFICATIONS_TOPIC, PAGE_SIZE, RecordedCall, RefreshMode, SIM_API_BASE, SIM_CHAT_WS_BASE,
    SIM_NOTIFICATIONS_WS, SimBackend,
};

//! Single-flight session refresh.
//!
//! When the ambient credential expires, every request that notices pays the
//! same price: one refresh call. [`RefreshGate`] records whether a refresh is
//! in flight and parks the requests that arrive while it is. The driver owns
//! the actual I/O; the gate only decides who leads and who waits.
//!
//! # Lifecycle
//!
//! ```text
//!            enter() = Leader             settle()
//!   Idle ───────────────────────> InFlight ───────> Idle
//!                                  │   ^
//!                  enter()=Follower│   │park(waiter)
//!                                  └───┘
//! ```
//!
//! # Invariants
//!
//! - Waiters exist only while a refresh is in flight.
//! - `settle()` drains every waiter exactly once; the driver resolves all of
//!   them with the same outcome.

use std::mem;

use marquee_proto::RequestEnvelope;

use crate::session::TerminationReason;

/// HTTP status the backend uses for an expired or missing credential.
pub const UNAUTHORIZED: u16 = 401;

/// HTTP status the backend uses for a forbidden request.
pub const FORBIDDEN: u16 = 403;

/// `detail` messages of a 403 that mean the session itself is gone.
pub const REVOKING_DETAILS: &[&str] = &["User is blocked.", "Token has been blacklisted."];

/// What the driver should do with a finished response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Not an authorization problem. Hand the response to the caller.
    Deliver,
    /// Authorization failed and the envelope may not be replayed again.
    Propagate,
    /// Authorization failed for the first time. Refresh, then replay.
    RefreshAndReplay,
    /// The session is over. Terminate it, then hand the failure back.
    Terminate(TerminationReason),
}

impl Verdict {
    /// Classify a response to `envelope`.
    ///
    /// `refresh_route` is the path of the refresh endpoint, without query.
    /// A 401 on the refresh endpoint itself is never retried, because a
    /// refresh needing a refresh can only loop.
    pub fn classify(
        envelope: &RequestEnvelope,
        status: u16,
        detail: Option<&str>,
        refresh_route: &str,
    ) -> Self {
        match status {
            UNAUTHORIZED if envelope.route() == refresh_route => {
                Self::Terminate(TerminationReason::RefreshRejected)
            },
            UNAUTHORIZED if envelope.is_retried() => Self::Propagate,
            UNAUTHORIZED => Self::RefreshAndReplay,
            FORBIDDEN => match detail {
                Some(detail) if REVOKING_DETAILS.contains(&detail) => {
                    Self::Terminate(TerminationReason::Revoked { detail: detail.to_string() })
                },
                _ => Self::Deliver,
            },
            _ => Self::Deliver,
        }
    }
}

/// Outcome of [`RefreshGate::enter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Caller must issue the refresh and later call [`RefreshGate::settle`].
    Leader,
    /// A refresh is already running; caller must park a waiter.
    Follower,
}

/// Refresh-in-flight flag plus the pending-retry queue.
///
/// Generic over the waiter type so the driver can park whatever wake-up
/// primitive it uses (a oneshot sender in the tokio runtime, a plain id in
/// tests).
#[derive(Debug)]
pub struct RefreshGate<W> {
    in_flight: bool,
    waiters: Vec<W>,
    refreshes: u64,
}

impl<W> Default for RefreshGate<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> RefreshGate<W> {
    /// Idle gate with an empty queue.
    pub fn new() -> Self {
        Self { in_flight: false, waiters: Vec::new(), refreshes: 0 }
    }

    /// Join the refresh cycle.
    ///
    /// The first caller becomes [`Role::Leader`] and the flag is raised;
    /// everyone else until [`settle`](Self::settle) is a follower.
    pub fn enter(&mut self) -> Role {
        if self.in_flight {
            return Role::Follower;
        }
        self.in_flight = true;
        self.refreshes += 1;
        Role::Leader
    }

    /// Queue a waiter behind the running refresh.
    ///
    /// Returns the waiter back if no refresh is in flight, which means the
    /// refresh settled between the caller's `enter` and this call.
    pub fn park(&mut self, waiter: W) -> Result<(), W> {
        if !self.in_flight {
            return Err(waiter);
        }
        self.waiters.push(waiter);
        Ok(())
    }

    /// Lower the flag and drain the queue in arrival order.
    pub fn settle(&mut self) -> Vec<W> {
        self.in_flight = false;
        mem::take(&mut self.waiters)
    }

    /// Whether a refresh is running.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Number of parked waiters.
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }

    /// Refresh calls issued over the gate's lifetime.
    pub fn refreshes_issued(&self) -> u64 {
        self.refreshes
    }
}

//! Channel connection state machine.
//!
//! Manages one realtime connection per topic: dialing, reconnecting after a
//! failure, heartbeats, idle detection, and the outbound buffer. Uses the
//! action pattern: methods take time as input and return actions for the
//! driver to execute, so the machine itself never touches a socket or clock.
//!
//! # State Machine
//!
//! ```text
//!               handshake ok
//!  ┌────────────┐──────────────>┌──────┐
//!  │ Connecting │               │ Open │
//!  └────────────┘<─┐            └──────┘
//!        │         │ delay due     │
//!        │ failed  │               │ dropped / idle
//!        ↓         │               ↓
//!  ┌───────────────┴┐<─────────────┘
//!  │ ReconnectWait  │
//!  └────────────────┘
//!
//!  close() from any state ──> Closed
//! ```

use std::{
    collections::VecDeque,
    ops::{Add, Sub},
    time::Duration,
};

use marquee_proto::{InboundFrame, MessageId, OutboundFrame};

use crate::error::ChannelError;

/// Delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Interval at which an open connection sends a ping.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Silence after which an open connection is treated as dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    /// Open a transport to the topic's URL
    Dial {
        /// Consecutive failed attempts before this dial
        attempt: u32,
    },

    /// Hand this frame to subscribers
    Deliver(InboundFrame),

    /// A connection that had been open is open again; re-fetch the newest
    /// history to fill the gap
    Resync {
        /// Id of the newest message delivered before the outage
        since: Option<MessageId>,
    },

    /// Release the current transport handle
    Disconnect {
        /// The failure that ended the connection
        error: ChannelError,
    },

    /// A reconnect is due after `delay`
    ReconnectScheduled {
        /// Failed attempts so far
        attempt: u32,
        /// Wait before the next dial
        delay: Duration,
    },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Dial issued, waiting for the handshake
    Connecting,
    /// Handshake complete, frames flow
    Open,
    /// Failed, waiting for the reconnect delay
    ReconnectWait,
    /// Closed by the owner; terminal
    Closed,
}

/// Delay schedule between reconnect attempts.
///
/// The defaults give a fixed 3 second delay. Raising `max_delay` turns the
/// schedule into capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Growth factor per consecutive failure (values below 1 are treated as 1)
    pub multiplier: f64,
    /// Random spread as a ratio of the delay, in `[0, 1]`
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_RECONNECT_DELAY,
            max_delay: DEFAULT_RECONNECT_DELAY,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay between every attempt.
    pub fn fixed(delay: Duration) -> Self {
        Self { initial_delay: delay, max_delay: delay, ..Self::default() }
    }

    /// Delay before the reconnect that follows failure number `attempt`
    /// (1-based). `sample` is uniform in `[0, 1)` and only matters when
    /// `jitter` is non-zero.
    pub fn delay(&self, attempt: u32, sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let grown = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = grown.min(self.max_delay.as_secs_f64());

        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = 1.0 + jitter * (2.0 * sample.clamp(0.0, 1.0) - 1.0);

        Duration::try_from_secs_f64(capped * factor).unwrap_or(self.max_delay)
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Reconnect schedule
    pub reconnect: ReconnectPolicy,
    /// Ping interval while open. `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
    /// Maximum inbound silence while open. `None` disables idle detection.
    pub idle_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// Channel connection state machine
///
/// One instance per subscribed topic. Pure: no I/O, no clock. Generic over
/// `Instant` so tests can drive it with virtual time.
#[derive(Debug, Clone)]
pub struct ChannelConnection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    topic: String,
    state: ChannelState,
    config: ChannelConfig,
    /// Consecutive failures since the last successful handshake
    attempts: u32,
    reconnect_at: Option<I>,
    last_activity: I,
    last_heartbeat: I,
    outbound: VecDeque<OutboundFrame>,
    /// Whether any handshake ever succeeded
    has_opened: bool,
    last_cursor: Option<MessageId>,
    /// xorshift state for jitter
    rng: u64,
}

impl<I> ChannelConnection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    /// Create a connection in [`ChannelState::Connecting`] and return the
    /// initial `Dial`.
    ///
    /// `seed` feeds the reconnect jitter; any value works.
    pub fn open(
        topic: impl Into<String>,
        now: I,
        config: ChannelConfig,
        seed: u64,
    ) -> (Self, Vec<ChannelAction>) {
        let conn = Self {
            topic: topic.into(),
            state: ChannelState::Connecting,
            config,
            attempts: 0,
            reconnect_at: None,
            last_activity: now,
            last_heartbeat: now,
            outbound: VecDeque::new(),
            has_opened: false,
            last_cursor: None,
            rng: seed | 1,
        };
        (conn, vec![ChannelAction::Dial { attempt: 0 }])
    }

    /// Topic this connection serves.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Consecutive failures since the last successful handshake.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Id of the newest message delivered on this connection.
    pub fn last_cursor(&self) -> Option<&MessageId> {
        self.last_cursor.as_ref()
    }

    /// The transport completed its handshake.
    ///
    /// # Errors
    ///
    /// - `ChannelError::InvalidState` if not `Connecting`
    pub fn handshake_succeeded(&mut self, now: I) -> Result<Vec<ChannelAction>, ChannelError> {
        self.expect_state(ChannelState::Connecting, "complete handshake")?;

        self.state = ChannelState::Open;
        self.attempts = 0;
        self.last_activity = now;
        self.last_heartbeat = now;

        let mut actions = Vec::new();
        if self.has_opened {
            actions.push(ChannelAction::Resync { since: self.last_cursor.clone() });
        }
        self.has_opened = true;
        Ok(actions)
    }

    /// The transport failed to complete its handshake.
    ///
    /// # Errors
    ///
    /// - `ChannelError::InvalidState` if not `Connecting`
    pub fn handshake_failed(
        &mut self,
        now: I,
        error: ChannelError,
    ) -> Result<Vec<ChannelAction>, ChannelError> {
        self.expect_state(ChannelState::Connecting, "fail handshake")?;
        Ok(self.schedule_reconnect(now, error))
    }

    /// The open transport closed without being asked to.
    ///
    /// # Errors
    ///
    /// - `ChannelError::InvalidState` if not `Open`
    pub fn connection_lost(
        &mut self,
        now: I,
        error: ChannelError,
    ) -> Result<Vec<ChannelAction>, ChannelError> {
        self.expect_state(ChannelState::Open, "lose connection")?;
        Ok(self.schedule_reconnect(now, error))
    }

    /// Process periodic maintenance: due reconnects, idle detection and
    /// heartbeats.
    pub fn tick(&mut self, now: I) -> Vec<ChannelAction> {
        match self.state {
            ChannelState::ReconnectWait => match self.reconnect_at {
                Some(due) if now >= due => {
                    self.state = ChannelState::Connecting;
                    self.reconnect_at = None;
                    vec![ChannelAction::Dial { attempt: self.attempts }]
                },
                _ => Vec::new(),
            },
            ChannelState::Open => {
                if let Some(timeout) = self.config.idle_timeout {
                    let elapsed = now - self.last_activity;
                    if elapsed >= timeout {
                        return self.schedule_reconnect(now, ChannelError::IdleTimeout { elapsed });
                    }
                }

                if let Some(interval) = self.config.heartbeat_interval
                    && now - self.last_heartbeat >= interval
                {
                    self.outbound.push_back(OutboundFrame::Ping);
                    self.last_heartbeat = now;
                }
                Vec::new()
            },
            ChannelState::Connecting | ChannelState::Closed => Vec::new(),
        }
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn poll_timeout(&self) -> Option<I> {
        match self.state {
            ChannelState::ReconnectWait => self.reconnect_at,
            ChannelState::Open => {
                let heartbeat = self.config.heartbeat_interval.map(|h| self.last_heartbeat + h);
                let idle = self.config.idle_timeout.map(|t| self.last_activity + t);
                match (heartbeat, idle) {
                    (Some(h), Some(i)) => Some(h.min(i)),
                    (h, i) => h.or(i),
                }
            },
            ChannelState::Connecting | ChannelState::Closed => None,
        }
    }

    /// Process an inbound frame.
    ///
    /// Frames arriving in any state but `Open` are dropped. Pongs only
    /// refresh activity; everything else is delivered.
    pub fn handle_frame(&mut self, frame: InboundFrame, now: I) -> Vec<ChannelAction> {
        if self.state != ChannelState::Open {
            return Vec::new();
        }
        self.last_activity = now;

        match frame {
            InboundFrame::Pong { .. } => Vec::new(),
            InboundFrame::Message { ref message } => {
                self.last_cursor = Some(message.id.clone());
                vec![ChannelAction::Deliver(frame)]
            },
            other => vec![ChannelAction::Deliver(other)],
        }
    }

    /// Record that some non-frame inbound traffic (e.g. a transport ping)
    /// arrived.
    pub fn update_activity(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Queue an outbound frame. Returns `false` (and drops the frame) unless
    /// the connection is open.
    pub fn send(&mut self, frame: OutboundFrame) -> bool {
        if self.state != ChannelState::Open {
            return false;
        }
        self.outbound.push_back(frame);
        true
    }

    /// Drain frames queued for the transport.
    pub fn take_outgoing(&mut self) -> Vec<OutboundFrame> {
        self.outbound.drain(..).collect()
    }

    /// Close for good. Cancels any pending reconnect and discards buffered
    /// frames.
    pub fn close(&mut self) {
        self.state = ChannelState::Closed;
        self.reconnect_at = None;
        self.outbound.clear();
    }

    fn schedule_reconnect(&mut self, now: I, error: ChannelError) -> Vec<ChannelAction> {
        let was_open = self.state == ChannelState::Open;

        self.attempts = self.attempts.saturating_add(1);
        let sample = self.next_sample();
        let delay = self.config.reconnect.delay(self.attempts, sample);

        self.state = ChannelState::ReconnectWait;
        self.reconnect_at = Some(now + delay);
        self.outbound.clear();

        let mut actions = Vec::with_capacity(2);
        if was_open {
            actions.push(ChannelAction::Disconnect { error });
        }
        actions.push(ChannelAction::ReconnectScheduled { attempt: self.attempts, delay });
        actions
    }

    fn expect_state(
        &self,
        expected: ChannelState,
        operation: &'static str,
    ) -> Result<(), ChannelError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ChannelError::InvalidState { state: self.state, operation })
        }
    }

    fn next_sample(&mut self) -> f64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }
}

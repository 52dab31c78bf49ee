//! Per-topic connection task.
//!
//! [`ChannelDriver`] owns one [`ChannelConnection`] and executes its actions:
//! dialing through the [`Dialer`], decoding inbound text, flushing outbound
//! frames and sleeping until the next timer. Decoded frames go to a
//! [`ChannelSink`], which is where room or notification semantics live.
//!
//! The task's [`CancellationToken`] is the single place reconnecting stops.

use std::{mem, sync::Arc};

use marquee_core::{
    ChannelAction, ChannelConfig, ChannelConnection, ChannelError, ChannelState, TypingDebouncer,
};
use marquee_proto::{InboundFrame, MessageId, OutboundFrame};
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::transport::{ChannelLink, Dialer};

/// Seed used when the OS random source is unavailable.
const FALLBACK_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Receives what a connection delivers.
pub(crate) trait ChannelSink: Send + Sync + 'static {
    /// A decoded frame arrived on an open connection.
    fn deliver(&self, frame: InboundFrame, now: Instant);

    /// The connection re-opened after an outage.
    fn resync(&self, _since: Option<MessageId>) {}

    /// A sink timer from [`next_expiry`](Self::next_expiry) is due.
    fn expire(&self, _now: Instant) {}

    /// Earliest sink-owned deadline.
    fn next_expiry(&self) -> Option<Instant> {
        None
    }
}

/// Requests from handles to the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// Local user pressed a key
    Keystroke,
    /// End the local typing burst now
    StopTyping,
    /// Queue a frame if the connection is open
    Send(OutboundFrame),
}

/// Drives one topic's connection until cancelled.
pub(crate) struct ChannelDriver<S: ChannelSink> {
    topic: String,
    url: Url,
    dialer: Arc<dyn Dialer>,
    sink: Arc<S>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    cancel: CancellationToken,
    config: ChannelConfig,
    typing: TypingDebouncer<Instant>,
    state: watch::Sender<ChannelState>,
}

impl<S: ChannelSink> ChannelDriver<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        topic: impl Into<String>,
        url: Url,
        dialer: Arc<dyn Dialer>,
        sink: Arc<S>,
        commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
        config: ChannelConfig,
        typing: TypingDebouncer<Instant>,
        state: watch::Sender<ChannelState>,
    ) -> Self {
        Self {
            topic: topic.into(),
            url,
            dialer,
            sink,
            commands,
            commands_open: true,
            cancel,
            config,
            typing,
            state,
        }
    }

    /// Run the reconnect loop until the token is cancelled.
    pub(crate) async fn run(mut self) {
        let (mut conn, mut pending) = ChannelConnection::open(
            self.topic.clone(),
            Instant::now(),
            self.config.clone(),
            jitter_seed(),
        );
        let mut link: Option<ChannelLink> = None;

        loop {
            while !pending.is_empty() && !self.cancel.is_cancelled() {
                for action in mem::take(&mut pending) {
                    let follow_up = self.execute(action, &mut conn, &mut link).await;
                    pending.extend(follow_up);
                }
            }

            self.flush(&mut conn, link.as_ref());
            self.publish(conn.state());

            if self.cancel.is_cancelled() {
                break;
            }

            let deadline = [conn.poll_timeout(), self.typing.deadline(), self.sink.next_expiry()]
                .into_iter()
                .flatten()
                .min();

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                inbound = recv_inbound(&mut link) => {
                    let now = Instant::now();
                    match inbound {
                        Some(text) => pending.extend(self.decode(&mut conn, &text, now)),
                        None => {
                            link = None;
                            tracing::info!(topic = %self.topic, "channel closed by peer");
                            let error = ChannelError::ConnectionDropped {
                                reason: "closed by peer".to_string(),
                            };
                            match conn.connection_lost(now, error) {
                                Ok(actions) => pending.extend(actions),
                                Err(e) => {
                                    tracing::warn!(
                                        topic = %self.topic,
                                        error = %e,
                                        "unexpected close"
                                    );
                                },
                            }
                        },
                    }
                },

                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => self.handle_command(command, &mut conn),
                    None => self.commands_open = false,
                },

                () = sleep_until(deadline) => {
                    let now = Instant::now();
                    pending.extend(conn.tick(now));
                    if let Some(frame) = self.typing.poll(now) {
                        conn.send(frame);
                    }
                    self.sink.expire(now);
                },
            }
        }

        conn.close();
        self.typing.cancel();
        drop(link);
        self.publish(ChannelState::Closed);
        tracing::info!(topic = %self.topic, "channel stopped");
    }

    async fn execute(
        &mut self,
        action: ChannelAction,
        conn: &mut ChannelConnection<Instant>,
        link: &mut Option<ChannelLink>,
    ) -> Vec<ChannelAction> {
        match action {
            ChannelAction::Dial { attempt } => {
                self.publish(conn.state());
                tracing::debug!(topic = %self.topic, attempt, "dialing");

                let dialed = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Vec::new(),
                    dialed = self.dialer.dial(&self.url) => dialed,
                };

                let now = Instant::now();
                let result = match dialed {
                    Ok(established) => {
                        *link = Some(established);
                        tracing::info!(topic = %self.topic, attempt, "channel open");
                        conn.handshake_succeeded(now)
                    },
                    Err(e) => {
                        tracing::warn!(topic = %self.topic, attempt, error = %e, "dial failed");
                        let error = ChannelError::HandshakeRejected { reason: e.to_string() };
                        conn.handshake_failed(now, error)
                    },
                };

                result.unwrap_or_else(|e| {
                    tracing::warn!(topic = %self.topic, error = %e, "handshake out of order");
                    Vec::new()
                })
            },
            ChannelAction::Deliver(frame) => {
                self.sink.deliver(frame, Instant::now());
                Vec::new()
            },
            ChannelAction::Resync { since } => {
                tracing::debug!(topic = %self.topic, ?since, "resyncing after reconnect");
                self.sink.resync(since);
                Vec::new()
            },
            ChannelAction::Disconnect { error } => {
                *link = None;
                if error.is_transient() {
                    tracing::info!(topic = %self.topic, %error, "channel disconnected");
                } else {
                    tracing::warn!(topic = %self.topic, %error, "channel disconnected");
                }
                Vec::new()
            },
            ChannelAction::ReconnectScheduled { attempt, delay } => {
                tracing::info!(
                    topic = %self.topic,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "reconnect scheduled"
                );
                Vec::new()
            },
        }
    }

    fn decode(
        &self,
        conn: &mut ChannelConnection<Instant>,
        text: &str,
        now: Instant,
    ) -> Vec<ChannelAction> {
        match InboundFrame::decode(text) {
            Ok(Some(frame)) => conn.handle_frame(frame, now),
            Ok(None) => {
                conn.update_activity(now);
                tracing::debug!(topic = %self.topic, "ignoring frame of unknown type");
                Vec::new()
            },
            Err(e) => {
                conn.update_activity(now);
                tracing::warn!(topic = %self.topic, error = %e, "ignoring malformed frame");
                Vec::new()
            },
        }
    }

    fn handle_command(&mut self, command: Command, conn: &mut ChannelConnection<Instant>) {
        let frame = match command {
            Command::Keystroke => self.typing.keystroke(Instant::now()),
            Command::StopTyping => self.typing.stop(),
            Command::Send(frame) => Some(frame),
        };

        if let Some(frame) = frame
            && !conn.send(frame)
        {
            tracing::debug!(topic = %self.topic, state = ?conn.state(), "dropping signal");
        }
    }

    fn flush(&self, conn: &mut ChannelConnection<Instant>, link: Option<&ChannelLink>) {
        let frames = conn.take_outgoing();
        let Some(link) = link else {
            return;
        };

        for frame in frames {
            match frame.encode() {
                Ok(text) => {
                    if link.outbound.try_send(text).is_err() {
                        tracing::debug!(topic = %self.topic, "outbound buffer full, frame dropped");
                    }
                },
                Err(e) => tracing::warn!(topic = %self.topic, error = %e, "failed to encode frame"),
            }
        }
    }

    fn publish(&self, state: ChannelState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

async fn recv_inbound(link: &mut Option<ChannelLink>) -> Option<String> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn jitter_seed() -> u64 {
    getrandom::u64().unwrap_or(FALLBACK_SEED)
}

//! Room subscriptions.
//!
//! A subscribed room is a [`RoomShared`] (timeline, presence, broadcast
//! senders) fed by its connection task, plus any number of [`RoomHandle`]
//! clones for the application. Page fetches go through the auth coordinator
//! and land in the same timeline as pushed messages.

use std::{sync::Arc, time::Duration};

use marquee_core::{
    ChannelState, LoadTicket, PresenceBook, PresenceRecord, StaleOperation, Timeline,
};
use marquee_proto::{
    InboundFrame, Message, MessageId, MessagePage, NewMessage, ParticipantId, RequestEnvelope,
    RoomId,
};
use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, mpsc, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    channel::{ChannelSink, Command},
    coordinator::AuthCoordinator,
    error::{ClientError, RequestError},
};

/// A participant's presence changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    /// Who changed
    pub participant: ParticipantId,
    /// Record after the change
    pub record: PresenceRecord,
}

/// A participant started or stopped typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingChange {
    /// Who is typing
    pub participant: ParticipantId,
    /// New flag
    pub is_typing: bool,
}

/// Result of a history load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Page applied. `added` is the number of messages inserted, which the
    /// UI uses to keep its scroll anchor.
    Loaded {
        /// Messages inserted
        added: usize,
    },
    /// Nothing to do: a load is already running or there is no older page.
    Skipped,
    /// The result arrived after the room was closed or reloaded.
    Discarded,
}

struct RoomState {
    timeline: Timeline,
    presence: PresenceBook<Instant>,
    closed: bool,
}

/// State shared by a room's connection task and its handles.
pub(crate) struct RoomShared {
    room: RoomId,
    subject: ParticipantId,
    coordinator: Arc<AuthCoordinator>,
    state: Arc<Mutex<RoomState>>,
    messages: broadcast::Sender<Message>,
    presence: broadcast::Sender<PresenceChange>,
    typing: broadcast::Sender<TypingChange>,
    cancel: CancellationToken,
}

impl RoomShared {
    pub(crate) fn new(
        room: RoomId,
        subject: ParticipantId,
        coordinator: Arc<AuthCoordinator>,
        remote_typing_expiry: Duration,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let capacity = capacity.max(1);
        let (messages, _) = broadcast::channel(capacity);
        let (presence, _) = broadcast::channel(capacity);
        let (typing, _) = broadcast::channel(capacity);
        let state = RoomState {
            timeline: Timeline::new(),
            presence: PresenceBook::new(remote_typing_expiry),
            closed: false,
        };

        Self {
            room,
            subject,
            coordinator,
            state: Arc::new(Mutex::new(state)),
            messages,
            presence,
            typing,
            cancel,
        }
    }

    /// Stop everything: the connection task, pending loads and timers.
    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.timeline.close();
            state.presence.clear();
        }
        self.cancel.cancel();
    }
}

impl ChannelSink for RoomShared {
    fn deliver(&self, frame: InboundFrame, now: Instant) {
        match frame {
            InboundFrame::Message { message } => {
                let inserted = {
                    let mut state = self.state.lock();
                    !state.closed && state.timeline.push(message.clone())
                };
                if inserted {
                    let _ = self.messages.send(message);
                }
            },
            InboundFrame::ParticipantStatus(update) => {
                if update.user_id == self.subject {
                    return;
                }
                let record = {
                    let mut state = self.state.lock();
                    if state.closed {
                        return;
                    }
                    state.presence.apply_status(&update)
                };
                let _ = self.presence.send(PresenceChange { participant: update.user_id, record });
            },
            InboundFrame::Typing(signal) => {
                if signal.user_id == self.subject {
                    return;
                }
                let changed = {
                    let mut state = self.state.lock();
                    !state.closed && state.presence.apply_typing(&signal, now)
                };
                if changed {
                    let _ = self.typing.send(TypingChange {
                        participant: signal.user_id,
                        is_typing: signal.is_typing,
                    });
                }
            },
            other => {
                tracing::debug!(
                    room = %self.room,
                    kind = other.kind(),
                    "frame not handled by rooms"
                );
            },
        }
    }

    fn resync(&self, since: Option<MessageId>) {
        let coordinator = Arc::clone(&self.coordinator);
        let state = Arc::clone(&self.state);
        let messages = self.messages.clone();
        let cancel = self.cancel.clone();
        let room = self.room.clone();

        tokio::spawn(async move {
            // Everything missed is newer than this
            let cursor = {
                let state = state.lock();
                let timeline = &state.timeline;
                since
                    .as_ref()
                    .and_then(|id| timeline.get(id))
                    .or_else(|| timeline.newest())
                    .map(|m| (m.created_at, m.id.clone()))
            };

            let mut added: Vec<Message> = Vec::new();
            let mut number = 1;
            loop {
                let fetched = tokio::select! {
                    () = cancel.cancelled() => return,
                    fetched = fetch_page(&coordinator, &room, number) => fetched,
                };
                let page = match fetched {
                    Ok(page) => page,
                    Err(e) => {
                        tracing::warn!(
                            room = %room,
                            page = number,
                            error = %e,
                            "resync fetch failed"
                        );
                        break;
                    },
                };

                let reached = cursor.as_ref().is_none_or(|(at, id)| {
                    page.results.iter().any(|m| m.order_key() <= (*at, id))
                });
                let more = page.has_next();

                {
                    let mut state = state.lock();
                    if state.closed {
                        return;
                    }
                    added.extend(
                        page.results.into_iter().filter(|m| state.timeline.push(m.clone())),
                    );
                }

                if reached || !more {
                    break;
                }
                number += 1;
            }

            added.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
            tracing::debug!(
                room = %room,
                ?since,
                pages = number,
                added = added.len(),
                "resync merged"
            );
            for message in added {
                let _ = messages.send(message);
            }
        });
    }

    fn expire(&self, now: Instant) {
        let expired = self.state.lock().presence.expire(now);
        for participant in expired {
            let _ = self.typing.send(TypingChange { participant, is_typing: false });
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.state.lock().presence.next_expiry()
    }
}

/// Application handle to a subscribed room. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    shared: Arc<RoomShared>,
    commands: mpsc::UnboundedSender<Command>,
    connection: watch::Receiver<ChannelState>,
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomHandle").field("room", &self.shared.room).finish_non_exhaustive()
    }
}

impl RoomHandle {
    pub(crate) fn new(
        shared: Arc<RoomShared>,
        commands: mpsc::UnboundedSender<Command>,
        connection: watch::Receiver<ChannelState>,
    ) -> Self {
        Self { shared, commands, connection }
    }

    /// Room this handle serves.
    pub fn room_id(&self) -> &RoomId {
        &self.shared.room
    }

    /// Snapshot of the timeline, oldest first.
    pub fn timeline(&self) -> Vec<Message> {
        self.shared.state.lock().timeline.messages().to_vec()
    }

    /// Presence of one participant.
    pub fn presence_of(&self, participant: &ParticipantId) -> Option<PresenceRecord> {
        self.shared.state.lock().presence.get(participant).cloned()
    }

    /// Messages inserted from now on, whatever their source.
    pub fn messages(&self) -> broadcast::Receiver<Message> {
        self.shared.messages.subscribe()
    }

    /// Presence changes from now on.
    pub fn presence_changes(&self) -> broadcast::Receiver<PresenceChange> {
        self.shared.presence.subscribe()
    }

    /// Typing changes from now on.
    pub fn typing_changes(&self) -> broadcast::Receiver<TypingChange> {
        self.shared.typing.subscribe()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ChannelState {
        *self.connection.borrow()
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.connection.clone()
    }

    /// Whether an older page exists.
    pub fn has_older(&self) -> bool {
        self.shared.state.lock().timeline.has_older()
    }

    /// Whether the room was unsubscribed or its session ended.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Replace the timeline with the newest page.
    ///
    /// # Errors
    ///
    /// - `ClientError::Request` if the fetch failed
    pub async fn load_initial(&self) -> Result<LoadOutcome, ClientError> {
        if self.is_closed() {
            return Ok(LoadOutcome::Discarded);
        }

        let page = tokio::select! {
            () = self.shared.cancel.cancelled() => return Ok(LoadOutcome::Discarded),
            page = fetch_page(&self.shared.coordinator, &self.shared.room, 1) => page?,
        };

        let mut state = self.shared.state.lock();
        if state.closed {
            return Ok(LoadOutcome::Discarded);
        }
        if let Some(summary) = &page.room {
            state.presence.seed(summary);
        }
        state.timeline.replace_initial(page);
        Ok(LoadOutcome::Loaded { added: state.timeline.len() })
    }

    /// Prepend the next older page.
    ///
    /// Concurrent calls share one fetch: all but the first return
    /// [`LoadOutcome::Skipped`]. Dropping the future mid-flight releases the
    /// claim so a later call can retry.
    ///
    /// # Errors
    ///
    /// - `ClientError::Request` if the fetch failed
    pub async fn load_older(&self) -> Result<LoadOutcome, ClientError> {
        let ticket = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Ok(LoadOutcome::Discarded);
            }
            match state.timeline.begin_older() {
                Some(ticket) => ticket,
                None => return Ok(LoadOutcome::Skipped),
            }
        };
        let guard = TicketGuard { state: &self.shared.state, ticket: Some(ticket) };

        let page = tokio::select! {
            () = self.shared.cancel.cancelled() => return Ok(LoadOutcome::Discarded),
            page = fetch_page(&self.shared.coordinator, &self.shared.room, ticket.page()) => page?,
        };
        guard.disarm();

        let mut state = self.shared.state.lock();
        if state.closed {
            return Ok(LoadOutcome::Discarded);
        }
        match state.timeline.apply_older(ticket, page) {
            Ok(added) => Ok(LoadOutcome::Loaded { added }),
            Err(StaleOperation) => {
                tracing::debug!(
                    room = %self.shared.room,
                    page = ticket.page(),
                    "discarding stale page"
                );
                Ok(LoadOutcome::Discarded)
            },
        }
    }

    /// Send a message and insert the stored copy.
    ///
    /// Ends the local typing burst.
    ///
    /// # Errors
    ///
    /// - `ClientError::Unsubscribed` if the room is closed
    /// - `ClientError::Request` if the call failed or the reply is malformed
    pub async fn send_message(&self, message: NewMessage) -> Result<Message, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Unsubscribed(self.shared.room.clone()));
        }

        let body = message.to_json().map_err(RequestError::from)?;
        let path = format!("/chat/rooms/{}/messages/", self.shared.room);
        let response = self.shared.coordinator.send(RequestEnvelope::post(path, body)).await?;
        let stored: Message = serde_json::from_value(response.body)
            .map_err(|e| RequestError::Decode(format!("message: {e}")))?;

        let _ = self.commands.send(Command::StopTyping);

        let inserted = {
            let mut state = self.shared.state.lock();
            !state.closed && state.timeline.push(stored.clone())
        };
        if inserted {
            let _ = self.shared.messages.send(stored.clone());
        }
        Ok(stored)
    }

    /// Register a keystroke for the typing indicator.
    ///
    /// # Errors
    ///
    /// - `ClientError::Unsubscribed` if the connection task is gone
    pub fn send_typing(&self) -> Result<(), ClientError> {
        self.command(Command::Keystroke)
    }

    /// End the typing burst now.
    ///
    /// # Errors
    ///
    /// - `ClientError::Unsubscribed` if the connection task is gone
    pub fn stop_typing(&self) -> Result<(), ClientError> {
        self.command(Command::StopTyping)
    }

    /// Mark one message read. The backend is told in the background; a failed
    /// call is logged and not retried. Returns `true` on an actual flip.
    pub fn mark_read(&self, id: &MessageId) -> bool {
        let flipped = {
            let mut state = self.shared.state.lock();
            !state.closed && state.timeline.mark_read(id)
        };
        if flipped {
            self.notify_read();
        }
        flipped
    }

    /// Mark every message from other participants read. Returns the number
    /// flipped.
    pub fn mark_all_read(&self) -> usize {
        let flipped = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return 0;
            }
            state.timeline.mark_incoming_read(&self.shared.subject)
        };
        if flipped > 0 {
            self.notify_read();
        }
        flipped
    }

    fn notify_read(&self) {
        let coordinator = Arc::clone(&self.shared.coordinator);
        let room = self.shared.room.clone();
        let path = format!("/chat/rooms/{room}/mark_read/");

        tokio::spawn(async move {
            if let Err(e) = coordinator.send(RequestEnvelope::post_empty(path)).await {
                tracing::debug!(room = %room, error = %e, "mark read not delivered");
            }
        });
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Unsubscribed(self.shared.room.clone()))
    }
}

/// Releases a `load_older` claim unless the page was applied.
struct TicketGuard<'a> {
    state: &'a Mutex<RoomState>,
    ticket: Option<LoadTicket>,
}

impl TicketGuard<'_> {
    fn disarm(mut self) {
        self.ticket = None;
    }
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.state.lock().timeline.abort_older(ticket);
        }
    }
}

async fn fetch_page(
    coordinator: &AuthCoordinator,
    room: &RoomId,
    page: u32,
) -> Result<MessagePage, RequestError> {
    let path = format!("/chat/rooms/{room}/messages/?page={page}");
    let response = coordinator.send(RequestEnvelope::get(path)).await?;
    Ok(MessagePage::from_json(&response.body)?)
}

//! Room timeline.
//!
//! Ordered, deduplicated message history for one room, newest last. History
//! pages and pushed messages both go through a sorted merge, so the order of
//! arrival never affects the result: the timeline is always the set of known
//! messages sorted by `(created_at, id)`.
//!
//! # Paging
//!
//! Page 1 is the newest page. [`Timeline::begin_older`] hands out a
//! [`LoadTicket`] for the next page; only one ticket is outstanding at a
//! time, and a ticket issued before [`Timeline::replace_initial`] or
//! [`Timeline::close`] is stale by the time it comes back.

use std::collections::HashSet;

use marquee_proto::{Message, MessageId, MessagePage, ParticipantId};

use crate::error::StaleOperation;

/// Claim on one in-flight `load_older` page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    page: u32,
    generation: u64,
}

impl LoadTicket {
    /// Page number to fetch.
    pub fn page(&self) -> u32 {
        self.page
    }
}

/// Ordered message history of one room.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    /// Ascending by `(created_at, id)`
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    /// Next older page, `None` once the oldest page is in
    next_page: Option<u32>,
    in_flight: Option<LoadTicket>,
    /// Bumped whenever outstanding tickets must be invalidated
    generation: u64,
}

impl Timeline {
    /// Empty timeline with no known history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the timeline is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Message by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        if !self.ids.contains(id) {
            return None;
        }
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Newest message.
    pub fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether an older page exists.
    pub fn has_older(&self) -> bool {
        self.next_page.is_some()
    }

    /// Whether a `load_older` fetch is outstanding.
    pub fn is_loading_older(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Replace the content with the newest page.
    ///
    /// Messages newer than everything on the page survive: they arrived
    /// while the page was in flight and the page cannot know them. Older
    /// content is dropped. Invalidates any outstanding ticket.
    pub fn replace_initial(&mut self, page: MessagePage) {
        self.generation += 1;
        self.in_flight = None;
        self.next_page = page.has_next().then_some(2);

        let newest_on_page = page.results.iter().map(Message::order_key).max();
        let kept = match newest_on_page {
            Some(newest) => self.messages.partition_point(|m| m.order_key() <= newest),
            None => 0,
        };
        self.messages.drain(..kept);
        self.ids = self.messages.iter().map(|m| m.id.clone()).collect();
        self.merge(page.results);
    }

    /// Claim the next older page. `None` if a fetch is already in flight or
    /// there is nothing older.
    pub fn begin_older(&mut self) -> Option<LoadTicket> {
        if self.in_flight.is_some() {
            return None;
        }
        let page = self.next_page?;
        let ticket = LoadTicket { page, generation: self.generation };
        self.in_flight = Some(ticket);
        Some(ticket)
    }

    /// Apply the page fetched for `ticket`. Returns the number of messages
    /// added.
    ///
    /// # Errors
    ///
    /// - `StaleOperation` if the ticket is not the outstanding one
    pub fn apply_older(
        &mut self,
        ticket: LoadTicket,
        page: MessagePage,
    ) -> Result<usize, StaleOperation> {
        if self.in_flight != Some(ticket) {
            return Err(StaleOperation);
        }
        self.in_flight = None;
        self.next_page = page.has_next().then_some(ticket.page + 1);
        Ok(self.merge(page.results))
    }

    /// Release `ticket` without applying anything (fetch failed or was
    /// abandoned). A stale ticket is ignored.
    pub fn abort_older(&mut self, ticket: LoadTicket) {
        if self.in_flight == Some(ticket) {
            self.in_flight = None;
        }
    }

    /// Insert a pushed message. Returns `false` if its id was already
    /// present, in which case the stored copy is kept as is.
    pub fn push(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        let at = self.messages.partition_point(|m| m.order_key() < message.order_key());
        self.messages.insert(at, message);
        true
    }

    /// Merge a freshly fetched newest page without touching paging state.
    /// Returns the number of messages added.
    pub fn merge_head(&mut self, page: MessagePage) -> usize {
        self.merge(page.results)
    }

    /// Flip one message to read. Returns `true` only on an actual flip.
    pub fn mark_read(&mut self, id: &MessageId) -> bool {
        if !self.ids.contains(id) {
            return false;
        }
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) if !message.is_read => {
                message.is_read = true;
                true
            },
            _ => false,
        }
    }

    /// Flip every message not authored by `me` to read. Returns the number
    /// flipped.
    pub fn mark_incoming_read(&mut self, me: &ParticipantId) -> usize {
        let mut flipped = 0;
        for message in self.messages.iter_mut().filter(|m| &m.sender.user_id != me && !m.is_read) {
            message.is_read = true;
            flipped += 1;
        }
        flipped
    }

    /// Drop all content and invalidate outstanding tickets.
    pub fn close(&mut self) {
        self.generation += 1;
        self.in_flight = None;
        self.next_page = None;
        self.messages.clear();
        self.ids.clear();
    }

    /// Merge an unordered batch. Duplicates, both against the timeline and
    /// within the batch, are dropped.
    fn merge(&mut self, batch: Vec<Message>) -> usize {
        let mut fresh: Vec<Message> =
            batch.into_iter().filter(|m| self.ids.insert(m.id.clone())).collect();
        if fresh.is_empty() {
            return 0;
        }
        fresh.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        let added = fresh.len();

        let existing = std::mem::take(&mut self.messages);
        let mut merged = Vec::with_capacity(existing.len() + added);
        let mut left = existing.into_iter().peekable();
        let mut right = fresh.into_iter().peekable();

        loop {
            let take_left = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => l.order_key() <= r.order_key(),
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_left { left.next() } else { right.next() };
            merged.extend(next);
        }

        self.messages = merged;
        added
    }
}

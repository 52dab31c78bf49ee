//! Per-user notification feed.

use std::collections::VecDeque;

use marquee_proto::{NotificationPayload, RoomId};

/// One entry in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Local sequence id, unique within the feed
    pub id: u64,
    /// Backend kind, e.g. `new_message`
    pub kind: String,
    /// Display text
    pub message: String,
    /// Related room
    pub room_id: Option<RoomId>,
    /// Related event
    pub event_id: Option<String>,
    /// Read flag
    pub read: bool,
}

/// Entries kept by a feed unless configured otherwise.
pub const DEFAULT_FEED_LIMIT: usize = 200;

/// Newest-first list of notifications with an unread counter.
///
/// Holds at most `limit` entries. Past the limit the oldest read entry is
/// evicted; when nothing is read the oldest entry goes.
#[derive(Debug, Clone)]
pub struct NotificationFeed {
    entries: VecDeque<Notification>,
    next_id: u64,
    unread: usize,
    limit: usize,
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::with_limit(DEFAULT_FEED_LIMIT)
    }
}

impl NotificationFeed {
    /// Empty feed with the default limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty feed holding at most `limit` entries (at least 1).
    pub fn with_limit(limit: usize) -> Self {
        Self { entries: VecDeque::new(), next_id: 0, unread: 0, limit: limit.max(1) }
    }

    /// Add an entry at the front and return it.
    pub fn push(&mut self, payload: NotificationPayload) -> Notification {
        self.next_id += 1;
        let entry = Notification {
            id: self.next_id,
            kind: payload.kind,
            message: payload.message,
            room_id: payload.room_id,
            event_id: payload.event_id,
            read: false,
        };
        self.entries.push_front(entry.clone());
        self.unread += 1;
        while self.entries.len() > self.limit {
            self.evict();
        }
        entry
    }

    fn evict(&mut self) {
        let evicted = match self.entries.iter().rposition(|n| n.read) {
            Some(oldest_read) => self.entries.remove(oldest_read),
            None => self.entries.pop_back(),
        };
        if evicted.is_some_and(|n| !n.read) {
            self.unread -= 1;
        }
    }

    /// Entries, newest first.
    pub fn entries(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the feed is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of unread entries.
    pub fn unread_count(&self) -> usize {
        self.unread
    }

    /// Flip one entry to read. Returns `true` only on an actual flip.
    pub fn mark_read(&mut self, id: u64) -> bool {
        match self.entries.iter_mut().find(|n| n.id == id) {
            Some(entry) if !entry.read => {
                entry.read = true;
                self.unread -= 1;
                true
            },
            _ => false,
        }
    }

    /// Flip every entry to read. Returns the number flipped.
    pub fn mark_all_read(&mut self) -> usize {
        let flipped = self.unread;
        self.entries.iter_mut().for_each(|n| n.read = true);
        self.unread = 0;
        flipped
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.unread = 0;
    }
}

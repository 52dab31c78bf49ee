//! Notification stream subscription.

use std::sync::Arc;

use marquee_core::{ChannelState, Notification, NotificationFeed};
use marquee_proto::InboundFrame;
use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelSink;

/// Feed shared by the notification connection task and its handles.
pub(crate) struct NotificationShared {
    feed: Mutex<NotificationFeed>,
    events: broadcast::Sender<Notification>,
    cancel: CancellationToken,
}

impl NotificationShared {
    pub(crate) fn new(capacity: usize, limit: usize, cancel: CancellationToken) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { feed: Mutex::new(NotificationFeed::with_limit(limit)), events, cancel }
    }

    pub(crate) fn close(&self) {
        self.feed.lock().clear();
        self.cancel.cancel();
    }
}

impl ChannelSink for NotificationShared {
    fn deliver(&self, frame: InboundFrame, _now: Instant) {
        let frame = match frame {
            InboundFrame::Notification(frame) => frame,
            other => {
                tracing::debug!(kind = other.kind(), "frame not handled by notifications");
                return;
            },
        };

        match (frame.notification, frame.message) {
            (Some(payload), _) => {
                let entry = self.feed.lock().push(payload);
                tracing::debug!(id = entry.id, kind = %entry.kind, "notification received");
                let _ = self.events.send(entry);
            },
            (None, Some(ack)) => tracing::debug!(%ack, "notification stream acknowledged"),
            (None, None) => tracing::debug!("empty notification frame"),
        }
    }
}

/// Application handle to the notification stream. Cheap to clone.
#[derive(Clone)]
pub struct NotificationsHandle {
    shared: Arc<NotificationShared>,
    connection: watch::Receiver<ChannelState>,
}

impl NotificationsHandle {
    pub(crate) fn new(
        shared: Arc<NotificationShared>,
        connection: watch::Receiver<ChannelState>,
    ) -> Self {
        Self { shared, connection }
    }

    /// Snapshot of the feed, newest first.
    pub fn entries(&self) -> Vec<Notification> {
        self.shared.feed.lock().entries().cloned().collect()
    }

    /// Number of unread entries.
    pub fn unread_count(&self) -> usize {
        self.shared.feed.lock().unread_count()
    }

    /// Flip one entry to read.
    pub fn mark_read(&self, id: u64) -> bool {
        self.shared.feed.lock().mark_read(id)
    }

    /// Flip every entry to read. Returns the number flipped.
    pub fn mark_all_read(&self) -> usize {
        self.shared.feed.lock().mark_all_read()
    }

    /// Entries received from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.shared.events.subscribe()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ChannelState {
        *self.connection.borrow()
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.connection.clone()
    }
}

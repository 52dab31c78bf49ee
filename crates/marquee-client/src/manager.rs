//! Realtime channel manager.
//!
//! Owns one connection task per subscribed topic. Subscribing spawns the
//! task and loads the newest history page; unsubscribing cancels the task's
//! token, which is the only thing that stops its reconnect loop. A
//! terminated session unsubscribes everything, synchronously, through a
//! session hook.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use marquee_core::{ChannelState, TerminationReason, TypingDebouncer};
use marquee_proto::{ParticipantId, RoomId};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    channel::ChannelDriver,
    config::ClientConfig,
    coordinator::AuthCoordinator,
    error::ClientError,
    notifications::{NotificationShared, NotificationsHandle},
    room::{RoomHandle, RoomShared},
    session::SessionHandle,
    transport::Dialer,
};

/// Topic name of the notification stream.
const NOTIFICATIONS_TOPIC: &str = "notifications";

struct RoomEntry {
    shared: Arc<RoomShared>,
    handle: RoomHandle,
}

struct NotificationsEntry {
    shared: Arc<NotificationShared>,
    handle: NotificationsHandle,
}

/// Per-topic connection registry.
pub struct ChannelManager {
    config: ClientConfig,
    dialer: Arc<dyn Dialer>,
    coordinator: Arc<AuthCoordinator>,
    session: Arc<SessionHandle>,
    rooms: Mutex<HashMap<RoomId, RoomEntry>>,
    notifications: Mutex<Option<NotificationsEntry>>,
}

impl ChannelManager {
    /// Manager that closes every connection when `session` terminates.
    pub fn new(
        config: ClientConfig,
        dialer: Arc<dyn Dialer>,
        coordinator: Arc<AuthCoordinator>,
        session: Arc<SessionHandle>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            config,
            dialer,
            coordinator,
            session: Arc::clone(&session),
            rooms: Mutex::new(HashMap::new()),
            notifications: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&manager);
        session.on_terminated(move |reason| {
            if let Some(manager) = weak.upgrade() {
                manager.close_all(reason);
            }
        });
        manager
    }

    /// Subscribe to `room` and load its newest page.
    ///
    /// Subscribing an already subscribed room returns the existing handle.
    ///
    /// # Errors
    ///
    /// - `ClientError::SessionInactive` if the session is not authenticated
    /// - `ClientError::Config` if the room URL cannot be built
    /// - `ClientError::Request` if the initial page fetch failed; the room is
    ///   unsubscribed again
    pub async fn subscribe_room(&self, room: RoomId) -> Result<RoomHandle, ClientError> {
        let subject = self.active_subject()?;
        if let Some(entry) = self.rooms.lock().get(&room) {
            return Ok(entry.handle.clone());
        }

        let url = self.config.room_url(&room)?;
        let cancel = CancellationToken::new();
        let shared = Arc::new(RoomShared::new(
            room.clone(),
            subject,
            Arc::clone(&self.coordinator),
            self.config.typing.remote_expiry,
            self.config.event_buffer,
            cancel.clone(),
        ));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let handle = RoomHandle::new(Arc::clone(&shared), commands_tx, state_rx);

        {
            let mut rooms = self.rooms.lock();
            if let Some(existing) = rooms.get(&room) {
                return Ok(existing.handle.clone());
            }
            rooms.insert(
                room.clone(),
                RoomEntry { shared: Arc::clone(&shared), handle: handle.clone() },
            );
        }

        let driver = ChannelDriver::new(
            room.as_str(),
            url,
            Arc::clone(&self.dialer),
            shared,
            commands_rx,
            cancel,
            self.config.channel.clone(),
            TypingDebouncer::new(self.config.typing.stop_after),
            state_tx,
        );
        tokio::spawn(driver.run());
        tracing::info!(room = %room, "room subscribed");

        if let Err(e) = handle.load_initial().await {
            tracing::warn!(room = %room, error = %e, "initial load failed");
            self.unsubscribe_room(&room);
            return Err(e);
        }
        Ok(handle)
    }

    /// Close `room`'s connection and discard its state. Returns `false` if
    /// it was not subscribed.
    pub fn unsubscribe_room(&self, room: &RoomId) -> bool {
        let Some(entry) = self.rooms.lock().remove(room) else {
            return false;
        };
        entry.shared.close();
        tracing::info!(room = %room, "room unsubscribed");
        true
    }

    /// Handle of a subscribed room.
    pub fn room(&self, room: &RoomId) -> Option<RoomHandle> {
        self.rooms.lock().get(room).map(|entry| entry.handle.clone())
    }

    /// Subscribed rooms.
    pub fn rooms(&self) -> Vec<RoomId> {
        self.rooms.lock().keys().cloned().collect()
    }

    /// Open the notification stream. Idempotent.
    ///
    /// # Errors
    ///
    /// - `ClientError::SessionInactive` if the session is not authenticated
    pub fn subscribe_notifications(&self) -> Result<NotificationsHandle, ClientError> {
        self.active_subject()?;

        let mut slot = self.notifications.lock();
        if let Some(entry) = slot.as_ref() {
            return Ok(entry.handle.clone());
        }

        let cancel = CancellationToken::new();
        let shared = Arc::new(NotificationShared::new(
            self.config.event_buffer,
            self.config.notification_limit,
            cancel.clone(),
        ));
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let handle = NotificationsHandle::new(Arc::clone(&shared), state_rx);

        // Nothing is sent on this stream
        let (_, commands_rx) = mpsc::unbounded_channel();
        let driver = ChannelDriver::new(
            NOTIFICATIONS_TOPIC,
            self.config.notifications_ws_url.clone(),
            Arc::clone(&self.dialer),
            Arc::clone(&shared),
            commands_rx,
            cancel,
            self.config.channel.clone(),
            TypingDebouncer::new(self.config.typing.stop_after),
            state_tx,
        );
        tokio::spawn(driver.run());
        tracing::info!("notification stream subscribed");

        *slot = Some(NotificationsEntry { shared, handle: handle.clone() });
        Ok(handle)
    }

    /// Close every connection.
    pub fn close_all(&self, reason: &TerminationReason) {
        let rooms: Vec<(RoomId, RoomEntry)> = self.rooms.lock().drain().collect();
        let notifications = self.notifications.lock().take();

        tracing::info!(%reason, rooms = rooms.len(), "closing all channels");
        for (_, entry) in rooms {
            entry.shared.close();
        }
        if let Some(entry) = notifications {
            entry.shared.close();
        }
    }

    fn active_subject(&self) -> Result<ParticipantId, ClientError> {
        if !self.session.is_authenticated() {
            return Err(ClientError::SessionInactive);
        }
        self.session.subject().ok_or(ClientError::SessionInactive)
    }
}

//! Client configuration.

use marquee_core::{ChannelConfig, DEFAULT_FEED_LIMIT, TypingConfig};
use marquee_proto::RoomId;
use url::Url;

use crate::error::ClientError;

/// Refresh endpoint of the backend.
pub const DEFAULT_REFRESH_PATH: &str = "/users/refresh_token/";

/// Capacity of each per-room broadcast channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST API base, e.g. `https://api.example.com/api`
    pub api_base: Url,
    /// Chat socket base; a room's URL is `<chat_ws_base>/<room>/`
    pub chat_ws_base: Url,
    /// Notification socket URL
    pub notifications_ws_url: Url,
    /// Path of the refresh endpoint, relative to `api_base`
    pub refresh_path: String,
    /// Connection lifecycle settings
    pub channel: ChannelConfig,
    /// Typing debounce settings
    pub typing: TypingConfig,
    /// Broadcast channel capacity per room. Zero is treated as 1.
    pub event_buffer: usize,
    /// Notifications kept in the feed
    pub notification_limit: usize,
}

impl ClientConfig {
    /// Configuration with default timings.
    ///
    /// # Errors
    ///
    /// - `ClientError::Config` if any URL does not parse
    pub fn new(
        api_base: &str,
        chat_ws_base: &str,
        notifications_ws_url: &str,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            api_base: parse(api_base)?,
            chat_ws_base: parse(chat_ws_base)?,
            notifications_ws_url: parse(notifications_ws_url)?,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            channel: ChannelConfig::default(),
            typing: TypingConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            notification_limit: DEFAULT_FEED_LIMIT,
        })
    }

    /// Override the refresh endpoint.
    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Override connection settings.
    #[must_use]
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// Override typing settings.
    #[must_use]
    pub fn with_typing(mut self, typing: TypingConfig) -> Self {
        self.typing = typing;
        self
    }

    /// Override the broadcast capacity (at least 1).
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Override how many notifications the feed keeps (at least 1).
    #[must_use]
    pub fn with_notification_limit(mut self, limit: usize) -> Self {
        self.notification_limit = limit.max(1);
        self
    }

    /// Socket URL of `room`.
    ///
    /// # Errors
    ///
    /// - `ClientError::Config` if the joined URL does not parse
    pub fn room_url(&self, room: &RoomId) -> Result<Url, ClientError> {
        parse(&format!("{}/{}/", self.chat_ws_base.as_str().trim_end_matches('/'), room))
    }
}

fn parse(raw: &str) -> Result<Url, ClientError> {
    Url::parse(raw).map_err(|e| ClientError::Config(format!("invalid url '{raw}': {e}")))
}

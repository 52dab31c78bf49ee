//! Client facade.

use std::sync::Arc;

use marquee_core::TerminationReason;
use marquee_proto::{ParticipantId, RequestEnvelope, RoomId};
use reqwest::cookie::Jar;

use crate::{
    config::ClientConfig,
    coordinator::AuthCoordinator,
    error::ClientError,
    http::{HttpResponse, HttpTransport, ReqwestTransport},
    manager::ChannelManager,
    notifications::NotificationsHandle,
    room::RoomHandle,
    session::SessionHandle,
    transport::{Dialer, WsDialer},
};

/// Resilient communication layer of one signed-in user.
///
/// Owns the session, the auth coordinator and the channel manager. There is
/// no global instance; dropping the client drops its connections once every
/// handle is gone.
pub struct MarqueeClient {
    session: Arc<SessionHandle>,
    coordinator: Arc<AuthCoordinator>,
    manager: Arc<ChannelManager>,
    jar: Option<Arc<Jar>>,
}

impl MarqueeClient {
    /// Client over explicit transports.
    pub fn new(
        config: ClientConfig,
        http: Arc<dyn HttpTransport>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let session = SessionHandle::new();
        let coordinator =
            Arc::new(AuthCoordinator::new(http, Arc::clone(&session), config.refresh_path.clone()));
        let manager =
            ChannelManager::new(config, dialer, Arc::clone(&coordinator), Arc::clone(&session));
        Self { session, coordinator, manager, jar: None }
    }

    /// Client over `reqwest` and `tokio-tungstenite`, sharing one cookie jar.
    ///
    /// # Errors
    ///
    /// - `ClientError::Config` if the HTTP client cannot be built
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let jar = Arc::new(Jar::default());
        let http = ReqwestTransport::with_jar(config.api_base.clone(), Arc::clone(&jar))
            .map_err(|e| ClientError::Config(e.to_string()))?;
        let dialer = WsDialer::with_jar(Arc::clone(&jar));

        let mut client = Self::new(config, Arc::new(http), Arc::new(dialer));
        client.jar = Some(jar);
        Ok(client)
    }

    /// Cookie jar holding the credential, for clients built by
    /// [`connect`](Self::connect).
    pub fn cookie_jar(&self) -> Option<Arc<Jar>> {
        self.jar.clone()
    }

    /// Record a login performed by the credential flow.
    pub fn login(&self, subject: ParticipantId) {
        self.session.login(subject);
    }

    /// Sign out: terminate the session and close every connection.
    pub fn logout(&self) -> bool {
        self.session.terminate(TerminationReason::Logout)
    }

    /// Send a REST call through the auth coordinator.
    ///
    /// # Errors
    ///
    /// - `ClientError::Request` with the coordinator's failure
    pub async fn send_request(
        &self,
        envelope: RequestEnvelope,
    ) -> Result<HttpResponse, ClientError> {
        Ok(self.coordinator.send(envelope).await?)
    }

    /// Subscribe to a room. See [`ChannelManager::subscribe_room`].
    ///
    /// # Errors
    ///
    /// - `ClientError::SessionInactive` if not signed in
    /// - `ClientError::Request` if the initial page fetch failed
    pub async fn subscribe_room(&self, room: RoomId) -> Result<RoomHandle, ClientError> {
        self.manager.subscribe_room(room).await
    }

    /// Unsubscribe from a room.
    pub fn unsubscribe_room(&self, room: &RoomId) -> bool {
        self.manager.unsubscribe_room(room)
    }

    /// Open the notification stream.
    ///
    /// # Errors
    ///
    /// - `ClientError::SessionInactive` if not signed in
    pub fn subscribe_notifications(&self) -> Result<NotificationsHandle, ClientError> {
        self.manager.subscribe_notifications()
    }

    /// Register a callback for session termination.
    pub fn on_session_terminated(
        &self,
        callback: impl Fn(&TerminationReason) + Send + Sync + 'static,
    ) {
        self.session.on_terminated(callback);
    }

    /// Whether the session is authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Shared session.
    pub fn session(&self) -> &Arc<SessionHandle> {
        &self.session
    }

    /// Auth coordinator.
    pub fn coordinator(&self) -> &Arc<AuthCoordinator> {
        &self.coordinator
    }

    /// Channel manager.
    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.manager
    }
}

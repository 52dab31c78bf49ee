//! Session authentication coordinator.
//!
//! Wraps every REST call. A 401 on a fresh envelope triggers one shared
//! refresh; the request then replays exactly once. All decisions come from
//! [`Verdict::classify`] and [`RefreshGate`]; this module only performs the
//! I/O around them.

use std::sync::Arc;

use marquee_core::{RefreshGate, Role, TerminationReason, Verdict};
use marquee_proto::RequestEnvelope;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
    error::RequestError,
    http::{HttpResponse, HttpTransport},
    session::SessionHandle,
};

type Waiter = oneshot::Sender<Result<(), RequestError>>;

enum Turn {
    Lead,
    Wait(oneshot::Receiver<Result<(), RequestError>>),
    /// Refresh settled between `enter` and `park`
    Replay,
}

/// Single-flight refresh wrapper around an [`HttpTransport`].
pub struct AuthCoordinator {
    transport: Arc<dyn HttpTransport>,
    session: Arc<SessionHandle>,
    gate: Mutex<RefreshGate<Waiter>>,
    refresh_path: String,
}

impl AuthCoordinator {
    /// Coordinator refreshing through `refresh_path`.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<SessionHandle>,
        refresh_path: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            session,
            gate: Mutex::new(RefreshGate::new()),
            refresh_path: refresh_path.into(),
        }
    }

    /// Send `envelope`, recovering from one expired credential.
    ///
    /// # Errors
    ///
    /// - `RequestError::Transport` if the transport failed
    /// - `RequestError::Status` for any non-2xx that is not an authorization
    ///   failure, and for a revoking 403 (after the session is terminated)
    /// - `RequestError::AuthorizationExpired` if the replay was rejected too,
    ///   or the refresh endpoint itself answered 401
    /// - `RequestError::RefreshFailed` if the shared refresh failed
    pub async fn send(&self, envelope: RequestEnvelope) -> Result<HttpResponse, RequestError> {
        let response = self.transport.send(&envelope).await?;
        let verdict = self.classify(&envelope, &response);

        if verdict != Verdict::RefreshAndReplay {
            return self.finish(verdict, response);
        }

        let Some(replay) = envelope.into_retry() else {
            return Err(RequestError::AuthorizationExpired);
        };
        self.await_refresh().await?;

        tracing::debug!(path = replay.route(), "replaying after refresh");
        let response = self.transport.send(&replay).await?;
        let verdict = self.classify(&replay, &response);
        self.finish(verdict, response)
    }

    /// Refresh calls issued so far.
    pub fn refreshes_issued(&self) -> u64 {
        self.gate.lock().refreshes_issued()
    }

    /// Whether a refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.gate.lock().is_in_flight()
    }

    /// Session this coordinator terminates.
    pub fn session(&self) -> &Arc<SessionHandle> {
        &self.session
    }

    fn classify(&self, envelope: &RequestEnvelope, response: &HttpResponse) -> Verdict {
        let route =
            self.refresh_path.split_once('?').map_or(self.refresh_path.as_str(), |(r, _)| r);
        Verdict::classify(envelope, response.status, response.detail(), route)
    }

    fn finish(
        &self,
        verdict: Verdict,
        response: HttpResponse,
    ) -> Result<HttpResponse, RequestError> {
        match verdict {
            Verdict::Deliver if response.is_success() => Ok(response),
            Verdict::Deliver => Err(status_error(response)),
            Verdict::Propagate | Verdict::RefreshAndReplay => {
                Err(RequestError::AuthorizationExpired)
            },
            Verdict::Terminate(reason) => {
                let revoked = matches!(reason, TerminationReason::Revoked { .. });
                self.session.terminate(reason);
                if revoked {
                    Err(status_error(response))
                } else {
                    Err(RequestError::AuthorizationExpired)
                }
            },
        }
    }

    async fn await_refresh(&self) -> Result<(), RequestError> {
        let turn = {
            let mut gate = self.gate.lock();
            match gate.enter() {
                Role::Leader => Turn::Lead,
                Role::Follower => {
                    let (tx, rx) = oneshot::channel();
                    match gate.park(tx) {
                        Ok(()) => Turn::Wait(rx),
                        Err(_) => Turn::Replay,
                    }
                },
            }
        };

        match turn {
            Turn::Replay => Ok(()),
            Turn::Wait(rx) => rx.await.unwrap_or_else(|_| {
                Err(RequestError::RefreshFailed("refresh abandoned".to_string()))
            }),
            Turn::Lead => self.lead_refresh().await,
        }
    }

    async fn lead_refresh(&self) -> Result<(), RequestError> {
        let guard = SettleGuard { gate: &self.gate, armed: true };
        let outcome = self.refresh().await;
        guard.disarm();

        let result = match &outcome {
            Ok(()) => Ok(()),
            Err(failure) => Err(failure.error.clone()),
        };
        let waiters = self.gate.lock().settle();
        tracing::debug!(waiters = waiters.len(), ok = result.is_ok(), "refresh settled");
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }

        if let Err(failure) = outcome {
            self.session.terminate(failure.reason);
        }
        result
    }

    async fn refresh(&self) -> Result<(), RefreshFailure> {
        tracing::info!(path = %self.refresh_path, "refreshing session");

        let envelope = RequestEnvelope::post_empty(self.refresh_path.clone());
        match self.transport.send(&envelope).await {
            Ok(response) if response.is_success() => {
                tracing::info!("session refreshed");
                Ok(())
            },
            Ok(response) => {
                tracing::warn!(status = response.status, "session refresh rejected");
                let reason = match self.classify(&envelope, &response) {
                    Verdict::Terminate(reason) => reason,
                    _ => TerminationReason::RefreshFailed,
                };
                Err(RefreshFailure {
                    error: RequestError::RefreshFailed(format!("status {}", response.status)),
                    reason,
                })
            },
            Err(e) => {
                tracing::warn!(error = %e, "session refresh failed");
                Err(RefreshFailure {
                    error: RequestError::RefreshFailed(e.to_string()),
                    reason: TerminationReason::RefreshFailed,
                })
            },
        }
    }
}

struct RefreshFailure {
    error: RequestError,
    reason: TerminationReason,
}

/// Settles the gate if the leading future is dropped mid-refresh.
struct SettleGuard<'a> {
    gate: &'a Mutex<RefreshGate<Waiter>>,
    armed: bool,
}

impl SettleGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiters = self.gate.lock().settle();
        tracing::warn!(waiters = waiters.len(), "refresh abandoned by its leader");
        for waiter in waiters {
            let _ = waiter.send(Err(RequestError::RefreshFailed("refresh abandoned".to_string())));
        }
    }
}

fn status_error(response: HttpResponse) -> RequestError {
    RequestError::Status {
        status: response.status,
        detail: response.detail().map(str::to_string),
        body: response.body,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use marquee_proto::ParticipantId;
    use serde_json::{Value, json};

    use super::*;
    use crate::error::TransportError;

    /// Answers with a fixed script, recording every path.
    struct Scripted {
        replies: Mutex<VecDeque<HttpResponse>>,
        log: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: impl IntoIterator<Item = HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                log: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for Scripted {
        async fn send(&self, envelope: &RequestEnvelope) -> Result<HttpResponse, TransportError> {
            self.log.lock().push(envelope.path().to_string());
            self.replies.lock().pop_front().ok_or(TransportError::Closed)
        }
    }

    fn coordinator(transport: Arc<Scripted>) -> AuthCoordinator {
        let session = SessionHandle::new();
        session.login(ParticipantId::new("1"));
        AuthCoordinator::new(transport, session, "/users/refresh_token/")
    }

    #[tokio::test]
    async fn expired_credential_refreshes_and_replays() {
        let transport = Scripted::new([
            HttpResponse::new(401, Value::Null),
            HttpResponse::new(200, Value::Null),
            HttpResponse::new(200, json!({ "ok": true })),
        ]);
        let coordinator = coordinator(Arc::clone(&transport));

        let response = coordinator.send(RequestEnvelope::get("/events/")).await.unwrap();
        assert_eq!(response.body, json!({ "ok": true }));
        assert_eq!(*transport.log.lock(), vec!["/events/", "/users/refresh_token/", "/events/"]);
        assert_eq!(coordinator.refreshes_issued(), 1);
    }

    #[tokio::test]
    async fn server_error_is_not_an_auth_failure() {
        let transport = Scripted::new([HttpResponse::new(500, json!({ "detail": "boom" }))]);
        let coordinator = coordinator(Arc::clone(&transport));

        let err = coordinator.send(RequestEnvelope::get("/events/")).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(coordinator.refreshes_issued(), 0);
        assert!(coordinator.session().is_authenticated());
    }

    #[tokio::test]
    async fn failed_refresh_terminates_session() {
        let transport = Scripted::new([
            HttpResponse::new(401, Value::Null),
            HttpResponse::new(500, Value::Null),
        ]);
        let coordinator = coordinator(Arc::clone(&transport));

        let err = coordinator.send(RequestEnvelope::get("/events/")).await.unwrap_err();
        assert!(matches!(err, RequestError::RefreshFailed(_)));
        assert!(!coordinator.session().is_authenticated());
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn revoking_forbidden_terminates_and_propagates() {
        let transport =
            Scripted::new([HttpResponse::new(403, json!({ "detail": "User is blocked." }))]);
        let coordinator = coordinator(Arc::clone(&transport));

        let err = coordinator.send(RequestEnvelope::get("/events/")).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert!(!coordinator.session().is_authenticated());
        assert_eq!(coordinator.refreshes_issued(), 0);
    }
}

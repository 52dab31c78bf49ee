//! Shared session handle.

use std::sync::Arc;

use marquee_core::{Session, TerminationReason};
use marquee_proto::ParticipantId;
use parking_lot::Mutex;
use tokio::sync::watch;

type TerminationHook = Arc<dyn Fn(&TerminationReason) + Send + Sync>;

/// Process-wide session, shared by the coordinator and the channel manager.
///
/// Termination runs every registered hook synchronously, before
/// [`terminate`](Self::terminate) returns. The channel manager relies on this
/// to close all connections in the same step that clears the session.
pub struct SessionHandle {
    state: watch::Sender<Session>,
    hooks: Mutex<Vec<TerminationHook>>,
}

impl SessionHandle {
    /// Signed-out session.
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(Session::new());
        Arc::new(Self { state, hooks: Mutex::new(Vec::new()) })
    }

    /// Record a successful login performed elsewhere.
    pub fn login(&self, subject: ParticipantId) {
        tracing::info!(subject = %subject, "session started");
        self.state.send_modify(|session| session.login(subject));
    }

    /// Clear the session and run termination hooks. Returns `false` if the
    /// session was already inactive, in which case nothing runs.
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        let mut ended = false;
        self.state.send_if_modified(|session| {
            ended = session.terminate();
            ended
        });
        if !ended {
            return false;
        }

        tracing::warn!(%reason, "session terminated");

        // Hook list is copied so a hook may register another without deadlock
        let hooks: Vec<TerminationHook> = self.hooks.lock().clone();
        for hook in hooks {
            hook(&reason);
        }
        true
    }

    /// Register a hook that runs on every termination.
    pub fn on_terminated(&self, hook: impl Fn(&TerminationReason) + Send + Sync + 'static) {
        self.hooks.lock().push(Arc::new(hook));
    }

    /// Whether the session is authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    /// Signed-in participant, if authenticated.
    pub fn subject(&self) -> Option<ParticipantId> {
        self.state.borrow().subject().cloned()
    }

    /// Watch session changes.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }
}

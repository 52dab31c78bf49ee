//! Authentication session state.
//!
//! The credential itself never passes through here: it lives in the
//! transport's cookie store. The session only records whether the client
//! believes it is signed in, and as whom.

use std::fmt;

use marquee_proto::ParticipantId;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The refresh call failed (non-2xx or transport failure).
    RefreshFailed,
    /// The refresh endpoint itself answered 401.
    RefreshRejected,
    /// The backend revoked the session (blocked user, blacklisted token).
    Revoked {
        /// Backend `detail` message
        detail: String,
    },
    /// The user signed out.
    Logout,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RefreshFailed => f.write_str("refresh failed"),
            Self::RefreshRejected => f.write_str("refresh rejected"),
            Self::Revoked { detail } => write!(f, "revoked: {detail}"),
            Self::Logout => f.write_str("logout"),
        }
    }
}

/// Process-wide authentication state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    authenticated: bool,
    subject: Option<ParticipantId>,
}

impl Session {
    /// Signed-out session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful external login.
    pub fn login(&mut self, subject: ParticipantId) {
        self.authenticated = true;
        self.subject = Some(subject);
    }

    /// Clear the session. Returns `true` only if it was authenticated, so
    /// termination side effects run once.
    pub fn terminate(&mut self) -> bool {
        let was = self.authenticated;
        self.authenticated = false;
        self.subject = None;
        was
    }

    /// Whether the client is signed in.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Signed-in participant.
    pub fn subject(&self) -> Option<&ParticipantId> {
        self.subject.as_ref()
    }
}

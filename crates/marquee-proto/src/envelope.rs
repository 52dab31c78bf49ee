//! Request envelopes.
//!
//! A [`RequestEnvelope`] describes one outbound REST call. Envelopes are
//! immutable values: the only transition is [`RequestEnvelope::into_retry`],
//! which produces the replay copy exactly once.

use std::fmt;

use serde_json::Value;

/// HTTP method of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Upper-case method name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound REST call.
///
/// # Invariants
///
/// - `retried` goes from `false` to `true` at most once. An envelope that has
///   already been replayed yields `None` from [`RequestEnvelope::into_retry`],
///   which is how the coordinator guarantees there is never a second replay.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    method: Method,
    path: String,
    body: Option<Value>,
    retried: bool,
}

impl RequestEnvelope {
    /// Envelope with an explicit method and no payload.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, retried: false }
    }

    /// GET envelope.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// POST envelope carrying a JSON payload.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    /// POST envelope without a payload.
    pub fn post_empty(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Attach a JSON payload.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Target path relative to the API base, including any query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path without its query string.
    pub fn route(&self) -> &str {
        self.path.split_once('?').map_or(self.path.as_str(), |(route, _)| route)
    }

    /// JSON payload. `None` for bodiless calls.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Whether this envelope is already a replay.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Replay copy of this envelope. `None` if it was already replayed.
    #[must_use]
    pub fn into_retry(self) -> Option<Self> {
        if self.retried {
            return None;
        }
        Some(Self { retried: true, ..self })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn retry_is_granted_once() {
        let env = RequestEnvelope::post("/bookings/", json!({ "seats": 2 }));
        let replay = env.clone().into_retry().unwrap();

        assert!(replay.is_retried());
        assert_eq!(replay.body(), env.body());
        assert_eq!(replay.path(), env.path());
        assert!(replay.into_retry().is_none());
    }

    #[test]
    fn route_strips_query() {
        let env = RequestEnvelope::get("/chat/rooms/abc/messages/?page=2");
        assert_eq!(env.route(), "/chat/rooms/abc/messages/");
        assert_eq!(RequestEnvelope::get("/users/me/").route(), "/users/me/");
    }
}

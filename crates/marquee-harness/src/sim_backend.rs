//! In-memory backend.
//!
//! [`SimBackend`] implements both [`HttpTransport`] and [`Dialer`], so one
//! instance stands in for the REST API and the realtime gateway. Tests steer
//! it directly: expire the credential, choose how the refresh endpoint
//! answers, push frames into open sockets, drop connections.
//!
//! Delays are `tokio::time::sleep`s, so with a paused clock every scenario is
//! deterministic.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_client::{
    ChannelLink, ClientConfig, ClientError, Dialer, HttpResponse, HttpTransport, MarqueeClient,
    TransportError, config::DEFAULT_REFRESH_PATH,
};
use marquee_core::ChannelConfig;
use marquee_proto::{
    Message, MessageId, MessageKind, Method, ParticipantId, RequestEnvelope, RoomId, Sender,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use url::Url;

/// REST base the simulated client is configured with.
pub const SIM_API_BASE: &str = "http://sim.local/api";

/// Chat socket base.
pub const SIM_CHAT_WS_BASE: &str = "ws://sim.local/ws/chat/";

/// Notification socket URL.
pub const SIM_NOTIFICATIONS_WS: &str = "ws://sim.local/ws/notifications/";

/// Socket path of the notification stream.
pub const NOTIFICATIONS_TOPIC: &str = "/ws/notifications/";

/// Messages per history page.
pub const PAGE_SIZE: usize = 15;

const SOCKET_CAPACITY: usize = 256;
const BASE_TIMESTAMP: i64 = 1_700_000_000;

/// How the refresh endpoint answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshMode {
    /// 200 and the credential becomes valid
    #[default]
    Accept,
    /// 200 but the credential stays expired
    AcceptStale,
    /// 401
    Reject,
    /// 500
    Fail,
}

/// One REST call as the backend saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// HTTP method
    pub method: Method,
    /// Path including query
    pub path: String,
    /// JSON payload
    pub body: Option<Value>,
    /// Whether the client marked it as a replay
    pub retried: bool,
}

impl RecordedCall {
    /// Path without its query string.
    pub fn route(&self) -> &str {
        self.path.split_once('?').map_or(self.path.as_str(), |(route, _)| route)
    }
}

struct ServerEnd {
    to_client: mpsc::Sender<String>,
    from_client: mpsc::Receiver<String>,
}

struct BackendState {
    me: ParticipantId,
    credential_valid: bool,
    refresh_mode: RefreshMode,
    refresh_delay: Duration,
    page_delay: Duration,
    histories: HashMap<RoomId, Vec<Message>>,
    counterparts: HashMap<RoomId, Value>,
    scripted: HashMap<String, VecDeque<HttpResponse>>,
    calls: Vec<RecordedCall>,
    sockets: HashMap<String, Vec<ServerEnd>>,
    dials: HashMap<String, u32>,
    accepting: bool,
    next_seq: i64,
}

/// Simulated REST API plus realtime gateway.
pub struct SimBackend {
    state: Mutex<BackendState>,
}

impl SimBackend {
    /// Backend whose signed-in user is `me`, with a valid credential.
    pub fn new(me: ParticipantId) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BackendState {
                me,
                credential_valid: true,
                refresh_mode: RefreshMode::Accept,
                refresh_delay: Duration::ZERO,
                page_delay: Duration::ZERO,
                histories: HashMap::new(),
                counterparts: HashMap::new(),
                scripted: HashMap::new(),
                calls: Vec::new(),
                sockets: HashMap::new(),
                dials: HashMap::new(),
                accepting: true,
                next_seq: 0,
            }),
        })
    }

    /// Client configuration pointing at this backend. Heartbeats and idle
    /// detection are off; tests that need them set them explicitly.
    pub fn config() -> Result<ClientConfig, ClientError> {
        let channel = ChannelConfig {
            heartbeat_interval: None,
            idle_timeout: None,
            ..ChannelConfig::default()
        };
        Ok(ClientConfig::new(SIM_API_BASE, SIM_CHAT_WS_BASE, SIM_NOTIFICATIONS_WS)?
            .with_channel(channel))
    }

    /// Client over this backend, signed in as the backend's user.
    pub fn client(self: &Arc<Self>, config: ClientConfig) -> MarqueeClient {
        let http: Arc<dyn HttpTransport> = Arc::clone(self) as Arc<dyn HttpTransport>;
        let dialer: Arc<dyn Dialer> = Arc::clone(self) as Arc<dyn Dialer>;
        let client = MarqueeClient::new(config, http, dialer);
        client.login(self.me());
        client
    }

    /// Socket path of `room`.
    pub fn room_topic(room: &RoomId) -> String {
        format!("/ws/chat/{room}/")
    }

    /// The signed-in user.
    pub fn me(&self) -> ParticipantId {
        self.state.lock().me.clone()
    }

    /// Make every following REST call answer 401 until a refresh succeeds.
    pub fn expire_credential(&self) {
        self.state.lock().credential_valid = false;
    }

    /// Whether the credential is currently accepted.
    pub fn is_credential_valid(&self) -> bool {
        self.state.lock().credential_valid
    }

    /// Choose how the refresh endpoint answers.
    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        self.state.lock().refresh_mode = mode;
    }

    /// Delay every refresh answer.
    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state.lock().refresh_delay = delay;
    }

    /// Delay every history page answer.
    pub fn set_page_delay(&self, delay: Duration) {
        self.state.lock().page_delay = delay;
    }

    /// Answer the next call to `route` with `response`, whatever the state.
    pub fn respond_once(&self, route: &str, response: HttpResponse) {
        self.state.lock().scripted.entry(route.to_string()).or_default().push_back(response);
    }

    /// Whether the gateway accepts new connections.
    pub fn set_accepting(&self, accepting: bool) {
        self.state.lock().accepting = accepting;
    }

    /// Report the counterpart of `room` on its first history page.
    pub fn set_counterpart(&self, room: &RoomId, participant: &ParticipantId, online: bool) {
        let block = json!({
            "other_participant": { "user_id": participant.as_str() },
            "other_participant_online_status": {
                "is_online": online,
                "status_text": if online { "online" } else { "offline" },
            },
        });
        self.state.lock().counterparts.insert(room.clone(), block);
    }

    /// Append `count` messages by `author` to the history of `room`.
    pub fn seed_history(
        &self,
        room: &RoomId,
        author: &ParticipantId,
        count: usize,
    ) -> Vec<Message> {
        let mut state = self.state.lock();
        (0..count)
            .map(|i| state.append(room, author.clone(), format!("history {i}"), MessageKind::Text))
            .collect()
    }

    /// Store a message without pushing it to anyone.
    pub fn create_message(&self, room: &RoomId, author: &ParticipantId, content: &str) -> Message {
        self.state.lock().append(room, author.clone(), content.to_string(), MessageKind::Text)
    }

    /// Store a message and push it to every open socket of `room`.
    pub fn push_message(&self, room: &RoomId, author: &ParticipantId, content: &str) -> Message {
        let mut state = self.state.lock();
        let message = state.append(room, author.clone(), content.to_string(), MessageKind::Text);
        state.broadcast(&Self::room_topic(room), &message_frame(&message));
        message
    }

    /// Push a typing frame into `room`.
    pub fn push_typing(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
        is_typing: bool,
    ) -> usize {
        let frame =
            json!({ "type": "typing", "user_id": participant.as_str(), "is_typing": is_typing });
        self.push_frame(&Self::room_topic(room), &frame.to_string())
    }

    /// Push a status frame into `room`.
    pub fn push_status(&self, room: &RoomId, participant: &ParticipantId, online: bool) -> usize {
        let frame = json!({
            "type": "participant_status",
            "user_id": participant.as_str(),
            "is_online": online,
            "status_text": if online { "online" } else { "offline" },
        });
        self.push_frame(&Self::room_topic(room), &frame.to_string())
    }

    /// Push a notification to the notification stream.
    pub fn push_notification(&self, kind: &str, text: &str) -> usize {
        let frame =
            json!({ "type": "notification", "notification": { "type": kind, "message": text } });
        self.push_frame(NOTIFICATIONS_TOPIC, &frame.to_string())
    }

    /// Push raw text to every open socket of `topic`. Returns how many
    /// sockets received it.
    pub fn push_frame(&self, topic: &str, text: &str) -> usize {
        self.state.lock().broadcast(topic, text)
    }

    /// Server-side history of `room`, oldest first.
    pub fn history(&self, room: &RoomId) -> Vec<Message> {
        self.state.lock().histories.get(room).cloned().unwrap_or_default()
    }

    /// Every REST call so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls to `route` (path without query).
    pub fn calls_to(&self, route: &str) -> usize {
        self.state.lock().calls.iter().filter(|call| call.route() == route).count()
    }

    /// Number of refresh calls.
    pub fn refresh_calls(&self) -> usize {
        self.calls_to(DEFAULT_REFRESH_PATH)
    }

    /// Close every open socket of `topic`, as a network drop would.
    pub fn drop_connections(&self, topic: &str) -> usize {
        self.state.lock().sockets.remove(topic).map_or(0, |ends| ends.len())
    }

    /// Dial attempts on `topic`.
    pub fn dial_count(&self, topic: &str) -> u32 {
        self.state.lock().dials.get(topic).copied().unwrap_or(0)
    }

    /// Sockets of `topic` whose client end is still alive.
    pub fn open_connections(&self, topic: &str) -> usize {
        let mut state = self.state.lock();
        let Some(ends) = state.sockets.get_mut(topic) else {
            return 0;
        };
        ends.retain(|end| !end.to_client.is_closed());
        ends.len()
    }

    /// Drain what clients sent on `topic`.
    pub fn take_client_frames(&self, topic: &str) -> Vec<String> {
        let mut state = self.state.lock();
        let Some(ends) = state.sockets.get_mut(topic) else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        for end in ends.iter_mut() {
            while let Ok(text) = end.from_client.try_recv() {
                frames.push(text);
            }
        }
        frames
    }
}

impl BackendState {
    fn append(
        &mut self,
        room: &RoomId,
        sender: ParticipantId,
        content: String,
        kind: MessageKind,
    ) -> Message {
        self.next_seq += 1;
        let message = Message {
            id: MessageId::new(format!("m{:04}", self.next_seq)),
            sender: Sender { user_id: sender, full_name: None },
            kind,
            content,
            media_url: None,
            media_filename: None,
            created_at: timestamp(self.next_seq),
            is_read: false,
        };
        self.histories.entry(room.clone()).or_default().push(message.clone());
        message
    }

    fn broadcast(&mut self, topic: &str, text: &str) -> usize {
        let Some(ends) = self.sockets.get_mut(topic) else {
            return 0;
        };
        ends.retain(|end| !end.to_client.is_closed());
        ends.iter().filter(|end| end.to_client.try_send(text.to_string()).is_ok()).count()
    }

    fn respond(&mut self, envelope: &RequestEnvelope) -> HttpResponse {
        let route = envelope.route();
        if route == DEFAULT_REFRESH_PATH {
            return self.refresh();
        }
        if !self.credential_valid {
            return HttpResponse::new(
                401,
                json!({ "detail": "Given token not valid for any token type" }),
            );
        }

        let segments: Vec<&str> = route.trim_matches('/').split('/').collect();
        match (envelope.method(), segments.as_slice()) {
            (Method::Get, ["chat", "rooms", room, "messages"]) => {
                self.page(&RoomId::new(*room), page_number(envelope.path()))
            },
            (Method::Post, ["chat", "rooms", room, "messages"]) => {
                self.post_message(&RoomId::new(*room), envelope.body())
            },
            (Method::Post, ["chat", "rooms", room, "mark_read"]) => {
                self.mark_read(&RoomId::new(*room))
            },
            _ => HttpResponse::new(200, json!({ "path": route })),
        }
    }

    fn refresh(&mut self) -> HttpResponse {
        match self.refresh_mode {
            RefreshMode::Accept => {
                self.credential_valid = true;
                HttpResponse::new(200, json!({ "detail": "Token refreshed" }))
            },
            RefreshMode::AcceptStale => {
                HttpResponse::new(200, json!({ "detail": "Token refreshed" }))
            },
            RefreshMode::Reject => {
                HttpResponse::new(401, json!({ "detail": "Token is invalid or expired" }))
            },
            RefreshMode::Fail => HttpResponse::new(500, json!({ "detail": "refresh unavailable" })),
        }
    }

    fn page(&self, room: &RoomId, number: u32) -> HttpResponse {
        let history = self.histories.get(room).map_or(&[][..], Vec::as_slice);
        let skip = (number.max(1) as usize - 1) * PAGE_SIZE;
        if number == 0 || (number > 1 && skip >= history.len()) {
            return HttpResponse::new(404, json!({ "detail": "Invalid page." }));
        }

        let end = history.len() - skip;
        let start = end.saturating_sub(PAGE_SIZE);
        let results: Vec<Value> =
            history[start..end].iter().rev().filter_map(|m| serde_json::to_value(m).ok()).collect();
        let next = (start > 0)
            .then(|| format!("{SIM_API_BASE}/chat/rooms/{room}/messages/?page={}", number + 1));

        let mut body = json!({ "count": history.len(), "next": next, "results": results });
        if number == 1
            && let Some(block) = self.counterparts.get(room)
        {
            body["room"] = block.clone();
        }
        HttpResponse::new(200, body)
    }

    fn post_message(&mut self, room: &RoomId, body: Option<&Value>) -> HttpResponse {
        let field = |name: &str| {
            body.and_then(|b| b.get(name)).and_then(Value::as_str).map(str::to_string)
        };

        let kind = match field("message_type").as_deref() {
            Some("image" | "media") => MessageKind::Media,
            _ => MessageKind::Text,
        };
        let me = self.me.clone();
        let mut message = self.append(room, me, field("content").unwrap_or_default(), kind);
        message.media_url = field("media_url");
        message.media_filename = field("media_filename");
        if let Some(stored) = self.histories.get_mut(room).and_then(|h| h.last_mut()) {
            stored.clone_from(&message);
        }

        self.broadcast(&SimBackend::room_topic(room), &message_frame(&message));
        HttpResponse::new(201, serde_json::to_value(&message).unwrap_or(Value::Null))
    }

    fn mark_read(&mut self, room: &RoomId) -> HttpResponse {
        let me = self.me.clone();
        let mut marked = 0;
        for message in self.histories.get_mut(room).into_iter().flatten() {
            if message.sender.user_id != me && !message.is_read {
                message.is_read = true;
                marked += 1;
            }
        }
        HttpResponse::new(200, json!({ "marked_read": marked }))
    }
}

#[async_trait]
impl HttpTransport for SimBackend {
    async fn send(&self, envelope: &RequestEnvelope) -> Result<HttpResponse, TransportError> {
        let route = envelope.route().to_string();
        let (rendered, delay) = {
            let mut state = self.state.lock();
            state.calls.push(RecordedCall {
                method: envelope.method(),
                path: envelope.path().to_string(),
                body: envelope.body().cloned(),
                retried: envelope.is_retried(),
            });

            // Pages are rendered when the request lands and travel back
            // afterwards, so pushes during the delay are not on the page.
            let scripted = state.scripted.get_mut(&route).and_then(VecDeque::pop_front);
            if route == DEFAULT_REFRESH_PATH {
                (scripted, state.refresh_delay)
            } else if envelope.method() == Method::Get && route.ends_with("/messages/") {
                let page = scripted.unwrap_or_else(|| state.respond(envelope));
                (Some(page), state.page_delay)
            } else {
                (scripted, Duration::ZERO)
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(response) = rendered {
            return Ok(response);
        }

        let response = self.state.lock().respond(envelope);
        tracing::trace!(path = envelope.path(), status = response.status, "sim response");
        Ok(response)
    }
}

#[async_trait]
impl Dialer for SimBackend {
    async fn dial(&self, url: &Url) -> Result<ChannelLink, TransportError> {
        let topic = url.path().to_string();
        let mut state = self.state.lock();
        *state.dials.entry(topic.clone()).or_insert(0) += 1;

        if !state.accepting {
            return Err(TransportError::Handshake("gateway unavailable".to_string()));
        }
        if !state.credential_valid {
            return Err(TransportError::Handshake("4001 unauthorized".to_string()));
        }

        let (to_client, client_inbound) = mpsc::channel(SOCKET_CAPACITY);
        let (client_outbound, from_client) = mpsc::channel(SOCKET_CAPACITY);
        state.sockets.entry(topic).or_default().push(ServerEnd { to_client, from_client });
        Ok(ChannelLink::new(client_outbound, client_inbound))
    }
}

fn message_frame(message: &Message) -> String {
    json!({ "type": "message", "message": message }).to_string()
}

fn timestamp(seq: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(BASE_TIMESTAMP + seq, 0).unwrap_or_default()
}

fn page_number(path: &str) -> u32 {
    path.split_once('?')
        .and_then(|(_, query)| query.split('&').find_map(|pair| pair.strip_prefix("page=")))
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(1)
}

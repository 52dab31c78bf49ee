//! Marquee terminal client.
//!
//! # Usage
//!
//! ```bash
//! # Join a room with the session cookies of a browser login
//! marquee --user 7 --room 3f0c9a1e-5b7d-4c2a-9e11-0d6f8a2b4c10 \
//!     --cookie "access_token=..." --cookie "refresh_token=..."
//! ```
//!
//! Every line read from stdin is sent to the room. `/older` loads older
//! history, `/read` marks everything read, `/quit` signs out.

use clap::Parser;
use marquee_client::{ClientConfig, LoadOutcome, MarqueeClient, RoomHandle, TypingChange};
use marquee_proto::{Message, NewMessage, ParticipantId, RoomId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Marquee chat client
#[derive(Parser, Debug)]
#[command(name = "marquee")]
#[command(about = "Terminal client for Marquee event chat rooms")]
#[command(version)]
struct Args {
    /// REST API base URL
    #[arg(long, env = "MARQUEE_API", default_value = "http://localhost:8000/api")]
    api: String,

    /// Chat socket base URL
    #[arg(long, env = "MARQUEE_CHAT_WS", default_value = "ws://localhost:8000/ws/chat/")]
    chat_ws: String,

    /// Notification socket URL
    #[arg(
        long,
        env = "MARQUEE_NOTIFICATIONS_WS",
        default_value = "ws://localhost:8000/ws/notifications/"
    )]
    notifications_ws: String,

    /// Id of the signed-in user
    #[arg(short, long, env = "MARQUEE_USER")]
    user: String,

    /// Session cookie as `name=value`; repeat for each cookie
    #[arg(short, long)]
    cookie: Vec<String>,

    /// Room to join
    #[arg(short, long)]
    room: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ClientConfig::new(&args.api, &args.chat_ws, &args.notifications_ws)?;
    let api_base = config.api_base.clone();
    let client = MarqueeClient::connect(config)?;

    if let Some(jar) = client.cookie_jar() {
        for cookie in &args.cookie {
            jar.add_cookie_str(cookie, &api_base);
        }
    }
    if args.cookie.is_empty() {
        tracing::warn!("No session cookie provided - requests will be rejected");
    }

    client.login(ParticipantId::new(args.user));
    client.on_session_terminated(|reason| tracing::warn!(%reason, "session ended"));

    let room = client.subscribe_room(RoomId::new(args.room)).await?;
    tracing::info!(room = %room.room_id(), messages = room.timeline().len(), "joined room");
    for message in room.timeline() {
        show_message(&message);
    }

    tokio::spawn(forward(room.messages(), |message| show_message(&message)));
    tokio::spawn(forward(room.typing_changes(), |change| show_typing(&change)));

    let notifications = client.subscribe_notifications()?;
    tokio::spawn(forward(notifications.subscribe(), |entry| {
        show_notice(&format!("{}: {}", entry.kind, entry.message));
    }));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(&room, line.trim()).await {
                        break;
                    }
                },
                None => break,
            },
        }
    }

    client.logout();
    tracing::info!("signed out");

    Ok(())
}

/// Run one input line. Returns `false` to quit.
async fn handle_line(room: &RoomHandle, line: &str) -> bool {
    match line {
        "" => {},
        "/quit" => return false,
        "/older" => match room.load_older().await {
            Ok(LoadOutcome::Loaded { added }) => {
                show_notice(&format!("loaded {added} older messages"));
            },
            Ok(LoadOutcome::Skipped) => show_notice("no older messages"),
            Ok(LoadOutcome::Discarded) => {},
            Err(e) => tracing::warn!(error = %e, "failed to load history"),
        },
        "/read" => {
            let marked = room.mark_all_read();
            show_notice(&format!("marked {marked} messages read"));
        },
        text => {
            if let Err(e) = room.send_message(NewMessage::text(text)).await {
                tracing::warn!(error = %e, "failed to send message");
            }
        },
    }
    true
}

/// Drain a broadcast channel into `show`, skipping over lag.
async fn forward<T>(mut events: broadcast::Receiver<T>, show: impl Fn(T) + Send + 'static)
where
    T: Clone + Send + 'static,
{
    loop {
        match events.recv().await {
            Ok(event) => show(event),
            Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "display lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[allow(clippy::print_stdout)]
fn show_message(message: &Message) {
    let author = message.sender.full_name.as_deref().unwrap_or(message.sender.user_id.as_str());
    let body = message.media_filename.as_deref().unwrap_or(&message.content);
    println!("[{}] {author}: {body}", message.created_at.format("%H:%M"));
}

#[allow(clippy::print_stdout)]
fn show_typing(change: &TypingChange) {
    if change.is_typing {
        println!("  {} is typing...", change.participant);
    }
}

#[allow(clippy::print_stdout)]
fn show_notice(text: &str) {
    println!("* {text}");
}

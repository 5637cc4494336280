//! # WebSocket Chat Example
//!
//! Demonstrates a complete room session over a relay server:
//!
//! 1. Connect to the relay via WebSocket
//! 2. Select a room (cached messages are shown right away)
//! 3. Send lines typed on stdin; `/room <name>` switches rooms
//! 4. Print transcript updates, history and connection changes
//! 5. Shut down gracefully on Ctrl+C or end of input
//!
//! ## Running
//!
//! ```sh
//! # Start a relay on localhost:3536, then:
//! cargo run --example websocket_chat
//!
//! # Override the relay URL:
//! ROOMSYNC_URL=ws://my-relay:3536/ws cargo run --example websocket_chat
//! ```

use roomsync_client::{
    MemoryCache, RoomSession, SessionConfig, SessionEvent, Transcript, WebSocketRoomTransport,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Default relay URL when `ROOMSYNC_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:3536/ws";

/// Rooms offered to the user.
const ROOMS: [&str; 3] = ["lobby", "sports", "news"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Connect ─────────────────────────────────────────────────────
    let url = std::env::var("ROOMSYNC_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    tracing::info!("Connecting to {url}");
    let transport =
        WebSocketRoomTransport::connect_with_timeout(&url, std::time::Duration::from_secs(10))
            .await?;

    let config = SessionConfig::new(ROOMS)
        .with_transition_timeout(std::time::Duration::from_secs(15));
    let (mut session, mut events) = RoomSession::start(transport, MemoryCache::new(), config);

    let mut transcript = Transcript::from_records(session.select_room(ROOMS[0])?);
    println!("── {} ({} cached) ──", ROOMS[0], transcript.len());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::MessageAppended(record) => {
                        println!("[{}] {}", record.sender_id, record.data);
                        transcript.push(record);
                    }
                    SessionEvent::HistoryReceived { room, messages } => {
                        tracing::info!(room = ?room, count = messages.len(), "history received");
                        transcript.replace(messages);
                        for record in &transcript {
                            println!("[{}] {}", record.sender_id, record.data);
                        }
                    }
                    SessionEvent::ConnectionStateChanged { state, room } => {
                        tracing::info!("{state} ({})", room.as_ref().map_or("-", |r| r.as_str()));
                    }
                    SessionEvent::SendFailed { reason } => {
                        tracing::warn!("message not delivered: {}", reason.as_deref().unwrap_or("unknown"));
                    }
                    SessionEvent::Closed => break,
                    other => tracing::debug!("Event: {other:?}"),
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Some(room) = line.strip_prefix("/room ") {
                    match session.select_room(room.trim()) {
                        Ok(cached) => {
                            transcript = Transcript::from_records(cached);
                            println!("── {} ({} cached) ──", room.trim(), transcript.len());
                        }
                        Err(e) => tracing::warn!("{e}"),
                    }
                } else if !line.trim().is_empty() {
                    session.send(line)?;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    session.shutdown().await;
    tracing::info!("Session closed. Goodbye!");
    Ok(())
}

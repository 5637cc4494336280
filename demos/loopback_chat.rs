//! # Loopback Chat Example
//!
//! Shows how to implement the [`RoomTransport`] trait with an in-process
//! fake backend, and what the session does when the user is faster than
//! the network:
//!
//! - a room selected and abandoned before its switch runs is never joined
//! - a message typed before the room is joined goes out once it is
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_chat
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use roomsync_client::{
    DisabledCache, MessageRecord, RoomId, RoomSession, RoomTransport, SessionConfig, SessionError,
    SessionEvent, TransportCallbacks,
};

// ─────────────────────────────────────────────────────────────────────
// Step 1: A fake backend that answers after a network-like delay
// ─────────────────────────────────────────────────────────────────────

/// Simulated round-trip time for joins and leaves.
const LATENCY: Duration = Duration::from_millis(200);

/// Stored messages per room, shared with the "server" side.
type Store = Arc<Mutex<HashMap<RoomId, Vec<MessageRecord>>>>;

pub struct LoopbackTransport {
    callbacks: Option<TransportCallbacks>,
    store: Store,
    room: Option<RoomId>,
}

impl LoopbackTransport {
    fn new(store: Store) -> Self {
        Self {
            callbacks: None,
            store,
            room: None,
        }
    }

    fn callbacks(&self) -> Result<TransportCallbacks, SessionError> {
        self.callbacks
            .clone()
            .ok_or_else(|| SessionError::TransportRequest("not attached".into()))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the RoomTransport trait
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl RoomTransport for LoopbackTransport {
    fn attach(&mut self, callbacks: TransportCallbacks) {
        self.callbacks = Some(callbacks);
    }

    fn local_peer_id(&self) -> String {
        "you".into()
    }

    /// Resolve the join later, from another task, like a real backend.
    async fn join_room(&mut self, room: &RoomId) -> Result<(), SessionError> {
        self.room = Some(room.clone());
        let cbs = self.callbacks()?;
        tokio::spawn(async move {
            tokio::time::sleep(LATENCY).await;
            cbs.room_connected(true);
            cbs.peer_joined("echo-bot");
        });
        Ok(())
    }

    async fn leave_room(&mut self) -> Result<(), SessionError> {
        self.room = None;
        let cbs = self.callbacks()?;
        tokio::spawn(async move {
            tokio::time::sleep(LATENCY).await;
            cbs.room_disconnected();
        });
        Ok(())
    }

    /// Store the message and have the bot echo it back.
    async fn send_message(&mut self, payload: &str) -> Result<(), SessionError> {
        let room = self.room.clone().ok_or(SessionError::TransportClosed)?;
        let record = MessageRecord::now(self.local_peer_id(), payload);
        if let Ok(mut store) = self.store.lock() {
            store.entry(room).or_default().push(record);
        }
        let cbs = self.callbacks()?;
        let echo = format!("echo: {payload}");
        tokio::spawn(async move { cbs.message_received("echo-bot", echo, None) });
        Ok(())
    }

    async fn fetch_history(&mut self) -> Result<(), SessionError> {
        let room = self.room.clone().ok_or(SessionError::TransportClosed)?;
        let history = self
            .store
            .lock()
            .map(|store| store.get(&room).cloned().unwrap_or_default())
            .unwrap_or_default();
        let cbs = self.callbacks()?;
        tokio::spawn(async move { cbs.history_received(history) });
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Drive a session faster than the backend can keep up
// ─────────────────────────────────────────────────────────────────────

// Single-threaded so the worker only starts once `main` first awaits.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store: Store = Arc::default();
    let config = SessionConfig::new(["lobby", "sports"])
        .with_history_quiescence(Duration::from_millis(500));
    let (mut session, mut events) =
        RoomSession::start(LoopbackTransport::new(Arc::clone(&store)), DisabledCache, config);

    // Pick lobby, change our mind right away, and type before sports is joined.
    session.select_room("lobby")?;
    session.select_room("sports")?;
    session.send("anyone here?")?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::MessageAppended(record) => {
                    tracing::info!("[{}] {}", record.sender_id, record.data);
                }
                SessionEvent::HistoryReceived { room, messages } => {
                    tracing::info!("history for {room:?}: {} message(s)", messages.len());
                }
                SessionEvent::Closed => break,
                other => tracing::info!("Event: {other:?}"),
            }
        }
    });

    session.settle().await?;
    tracing::info!(
        "settled: state={} active={:?} peers={:?}",
        session.connection_state(),
        session.active_room(),
        session.remote_peers()
    );

    session.shutdown().await;
    printer.await?;
    tracing::info!("Done. lobby was never joined, sports got the message.");
    Ok(())
}

//! Handle for driving a room session from the presentation layer.
//!
//! [`RoomSession`] is a thin handle that records the user's intent and
//! forwards work to the background worker over an unbounded MPSC channel.
//! Its methods return as soon as the work is queued; outcomes arrive as
//! [`SessionEvent`]s on the bounded channel returned from
//! [`RoomSession::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SessionConfig::new(["lobby", "sports"]);
//! let (session, mut events) = RoomSession::start(transport, MemoryCache::new(), config);
//!
//! let cached = session.select_room("lobby")?;   // show these right away
//! session.send("hello")?;                       // queued until connected
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::MessageAppended(record) => { /* … */ }
//!         SessionEvent::HistoryReceived { messages, .. } => { /* … */ }
//!         SessionEvent::Closed => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cache::MessageCache;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::event::{EventSink, SessionEvent};
use crate::gate::ConnectionGate;
use crate::machine::RoomStateMachine;
use crate::message::{MessageRecord, RoomId, Transcript};
use crate::state::{ConnectionState, SharedState};
use crate::transport::{RoomTransport, TransportCallbacks};
use crate::worker::{self, Command};

/// Handle to a running room session.
///
/// Created via [`RoomSession::start`], which spawns the serial worker and
/// returns this handle together with an event receiver. Must be used from
/// within a Tokio runtime.
pub struct RoomSession {
    /// Sender half of the command channel to the worker.
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// State published by the worker; the selection is written here.
    shared: Arc<SharedState>,
    /// Local cache read when a room is selected.
    cache: Arc<dyn MessageCache>,
    /// For diagnostics raised on the caller's side. Released on shutdown.
    events: Option<EventSink>,
    /// Copy of the configuration, for room validation.
    config: SessionConfig,
    /// Handle to the worker task.
    task: Option<tokio::task::JoinHandle<()>>,
}

impl RoomSession {
    /// Start the session worker and return a handle plus event receiver.
    ///
    /// The transport receives its [`TransportCallbacks`] before the worker
    /// starts. The session begins `Disconnected` with no room selected.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        mut transport: impl RoomTransport,
        cache: impl MessageCache,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let events = EventSink::new(event_tx);

        let shared = Arc::new(SharedState::new());
        let gate = Arc::new(ConnectionGate::new());
        transport.attach(TransportCallbacks::new(
            Arc::clone(&gate),
            Arc::clone(&shared),
            events.clone(),
        ));

        let machine = RoomStateMachine::new(
            transport,
            gate,
            Arc::clone(&shared),
            events.clone(),
            config.clone(),
        );
        let task = tokio::spawn(worker::run(machine, cmd_rx, events.clone()));

        let session = Self {
            cmd_tx,
            shared,
            cache: Arc::new(cache),
            events: Some(events),
            config,
            task: Some(task),
        };
        (session, event_rx)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Select the room the user wants to chat in.
    ///
    /// The selection takes effect immediately: any transition still queued
    /// for a previous room becomes stale. Returns the locally cached
    /// messages for `room`, ordered by timestamp, so they can be shown
    /// before the network catches up. The connect itself runs on the worker.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownRoom`] for a room outside the
    /// configured set, or [`SessionError::SessionClosed`] after shutdown.
    pub fn select_room(&self, room: impl Into<RoomId>) -> Result<Vec<MessageRecord>> {
        self.ensure_open()?;
        let room = self.validate(room.into())?;

        let previous = self.shared.selected.select(room.clone());
        debug!(room = %room, ?previous, "room selected");

        let cached = self.read_cache(&room);
        self.submit(Command::SwitchRoom(room))?;
        Ok(cached)
    }

    /// Send a message to the currently selected room.
    ///
    /// If the session is not connected to that room by the time the worker
    /// handles the message, it waits in the room's offline queue and is
    /// replayed, in order, once the room is connected.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoRoomSelected`] if no room has been selected,
    /// or [`SessionError::SessionClosed`] after shutdown.
    pub fn send(&self, payload: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        let room = self
            .shared
            .selected
            .get()
            .ok_or(SessionError::NoRoomSelected)?;
        self.submit(Command::Send {
            room,
            payload: payload.into(),
        })
    }

    /// Connect to `room` without changing the selection.
    ///
    /// A no-op on the worker if a transition is in flight or the session is
    /// already connected.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownRoom`] or [`SessionError::SessionClosed`].
    pub fn connect(&self, room: impl Into<RoomId>) -> Result<()> {
        self.ensure_open()?;
        let room = self.validate(room.into())?;
        self.submit(Command::Connect(room))
    }

    /// Leave the current room.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] after shutdown.
    pub fn disconnect(&self) -> Result<()> {
        self.submit(Command::Disconnect)
    }

    /// Ask the backend for the stored history of the active room.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] after shutdown.
    pub fn request_history(&self) -> Result<()> {
        self.submit(Command::FetchHistory)
    }

    /// Messages still waiting in `room`'s offline queue, oldest first.
    ///
    /// Answered by the worker once earlier work has finished.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] after shutdown.
    pub async fn pending_messages(&self, room: impl Into<RoomId>) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Pending {
            room: room.into(),
            reply,
        })?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Wait until every operation submitted so far has finished.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] if the worker stopped first.
    pub async fn settle(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Barrier(reply))?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Shut the session down.
    ///
    /// Clears the selection so queued room switches abandon themselves, lets
    /// already-submitted work finish, leaves the room if connected, disposes
    /// the transport and stops the worker. The event receiver yields
    /// [`SessionEvent::Closed`] and then `None`. Every later call fails
    /// with [`SessionError::SessionClosed`].
    pub async fn shutdown(&mut self) {
        debug!("RoomSession: shutdown requested");
        self.begin_shutdown();

        // Await the worker with a timeout. If it does not exit in time,
        // abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session worker terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session worker did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session worker aborted: {join_err}");
                    }
                }
            }
        }
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection()
    }

    /// Room connected or being connected to.
    pub fn active_room(&self) -> Option<RoomId> {
        self.shared.active_room()
    }

    /// Room most recently selected by the user.
    pub fn selected_room(&self) -> Option<RoomId> {
        self.shared.selected.get()
    }

    /// Remote peers in the active room, sorted.
    pub fn remote_peers(&self) -> Vec<String> {
        self.shared.peers()
    }

    /// Returns `true` until shutdown begins.
    pub fn is_open(&self) -> bool {
        self.shared.is_open() && !self.cmd_tx.is_closed()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SessionError::SessionClosed)
        }
    }

    fn validate(&self, room: RoomId) -> Result<RoomId> {
        if self.config.allows(&room) {
            Ok(room)
        } else {
            Err(SessionError::UnknownRoom(room.to_string()))
        }
    }

    /// Queue a command to the worker.
    fn submit(&self, cmd: Command) -> Result<()> {
        if !self.shared.is_open() {
            return Err(SessionError::SessionClosed);
        }
        self.cmd_tx
            .send(cmd)
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Read cached history; failures degrade to an empty history.
    fn read_cache(&self, room: &RoomId) -> Vec<MessageRecord> {
        if !self.cache.is_enabled() {
            return Vec::new();
        }
        match self.cache.cached_messages(room) {
            Ok(records) => Transcript::from_records(records).as_slice().to_vec(),
            Err(e) => {
                warn!(room = %room, "cached messages unavailable: {e}");
                if let Some(events) = &self.events {
                    events.emit(SessionEvent::CacheReadFailed {
                        room: room.clone(),
                        reason: e.to_string(),
                    });
                }
                Vec::new()
            }
        }
    }

    /// Stop accepting work and queue the teardown behind earlier commands.
    fn begin_shutdown(&mut self) {
        self.events = None;
        if !self.shared.is_open() {
            return;
        }
        self.shared.selected.clear();
        // The shutdown command must still get through after closing.
        let queued = self.cmd_tx.send(Command::Shutdown);
        self.shared.close();
        if queued.is_err() {
            debug!("session worker already gone");
        }
    }
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("state", &self.connection_state())
            .field("active_room", &self.active_room())
            .field("selected_room", &self.selected_room())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        // `Drop` cannot await, but the worker owns the transport and runs on
        // the runtime: queue the teardown and let it finish in the
        // background so the room is still left.
        self.begin_shutdown();
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::cache::{DisabledCache, MemoryCache};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Transport that accepts everything and resolves joins/leaves at once.
    #[derive(Default)]
    struct EchoTransport {
        callbacks: Option<TransportCallbacks>,
    }

    #[async_trait]
    impl RoomTransport for EchoTransport {
        fn attach(&mut self, callbacks: TransportCallbacks) {
            self.callbacks = Some(callbacks);
        }

        fn local_peer_id(&self) -> String {
            "echo".into()
        }

        async fn join_room(&mut self, _room: &RoomId) -> Result<()> {
            if let Some(cbs) = self.callbacks.clone() {
                tokio::spawn(async move { cbs.room_connected(true) });
            }
            Ok(())
        }

        async fn leave_room(&mut self) -> Result<()> {
            if let Some(cbs) = self.callbacks.clone() {
                tokio::spawn(async move { cbs.room_disconnected() });
            }
            Ok(())
        }

        async fn send_message(&mut self, _payload: &str) -> Result<()> {
            Ok(())
        }

        async fn fetch_history(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::new(["lobby", "sports"]).with_history_quiescence(Duration::ZERO)
    }

    #[tokio::test]
    async fn starts_disconnected_with_nothing_selected() {
        let (mut session, _events) =
            RoomSession::start(EchoTransport::default(), DisabledCache, config());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(session.active_room().is_none());
        assert!(session.selected_room().is_none());
        assert!(session.is_open());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_room_is_rejected() {
        let (mut session, _events) =
            RoomSession::start(EchoTransport::default(), DisabledCache, config());
        let err = session.select_room("casino").unwrap_err();
        assert!(matches!(err, SessionError::UnknownRoom(ref r) if r == "casino"));
        assert!(session.selected_room().is_none());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn send_requires_a_selection() {
        let (mut session, _events) =
            RoomSession::start(EchoTransport::default(), DisabledCache, config());
        assert!(matches!(
            session.send("hi"),
            Err(SessionError::NoRoomSelected)
        ));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn select_returns_cached_messages_in_timestamp_order() {
        let cache = MemoryCache::new();
        let lobby = RoomId::from("lobby");
        cache.insert(&lobby, MessageRecord::new("a", "later", 20));
        cache.insert(&lobby, MessageRecord::new("b", "earlier", 10));

        let (mut session, _events) = RoomSession::start(EchoTransport::default(), cache, config());
        let cached = session.select_room("lobby").unwrap();
        assert_eq!(cached[0].data, "earlier");
        assert_eq!(cached[1].data, "later");

        session.settle().await.unwrap();
        assert_eq!(session.active_room(), Some(lobby));
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn every_call_fails_after_shutdown() {
        let (mut session, mut events) =
            RoomSession::start(EchoTransport::default(), DisabledCache, config());
        session.shutdown().await;

        assert!(!session.is_open());
        assert!(matches!(session.select_room("lobby"), Err(SessionError::SessionClosed)));
        assert!(matches!(session.send("x"), Err(SessionError::SessionClosed)));
        assert!(matches!(session.connect("lobby"), Err(SessionError::SessionClosed)));
        assert!(matches!(session.disconnect(), Err(SessionError::SessionClosed)));
        assert!(matches!(session.request_history(), Err(SessionError::SessionClosed)));
        assert!(matches!(session.settle().await, Err(SessionError::SessionClosed)));

        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        // Every sender is gone once the worker has exited.
        assert_eq!(last, Some(SessionEvent::Closed));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (mut session, _events) =
            RoomSession::start(EchoTransport::default(), DisabledCache, config());
        session.shutdown().await;
        session.shutdown().await;
        assert!(!session.is_open());
    }
}

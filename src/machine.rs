//! The room session state machine.
//!
//! Runs exclusively on the session worker. Join and leave requests are
//! issued to the transport and then awaited through the
//! [`ConnectionGate`], so from the worker's point of view a transition is a
//! single sequential step. Everything that must happen strictly after a
//! transition (queue replay, history) simply follows the `.await`.
//!
//! ## Room switch
//!
//! ```text
//! select_room(R) ──→ [checkpoint 1: still R?]
//!                        │ no → abandon
//!                        ▼
//!                 disconnect (if Connected/Failed) ──→ connect(R)
//!                        │
//!                        ▼
//!                 [checkpoint 2: still R?] ── no → stop (stay connected to R)
//!                        │
//!                        ▼
//!                 drain R's queue ──→ quiescence ──→ [still R?] ──→ fetch history
//! ```
//!
//! The quiescence wait ends early when the session is closing.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::event::{EventSink, SessionEvent};
use crate::gate::{ConnectionGate, GateOutcome, Resolution};
use crate::history::HistoryDebouncer;
use crate::message::{MessageRecord, RoomId};
use crate::queue::OfflineQueues;
use crate::state::{ConnectionState, SharedState};
use crate::transport::RoomTransport;

/// What happened to a submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    /// Handed to the transport; the record carries the local peer id.
    Sent(MessageRecord),
    /// Stored in the room's offline queue; the record carries the pending label.
    Queued(MessageRecord),
    /// The transport refused the message. It is not re-queued.
    Failed,
}

pub(crate) struct RoomStateMachine<T: RoomTransport> {
    transport: T,
    gate: Arc<ConnectionGate>,
    shared: Arc<SharedState>,
    events: EventSink,
    queues: OfflineQueues,
    debouncer: HistoryDebouncer,
    config: SessionConfig,
    /// Room of the most recent transition, used to label state events.
    last_room: Option<RoomId>,
}

impl<T: RoomTransport> RoomStateMachine<T> {
    pub(crate) fn new(
        transport: T,
        gate: Arc<ConnectionGate>,
        shared: Arc<SharedState>,
        events: EventSink,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            gate,
            shared,
            events,
            queues: OfflineQueues::new(),
            debouncer: HistoryDebouncer::new(config.history_quiescence),
            config,
            last_room: None,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.shared.connection()
    }

    pub(crate) fn pending(&self, room: &RoomId) -> Vec<String> {
        self.queues.pending(room)
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Move to `next`, publish it and notify the presentation.
    fn transition(&mut self, next: ConnectionState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            error!(%current, %next, "refusing illegal connection state transition");
            return;
        }
        self.shared.set_connection(next);
        debug!(from = %current, to = %next, room = ?self.last_room, "connection state changed");
        self.events.emit(SessionEvent::ConnectionStateChanged {
            state: next,
            room: self.last_room.clone(),
        });
    }

    /// Join `room` and wait until the transport resolves the attempt.
    ///
    /// Returns `true` if the session ends up connected to `room`. A call
    /// while a transition is in flight or while already connected is a
    /// no-op. From `Failed` the stale attempt is cleaned up first.
    pub(crate) async fn connect(&mut self, room: &RoomId) -> bool {
        match self.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Failed => self.disconnect().await,
            state => {
                debug!(room = %room, %state, "connect ignored, session busy or connected");
                return self.shared.is_connected_to(room);
            }
        }

        let waiter = match self.gate.arm() {
            Ok(waiter) => waiter,
            Err(e) => {
                warn!(room = %room, "connect refused: {e}");
                return false;
            }
        };

        self.last_room = Some(room.clone());
        self.shared.set_active_room(Some(room.clone()));
        self.transition(ConnectionState::Connecting);

        let success = match self.transport.join_room(room).await {
            Ok(()) => match waiter.wait(self.config.transition_timeout).await {
                GateOutcome::Resolved(Resolution::Joined { success }) => success,
                GateOutcome::Resolved(Resolution::Left) => {
                    warn!(room = %room, "disconnect callback while joining, treating as failure");
                    false
                }
                GateOutcome::TimedOut => {
                    self.gate.disarm();
                    warn!(room = %room, "join timed out");
                    false
                }
                GateOutcome::Abandoned => false,
            },
            Err(e) => {
                self.gate.disarm();
                warn!(room = %room, "join request failed: {e}");
                false
            }
        };

        if success {
            self.transition(ConnectionState::Connected);
            info!(room = %room, "connected to room");
        } else {
            self.shared.set_active_room(None);
            self.transition(ConnectionState::Failed);
            warn!(room = %room, "failed to connect to room");
        }
        success
    }

    /// Leave the current room (or clean up a failed attempt) and wait for
    /// the transport to confirm. Always ends in `Disconnected`.
    pub(crate) async fn disconnect(&mut self) {
        let state = self.state();
        if !matches!(state, ConnectionState::Connected | ConnectionState::Failed) {
            debug!(%state, "disconnect ignored");
            return;
        }

        let waiter = match self.gate.arm() {
            Ok(waiter) => Some(waiter),
            Err(e) => {
                warn!("disconnect without a gate: {e}");
                None
            }
        };
        self.transition(ConnectionState::Disconnecting);

        match self.transport.leave_room().await {
            Ok(()) => {
                if let Some(waiter) = waiter {
                    match waiter.wait(self.config.transition_timeout).await {
                        GateOutcome::Resolved(Resolution::Left) => {}
                        GateOutcome::Resolved(Resolution::Joined { .. }) => {
                            warn!("connect callback while leaving, treating as left");
                        }
                        GateOutcome::TimedOut => {
                            self.gate.disarm();
                            warn!("leave timed out, forcing disconnected");
                        }
                        GateOutcome::Abandoned => {}
                    }
                }
            }
            Err(e) => {
                self.gate.disarm();
                warn!("leave request failed, forcing disconnected: {e}");
            }
        }

        self.shared.set_active_room(None);
        if self.shared.clear_peers() {
            self.events.emit(SessionEvent::RemotePeersChanged(Vec::new()));
        }
        self.transition(ConnectionState::Disconnected);
        info!(room = ?self.last_room, "disconnected");
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Send `payload` to `room`, the room selected when the user hit send.
    ///
    /// Goes straight to the transport only when connected to `room` and the
    /// user is still looking at it; otherwise it waits in `room`'s queue.
    pub(crate) async fn send(&mut self, room: &RoomId, payload: String) -> SendOutcome {
        let direct = self.shared.is_connected_to(room) && self.shared.selected.is(room);
        if !direct {
            let record = MessageRecord::now(self.config.pending_sender_label.clone(), payload.as_str());
            self.queues.enqueue(room, payload);
            self.events.emit(SessionEvent::MessageAppended(record.clone()));
            return SendOutcome::Queued(record);
        }

        match self.transmit(&payload).await {
            Some(record) => SendOutcome::Sent(record),
            None => SendOutcome::Failed,
        }
    }

    /// Hand one payload to the transport and report it.
    async fn transmit(&mut self, payload: &str) -> Option<MessageRecord> {
        match self.transport.send_message(payload).await {
            Ok(()) => {
                let record = MessageRecord::now(self.transport.local_peer_id(), payload);
                self.events.emit(SessionEvent::MessageAppended(record.clone()));
                Some(record)
            }
            Err(e) => {
                warn!("message not accepted by transport: {e}");
                self.events.emit(SessionEvent::SendFailed {
                    reason: Some(e.to_string()),
                });
                None
            }
        }
    }

    /// Replay `room`'s offline queue in FIFO order.
    ///
    /// Stops as soon as the selection moves away from `room` or the session
    /// is no longer connected to it; whatever is left stays queued. Returns
    /// the number of messages the transport accepted.
    pub(crate) async fn drain_into(&mut self, room: &RoomId) -> usize {
        let mut sent = 0;
        loop {
            if !self.shared.selected.is(room) || !self.shared.is_connected_to(room) {
                if !self.queues.is_empty(room) {
                    debug!(room = %room, left = self.queues.len(room), "drain stopped, room no longer current");
                }
                break;
            }
            let Some(payload) = self.queues.pop(room) else {
                break;
            };
            if self.transmit(&payload).await.is_some() {
                sent += 1;
                info!(room = %room, "pending message sent");
            }
        }
        sent
    }

    // ── History ─────────────────────────────────────────────────────

    /// Ask the transport for the stored history of the active room.
    pub(crate) async fn request_history(&mut self) {
        if self.state() != ConnectionState::Connected {
            debug!(state = %self.state(), "history request skipped, not connected");
            return;
        }
        if let Err(e) = self.transport.fetch_history().await {
            warn!("history request failed: {e}");
        }
    }

    /// Drain, wait out the quiescence period if anything was sent, and then
    /// request history, unless the user moved on in the meantime.
    async fn replay_and_fetch(&mut self, room: &RoomId) {
        let sent = self.drain_into(room).await;
        tokio::select! {
            () = self.debouncer.settle(sent) => {}
            () = self.shared.closed() => {
                debug!(room = %room, "session closing, history wait cut short");
            }
        }

        if !self.shared.selected.is(room) || !self.shared.is_connected_to(room) {
            debug!(room = %room, "history request skipped, room no longer current");
            return;
        }
        self.request_history().await;
    }

    /// Explicit connect: join `room`, then replay and fetch if the user is
    /// looking at it.
    pub(crate) async fn connect_and_replay(&mut self, room: &RoomId) {
        if self.connect(room).await && self.shared.selected.is(room) {
            self.replay_and_fetch(room).await;
        }
    }

    // ── Room switch ─────────────────────────────────────────────────

    /// Carry out a user's room selection.
    ///
    /// A switch the user has already moved on from is dropped before any
    /// transport call. Its room's queue is never drained into a room that
    /// is no longer selected, so joining it could deliver nothing; the
    /// messages wait for the next time the room is picked.
    pub(crate) async fn switch_to(&mut self, room: &RoomId) {
        if !self.shared.selected.is(room) {
            debug!(
                room = %room,
                queued = self.queues.len(room),
                "room switch abandoned, selection moved on"
            );
            return;
        }

        self.events.emit(SessionEvent::Waiting(true));
        let connected = if self.shared.is_connected_to(room) {
            debug!(room = %room, "already connected to selected room");
            true
        } else {
            self.disconnect().await;
            self.connect(room).await
        };
        self.events.emit(SessionEvent::Waiting(false));

        if !connected {
            return;
        }
        if !self.shared.selected.is(room) {
            debug!(room = %room, "selection changed during connect, skipping replay");
            return;
        }
        self.replay_and_fetch(room).await;
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Leave the room if needed and release the transport.
    pub(crate) async fn teardown(&mut self) {
        debug!("tearing down room session");
        self.disconnect().await;
        if let Err(e) = self.transport.dispose().await {
            warn!("transport dispose failed: {e}");
        }
        for (room, left) in self.queues.backlog() {
            warn!(room = %room, left, "session closed with undelivered messages");
        }
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
    use crate::error::SessionError;
    use crate::transport::TransportCallbacks;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Transport that resolves every request immediately, on a spawned task.
    struct InstantTransport {
        callbacks: Option<TransportCallbacks>,
        join_ok: bool,
        calls: Arc<StdMutex<Vec<String>>>,
    }

    impl InstantTransport {
        fn new(join_ok: bool) -> (Self, Arc<StdMutex<Vec<String>>>) {
            let calls = Arc::new(StdMutex::new(Vec::new()));
            let transport = Self {
                callbacks: None,
                join_ok,
                calls: Arc::clone(&calls),
            };
            (transport, calls)
        }

        fn cbs(&self) -> TransportCallbacks {
            self.callbacks.clone().unwrap()
        }
    }

    #[async_trait]
    impl RoomTransport for InstantTransport {
        fn attach(&mut self, callbacks: TransportCallbacks) {
            self.callbacks = Some(callbacks);
        }

        fn local_peer_id(&self) -> String {
            "me".into()
        }

        async fn join_room(&mut self, room: &RoomId) -> Result<(), SessionError> {
            self.calls.lock().unwrap().push(format!("join:{room}"));
            let cbs = self.cbs();
            let ok = self.join_ok;
            tokio::spawn(async move { cbs.room_connected(ok) });
            Ok(())
        }

        async fn leave_room(&mut self) -> Result<(), SessionError> {
            self.calls.lock().unwrap().push("leave".into());
            let cbs = self.cbs();
            tokio::spawn(async move { cbs.room_disconnected() });
            Ok(())
        }

        async fn send_message(&mut self, payload: &str) -> Result<(), SessionError> {
            self.calls.lock().unwrap().push(format!("send:{payload}"));
            Ok(())
        }

        async fn fetch_history(&mut self) -> Result<(), SessionError> {
            self.calls.lock().unwrap().push("history".into());
            Ok(())
        }
    }

    fn machine(
        join_ok: bool,
    ) -> (
        RoomStateMachine<InstantTransport>,
        Arc<StdMutex<Vec<String>>>,
        mpsc::Receiver<SessionEvent>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let events = EventSink::new(tx);
        let gate = Arc::new(ConnectionGate::new());
        let shared = Arc::new(SharedState::new());
        let (mut transport, calls) = InstantTransport::new(join_ok);
        transport.attach(TransportCallbacks::new(
            Arc::clone(&gate),
            Arc::clone(&shared),
            events.clone(),
        ));
        let config = SessionConfig::default().with_history_quiescence(Duration::ZERO);
        (
            RoomStateMachine::new(transport, gate, shared, events, config),
            calls,
            rx,
        )
    }

    fn states(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<ConnectionState> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::ConnectionStateChanged { state, .. } = event {
                out.push(state);
            }
        }
        out
    }

    #[tokio::test]
    async fn connect_then_disconnect_walks_legal_edges() {
        let (mut m, _calls, mut rx) = machine(true);
        let lobby = RoomId::from("lobby");

        assert!(m.connect(&lobby).await);
        assert_eq!(m.shared.active_room(), Some(lobby.clone()));
        m.disconnect().await;

        assert_eq!(
            states(&mut rx),
            [
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnecting,
                ConnectionState::Disconnected,
            ]
        );
        assert_eq!(m.shared.active_room(), None);
    }

    #[tokio::test]
    async fn failed_connect_keeps_active_room_empty() {
        let (mut m, _calls, mut rx) = machine(false);
        assert!(!m.connect(&"lobby".into()).await);
        assert_eq!(m.state(), ConnectionState::Failed);
        assert_eq!(m.shared.active_room(), None);
        assert_eq!(
            states(&mut rx),
            [ConnectionState::Connecting, ConnectionState::Failed]
        );
    }

    #[tokio::test]
    async fn reconnect_from_failed_cleans_up_first() {
        let (mut m, calls, mut rx) = machine(false);
        let lobby = RoomId::from("lobby");
        m.connect(&lobby).await;
        m.transport.join_ok = true;
        assert!(m.connect(&lobby).await);

        assert_eq!(
            *calls.lock().unwrap(),
            ["join:lobby", "leave", "join:lobby"]
        );
        assert_eq!(
            states(&mut rx),
            [
                ConnectionState::Connecting,
                ConnectionState::Failed,
                ConnectionState::Disconnecting,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
    }

    #[tokio::test]
    async fn connect_while_connected_is_a_noop() {
        let (mut m, calls, _rx) = machine(true);
        m.connect(&"lobby".into()).await;
        assert!(!m.connect(&"sports".into()).await);
        assert!(m.connect(&"lobby".into()).await);
        assert_eq!(*calls.lock().unwrap(), ["join:lobby"]);
    }

    #[tokio::test]
    async fn disconnect_when_disconnected_is_a_noop() {
        let (mut m, calls, mut rx) = machine(true);
        m.disconnect().await;
        assert!(calls.lock().unwrap().is_empty());
        assert!(states(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn send_queues_unless_connected_to_selected_room() {
        let (mut m, calls, _rx) = machine(true);
        let lobby = RoomId::from("lobby");
        m.shared.selected.select(lobby.clone());

        let outcome = m.send(&lobby, "early".into()).await;
        assert!(matches!(outcome, SendOutcome::Queued(ref r) if r.sender_id == "Pending..."));

        m.connect(&lobby).await;
        let outcome = m.send(&lobby, "live".into()).await;
        assert!(matches!(outcome, SendOutcome::Sent(ref r) if r.sender_id == "me"));

        assert_eq!(m.pending(&lobby), ["early"]);
        assert_eq!(*calls.lock().unwrap(), ["join:lobby", "send:live"]);
    }

    #[tokio::test]
    async fn drain_stops_when_selection_moves() {
        let (mut m, calls, _rx) = machine(true);
        let lobby = RoomId::from("lobby");
        m.shared.selected.select(lobby.clone());
        m.send(&lobby, "a".into()).await;
        m.send(&lobby, "b".into()).await;
        m.connect(&lobby).await;

        m.shared.selected.select("sports".into());
        assert_eq!(m.drain_into(&lobby).await, 0);
        assert_eq!(m.pending(&lobby), ["a", "b"]);

        m.shared.selected.select(lobby.clone());
        assert_eq!(m.drain_into(&lobby).await, 2);
        assert_eq!(m.drain_into(&lobby).await, 0);
        assert_eq!(
            *calls.lock().unwrap(),
            ["join:lobby", "send:a", "send:b"]
        );
    }

    #[tokio::test]
    async fn stale_switch_without_queued_messages_is_abandoned() {
        let (mut m, calls, mut rx) = machine(true);
        m.shared.selected.select("sports".into());
        m.switch_to(&"lobby".into()).await;
        assert!(calls.lock().unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_switch_keeps_queued_messages_without_joining() {
        let (mut m, calls, mut rx) = machine(true);
        let lobby = RoomId::from("lobby");
        m.shared.selected.select(lobby.clone());
        m.send(&lobby, "q".into()).await;
        while rx.try_recv().is_ok() {}

        m.shared.selected.select("sports".into());
        m.switch_to(&lobby).await;

        assert!(calls.lock().unwrap().is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(m.pending(&lobby), ["q"]);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_cuts_the_history_wait_short() {
        let (mut m, calls, _rx) = machine(true);
        m.debouncer = HistoryDebouncer::new(Duration::from_secs(3600));
        let lobby = RoomId::from("lobby");
        m.shared.selected.select(lobby.clone());
        m.send(&lobby, "queued".into()).await;

        let shared = Arc::clone(&m.shared);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            shared.selected.clear();
            shared.close();
        });

        let started = tokio::time::Instant::now();
        m.switch_to(&lobby).await;
        assert!(started.elapsed() < Duration::from_secs(3600));
        assert_eq!(*calls.lock().unwrap(), ["join:lobby", "send:queued"]);
    }

    #[tokio::test]
    async fn switch_drains_then_fetches_history() {
        let (mut m, calls, _rx) = machine(true);
        let lobby = RoomId::from("lobby");
        m.shared.selected.select(lobby.clone());
        m.send(&lobby, "queued".into()).await;

        m.switch_to(&lobby).await;
        assert_eq!(
            *calls.lock().unwrap(),
            ["join:lobby", "send:queued", "history"]
        );
    }

    #[tokio::test]
    async fn switch_between_rooms_leaves_first() {
        let (mut m, calls, _rx) = machine(true);
        m.shared.selected.select("lobby".into());
        m.switch_to(&"lobby".into()).await;
        m.shared.selected.select("sports".into());
        m.switch_to(&"sports".into()).await;

        assert_eq!(
            *calls.lock().unwrap(),
            ["join:lobby", "history", "leave", "join:sports", "history"]
        );
        assert_eq!(m.shared.active_room(), Some("sports".into()));
    }

    #[tokio::test]
    async fn teardown_disconnects_and_disposes() {
        let (mut m, calls, _rx) = machine(true);
        m.connect(&"lobby".into()).await;
        m.teardown().await;
        assert_eq!(*calls.lock().unwrap(), ["join:lobby", "leave"]);
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }
}

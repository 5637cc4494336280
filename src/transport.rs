//! Backend abstraction for the room session.
//!
//! The [`RoomTransport`] trait models a callback-driven real-time backend:
//! every request method returns as soon as the request has been *issued*,
//! and the outcome arrives later through the [`TransportCallbacks`] handed
//! to the transport in [`attach`](RoomTransport::attach), on whatever thread
//! the backend uses.
//!
//! | Request                                         | Resolved by                          |
//! |-------------------------------------------------|--------------------------------------|
//! | [`join_room`](RoomTransport::join_room)         | [`TransportCallbacks::room_connected`] |
//! | [`leave_room`](RoomTransport::leave_room)       | [`TransportCallbacks::room_disconnected`] |
//! | [`send_message`](RoomTransport::send_message)   | nothing, or [`TransportCallbacks::send_failed`] |
//! | [`fetch_history`](RoomTransport::fetch_history) | [`TransportCallbacks::history_received`] |
//!
//! The session guarantees that join and leave are never issued while a
//! previous one is unresolved, and that every request comes from a single
//! worker task.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use roomsync_client::{RoomId, RoomTransport, SessionError, TransportCallbacks};
//!
//! struct MyBackend { callbacks: Option<TransportCallbacks> }
//!
//! #[async_trait]
//! impl RoomTransport for MyBackend {
//!     fn attach(&mut self, callbacks: TransportCallbacks) {
//!         self.callbacks = Some(callbacks);
//!     }
//!
//!     fn local_peer_id(&self) -> String {
//!         "me".into()
//!     }
//!
//!     async fn join_room(&mut self, room: &RoomId) -> Result<(), SessionError> {
//!         // Issue the join; call `callbacks.room_connected(..)` when it settles.
//!         todo!()
//!     }
//!
//!     async fn leave_room(&mut self) -> Result<(), SessionError> {
//!         todo!()
//!     }
//!
//!     async fn send_message(&mut self, payload: &str) -> Result<(), SessionError> {
//!         todo!()
//!     }
//!
//!     async fn fetch_history(&mut self) -> Result<(), SessionError> {
//!         todo!()
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::event::{EventSink, SessionEvent};
use crate::gate::{ConnectionGate, Resolution};
use crate::message::{now_millis, MessageRecord, RoomId};
use crate::state::SharedState;

/// A callback-driven chat backend.
///
/// # Object Safety
///
/// This trait is object-safe, so `Box<dyn RoomTransport>` works for dynamic
/// dispatch. [`RoomSession::start`](crate::RoomSession::start) accepts
/// `impl RoomTransport` for the common case.
#[async_trait]
pub trait RoomTransport: Send + 'static {
    /// Receive the callback handle. Called once, before any request.
    fn attach(&mut self, callbacks: TransportCallbacks);

    /// Identifier of the local peer, used as the sender of local messages.
    fn local_peer_id(&self) -> String;

    /// Ask the backend to join `room`.
    ///
    /// # Errors
    ///
    /// An error means the request was never issued; the session then treats
    /// the join as failed without waiting for a callback.
    async fn join_room(&mut self, room: &RoomId) -> Result<(), SessionError>;

    /// Ask the backend to leave the current room.
    ///
    /// # Errors
    ///
    /// An error means the request was never issued; the session still ends
    /// in `Disconnected`.
    async fn leave_room(&mut self) -> Result<(), SessionError>;

    /// Hand one message to the backend. Fire-and-forget: delivery failures
    /// are reported later via [`TransportCallbacks::send_failed`].
    ///
    /// # Errors
    ///
    /// An error means the message was not accepted; the session reports it
    /// as a send failure and does not re-queue it.
    async fn send_message(&mut self, payload: &str) -> Result<(), SessionError>;

    /// Ask the backend for the stored history of the current room.
    ///
    /// # Errors
    ///
    /// An error means the request was not issued.
    async fn fetch_history(&mut self) -> Result<(), SessionError>;

    /// Release backend resources when the session ends.
    ///
    /// # Errors
    ///
    /// Failures are logged by the session; resources should be released
    /// regardless.
    async fn dispose(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Handle a transport uses to report outcomes back to the session.
///
/// Cheap to clone, `Send + Sync`, callable from any thread. Terminal
/// callbacks that arrive when no transition is in flight are logged and
/// ignored.
#[derive(Clone)]
pub struct TransportCallbacks {
    gate: Arc<ConnectionGate>,
    shared: Arc<SharedState>,
    events: EventSink,
}

impl TransportCallbacks {
    pub(crate) fn new(gate: Arc<ConnectionGate>, shared: Arc<SharedState>, events: EventSink) -> Self {
        Self {
            gate,
            shared,
            events,
        }
    }

    /// The pending join finished, successfully or not.
    pub fn room_connected(&self, success: bool) {
        debug!(success, "transport: room connected callback");
        self.gate.resolve(Resolution::Joined { success });
    }

    /// The pending leave finished.
    pub fn room_disconnected(&self) {
        debug!("transport: room disconnected callback");
        self.gate.resolve(Resolution::Left);
    }

    /// The backend answered a history request.
    pub fn history_received(&self, messages: Vec<MessageRecord>) {
        debug!(count = messages.len(), "transport: stored messages received");
        self.events.emit(SessionEvent::HistoryReceived {
            room: self.shared.active_room(),
            messages,
        });
    }

    /// A remote peer sent a message. A missing timestamp is stamped with
    /// the local clock.
    pub fn message_received(
        &self,
        sender_id: impl Into<String>,
        data: impl Into<String>,
        timestamp: Option<i64>,
    ) {
        let record = MessageRecord::new(sender_id, data, timestamp.unwrap_or_else(now_millis));
        self.events.emit(SessionEvent::MessageAppended(record));
    }

    /// A previously sent message could not be delivered.
    pub fn send_failed(&self, reason: Option<String>) {
        warn!(?reason, "transport: message sending failed");
        self.events.emit(SessionEvent::SendFailed { reason });
    }

    /// A remote peer entered the active room.
    pub fn peer_joined(&self, peer_id: &str) {
        if let Some(peers) = self.shared.update_peers(peer_id, true) {
            self.events.emit(SessionEvent::RemotePeersChanged(peers));
        }
    }

    /// A remote peer left the active room.
    pub fn peer_left(&self, peer_id: &str) {
        if let Some(peers) = self.shared.update_peers(peer_id, false) {
            self.events.emit(SessionEvent::RemotePeersChanged(peers));
        }
    }
}

impl std::fmt::Debug for TransportCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCallbacks")
            .field("transition_in_flight", &self.gate.is_armed())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn callbacks() -> (
        TransportCallbacks,
        Arc<ConnectionGate>,
        mpsc::Receiver<SessionEvent>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let gate = Arc::new(ConnectionGate::new());
        let shared = Arc::new(SharedState::new());
        let cbs = TransportCallbacks::new(Arc::clone(&gate), shared, EventSink::new(tx));
        (cbs, gate, rx)
    }

    #[test]
    fn transport_callbacks_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TransportCallbacks>();
    }

    #[test]
    fn room_transport_is_object_safe() {
        fn assert_object_safe(_: Option<Box<dyn RoomTransport>>) {}
        assert_object_safe(None);
    }

    #[tokio::test]
    async fn room_connected_resolves_the_armed_gate() {
        let (cbs, gate, _rx) = callbacks();
        let waiter = gate.arm().unwrap();
        cbs.room_connected(false);
        assert_eq!(
            waiter.wait(None).await,
            crate::gate::GateOutcome::Resolved(Resolution::Joined { success: false })
        );
    }

    #[test]
    fn unsolicited_disconnect_is_ignored() {
        let (cbs, gate, _rx) = callbacks();
        cbs.room_disconnected();
        assert!(!gate.is_armed());
    }

    #[tokio::test]
    async fn remote_message_without_timestamp_is_stamped() {
        let (cbs, _gate, mut rx) = callbacks();
        cbs.message_received("peer-9", "yo", None);
        match rx.recv().await.unwrap() {
            SessionEvent::MessageAppended(record) => {
                assert_eq!(record.sender_id, "peer-9");
                assert!(record.timestamp > 0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn peer_changes_emit_sorted_lists() {
        let (cbs, _gate, mut rx) = callbacks();
        cbs.peer_joined("zed");
        cbs.peer_joined("amy");
        cbs.peer_joined("amy");
        cbs.peer_left("zed");

        let mut lists = Vec::new();
        while let Ok(SessionEvent::RemotePeersChanged(peers)) = rx.try_recv() {
            lists.push(peers);
        }
        assert_eq!(
            lists,
            vec![
                vec!["zed".to_owned()],
                vec!["amy".to_owned(), "zed".to_owned()],
                vec!["amy".to_owned()],
            ]
        );
    }
}

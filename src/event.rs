//! Events delivered to the presentation layer.
//!
//! All events are advisory: the consumer must tolerate any interleaving
//! relative to its own render cycle.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::{MessageRecord, RoomId};
use crate::state::ConnectionState;

/// Notification emitted by a [`RoomSession`](crate::RoomSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection state changed. `room` is the room the transition
    /// concerns (the last room joined or attempted).
    ConnectionStateChanged {
        state: ConnectionState,
        room: Option<RoomId>,
    },
    /// A message should be appended to the transcript: a local send, a
    /// queued (pending) message, or a message from a remote peer.
    MessageAppended(MessageRecord),
    /// The backend returned its stored history for the active room.
    HistoryReceived {
        room: Option<RoomId>,
        messages: Vec<MessageRecord>,
    },
    /// The transport reported that a message could not be delivered.
    /// The message is not re-queued.
    SendFailed { reason: Option<String> },
    /// A room transition started (`true`) or finished (`false`).
    Waiting(bool),
    /// The set of remote peers in the active room changed (sorted).
    RemotePeersChanged(Vec<String>),
    /// The local cache could not be read; an empty history was used instead.
    CacheReadFailed { room: RoomId, reason: String },
    /// The session worker stopped. The last event the worker emits; a
    /// transport may still deliver late callback events until it is dropped.
    Closed,
}

/// Sender half of the bounded event channel.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Emit without blocking. If the channel is full the event is dropped
    /// with a warning so neither the worker nor a transport thread stalls.
    pub(crate) fn emit(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(event = ?dropped, "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }

    /// Emit [`SessionEvent::Closed`], waiting for capacity; it must never be
    /// dropped.
    pub(crate) async fn emit_closed(&self) {
        if self.tx.send(SessionEvent::Closed).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        sink.emit(SessionEvent::Waiting(true));
        sink.emit(SessionEvent::Waiting(false));
        assert_eq!(rx.recv().await, Some(SessionEvent::Waiting(true)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_after_receiver_dropped_is_silent() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let sink = EventSink::new(tx);
        sink.emit(SessionEvent::Waiting(true));
        sink.emit_closed().await;
    }
}

//! WebSocket room transport using `tokio-tungstenite`.
//!
//! [`WebSocketRoomTransport`] speaks the relay [`protocol`](crate::protocol)
//! over a single WebSocket connection. Requests are written to the sink half
//! of the stream; a reader task spawned in
//! [`attach`](RoomTransport::attach) decodes server frames and reports them
//! through the session's [`TransportCallbacks`]. Both `ws://` and `wss://`
//! URLs are supported via [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), roomsync_client::SessionError> {
//! use roomsync_client::{DisabledCache, RoomSession, SessionConfig, WebSocketRoomTransport};
//!
//! let transport = WebSocketRoomTransport::connect("ws://localhost:3536/ws").await?;
//! let (session, mut events) =
//!     RoomSession::start(transport, DisabledCache, SessionConfig::new(["lobby"]));
//! session.select_room("lobby")?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::SessionError;
use crate::message::RoomId;
use crate::protocol::{ClientMessage, PeerId, ServerMessage};
use crate::state::lock;
use crate::transport::{RoomTransport, TransportCallbacks};

/// Type alias for the underlying WebSocket stream.
///
/// Public so that callers can build a [`WebSocketRoomTransport`] from an
/// existing stream via [`WebSocketRoomTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Sender id reported before the relay has assigned a peer id.
const UNASSIGNED_PEER_ID: &str = "local";

/// A [`RoomTransport`] backed by a WebSocket connection to a relay server.
///
/// Construct with [`connect`](Self::connect), or with
/// [`from_stream`](Self::from_stream) for custom TLS, proxies or headers.
pub struct WebSocketRoomTransport {
    sink: SplitSink<WsStream, Message>,
    /// Read half, moved into the reader task on `attach`.
    stream: Option<SplitStream<WsStream>>,
    reader: Option<JoinHandle<()>>,
    /// Id assigned by the relay in its last `RoomJoined`.
    peer_id: Arc<Mutex<Option<PeerId>>>,
    /// Whether sent messages are stored for later history requests.
    persist: bool,
    closed: bool,
}

impl WebSocketRoomTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the URL is invalid or the connection
    /// cannot be established. An underlying I/O error keeps its
    /// [`ErrorKind`](std::io::ErrorKind); other failures map to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        tracing::debug!(url = %url, "connecting to relay");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            SessionError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "relay connection established");
        Ok(Self::from_stream(stream))
    }

    /// Establish a new WebSocket connection with a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] if the deadline elapses, or any
    /// error that [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, SessionError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| SessionError::Timeout)?
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        let (sink, stream) = stream.split();
        Self {
            sink,
            stream: Some(stream),
            reader: None,
            peer_id: Arc::new(Mutex::new(None)),
            persist: true,
            closed: false,
        }
    }

    /// Choose whether the relay stores sent messages for history requests.
    /// Defaults to `true`.
    #[must_use]
    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    async fn send_frame(&mut self, message: &ClientMessage) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::TransportClosed);
        }
        let json = serde_json::to_string(message)?;
        self.sink
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SessionError::TransportRequest(e.to_string()))
    }
}

#[async_trait]
impl RoomTransport for WebSocketRoomTransport {
    fn attach(&mut self, callbacks: TransportCallbacks) {
        let Some(stream) = self.stream.take() else {
            tracing::warn!("relay transport attached twice, ignoring");
            return;
        };
        let peer_id = Arc::clone(&self.peer_id);
        self.reader = Some(tokio::spawn(read_loop(stream, callbacks, peer_id)));
    }

    fn local_peer_id(&self) -> String {
        lock(&self.peer_id).map_or_else(|| UNASSIGNED_PEER_ID.to_owned(), |id| id.to_string())
    }

    async fn join_room(&mut self, room: &RoomId) -> Result<(), SessionError> {
        self.send_frame(&ClientMessage::JoinRoom { room: room.clone() })
            .await
    }

    async fn leave_room(&mut self) -> Result<(), SessionError> {
        self.send_frame(&ClientMessage::LeaveRoom).await
    }

    async fn send_message(&mut self, payload: &str) -> Result<(), SessionError> {
        let persist = self.persist;
        self.send_frame(&ClientMessage::SendMessage {
            data: payload.to_owned(),
            persist,
        })
        .await
    }

    async fn fetch_history(&mut self) -> Result<(), SessionError> {
        self.send_frame(&ClientMessage::GetStoredMessages).await
    }

    async fn dispose(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self
            .sink
            .close()
            .await
            .map_err(|e| SessionError::TransportRequest(e.to_string()));
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        result
    }
}

impl std::fmt::Debug for WebSocketRoomTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketRoomTransport")
            .field("peer_id", &*lock(&self.peer_id))
            .field("attached", &self.reader.is_some())
            .field("persist", &self.persist)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for WebSocketRoomTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

// ── Reader task ─────────────────────────────────────────────────────

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    callbacks: TransportCallbacks,
    peer_id: Arc<Mutex<Option<PeerId>>>,
) {
    while let Some(frame) = stream.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("relay connection error: {e}");
                break;
            }
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(server_msg) => dispatch(server_msg, &callbacks, &peer_id),
                Err(e) => tracing::warn!("failed to parse relay frame: {e}"),
            },
            Message::Close(frame) => {
                tracing::debug!(?frame, "received relay close frame");
                break;
            }
            Message::Binary(_) => {
                tracing::warn!("received unexpected binary frame, skipping");
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    // Unblocks a join or leave still waiting on the relay. Ignored when
    // nothing is in flight.
    tracing::info!("relay connection closed");
    callbacks.room_disconnected();
}

/// Report one decoded server frame to the session.
pub(crate) fn dispatch(
    msg: ServerMessage,
    callbacks: &TransportCallbacks,
    peer_id: &Mutex<Option<PeerId>>,
) {
    match msg {
        ServerMessage::RoomJoined {
            peer_id: assigned,
            room,
            peers,
        } => {
            tracing::debug!(room = %room, peer_id = %assigned, peers = peers.len(), "joined room");
            *lock(peer_id) = Some(assigned);
            for peer in peers {
                callbacks.peer_joined(&peer.to_string());
            }
            callbacks.room_connected(true);
        }
        ServerMessage::JoinFailed {
            message,
            error_code,
        } => {
            tracing::warn!(?error_code, "join failed: {message}");
            callbacks.room_connected(false);
        }
        ServerMessage::RoomLeft => callbacks.room_disconnected(),
        ServerMessage::PeerJoined { peer_id } => callbacks.peer_joined(&peer_id.to_string()),
        ServerMessage::PeerLeft { peer_id } => callbacks.peer_left(&peer_id.to_string()),
        ServerMessage::Message(record) => {
            callbacks.message_received(record.sender_id, record.data, Some(record.timestamp));
        }
        ServerMessage::StoredMessages { messages } => callbacks.history_received(messages),
        ServerMessage::SendFailed {
            message,
            error_code,
        } => {
            let reason = match error_code {
                Some(code) => format!("{message} ({code})"),
                None => message,
            };
            callbacks.send_failed(Some(reason));
        }
        ServerMessage::Error {
            message,
            error_code,
        } => {
            tracing::warn!(?error_code, "relay error: {message}");
        }
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::event::{EventSink, SessionEvent};
    use crate::gate::{ConnectionGate, GateOutcome, Resolution};
    use crate::message::MessageRecord;
    use crate::state::SharedState;
    use tokio::net::TcpListener;
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
    fn websocket_room_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketRoomTransport>();
    }

    #[tokio::test]
    async fn room_joined_records_peer_id_and_resolves_join() {
        let (cbs, gate, mut rx) = callbacks();
        let peer_id = Mutex::new(None);
        let me = PeerId::new_v4();
        let other = PeerId::new_v4();
        let waiter = gate.arm().unwrap();

        dispatch(
            ServerMessage::RoomJoined {
                peer_id: me,
                room: "lobby".into(),
                peers: vec![other],
            },
            &cbs,
            &peer_id,
        );

        assert_eq!(*peer_id.lock().unwrap(), Some(me));
        assert_eq!(
            waiter.wait(None).await,
            GateOutcome::Resolved(Resolution::Joined { success: true })
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::RemotePeersChanged(vec![other.to_string()])
        );
    }

    #[tokio::test]
    async fn join_failed_resolves_as_failure() {
        let (cbs, gate, _rx) = callbacks();
        let waiter = gate.arm().unwrap();
        dispatch(
            ServerMessage::JoinFailed {
                message: "nope".into(),
                error_code: Some(crate::ErrorCode::RoomFull),
            },
            &cbs,
            &Mutex::new(None),
        );
        assert_eq!(
            waiter.wait(None).await,
            GateOutcome::Resolved(Resolution::Joined { success: false })
        );
    }

    #[tokio::test]
    async fn send_failed_carries_reason() {
        let (cbs, _gate, mut rx) = callbacks();
        dispatch(
            ServerMessage::SendFailed {
                message: "too big".into(),
                error_code: None,
            },
            &cbs,
            &Mutex::new(None),
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::SendFailed {
                reason: Some("too big".into())
            }
        );
    }

    #[tokio::test]
    async fn stored_messages_become_history() {
        let (cbs, _gate, mut rx) = callbacks();
        let records = vec![MessageRecord::new("p", "old", 1)];
        dispatch(
            ServerMessage::StoredMessages {
                messages: records.clone(),
            },
            &cbs,
            &Mutex::new(None),
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::HistoryReceived {
                room: None,
                messages: records
            }
        );
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketRoomTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Io(_)));
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Non-routable address.
        let err = WebSocketRoomTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            std::time::Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::Timeout));
    }

    // ── Mock relay ───────────────────────────────────────────────────

    /// Minimal relay: answers joins, leaves and history requests, and
    /// forwards every client frame it receives to the returned channel.
    async fn start_mock_relay(
        history: Vec<MessageRecord>,
    ) -> (String, mpsc::UnboundedReceiver<ClientMessage>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let msg: ClientMessage = serde_json::from_str(&text).unwrap();
                let reply = match &msg {
                    ClientMessage::JoinRoom { room } => Some(ServerMessage::RoomJoined {
                        peer_id: PeerId::new_v4(),
                        room: room.clone(),
                        peers: Vec::new(),
                    }),
                    ClientMessage::LeaveRoom => Some(ServerMessage::RoomLeft),
                    ClientMessage::GetStoredMessages => Some(ServerMessage::StoredMessages {
                        messages: history.clone(),
                    }),
                    ClientMessage::SendMessage { .. } => None,
                };
                let _ = seen_tx.send(msg);
                if let Some(reply) = reply {
                    let json = serde_json::to_string(&reply).unwrap();
                    ws.send(Message::Text(json.into())).await.unwrap();
                }
            }
        });

        (format!("ws://{addr}"), seen_rx)
    }

    #[tokio::test]
    async fn session_over_websocket_joins_sends_and_fetches_history() {
        use crate::cache::DisabledCache;
        use crate::config::SessionConfig;
        use crate::session::RoomSession;
        use crate::state::ConnectionState;

        let history = vec![MessageRecord::new("peer", "earlier", 5)];
        let (url, mut seen) = start_mock_relay(history.clone()).await;
        let transport = WebSocketRoomTransport::connect(&url).await.unwrap();
        let config = SessionConfig::new(["lobby"])
            .with_history_quiescence(std::time::Duration::ZERO)
            .with_transition_timeout(std::time::Duration::from_secs(5));
        let (mut session, mut events) = RoomSession::start(transport, DisabledCache, config);

        session.select_room("lobby").unwrap();
        session.send("hi").unwrap();
        session.settle().await.unwrap();

        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert_eq!(
            seen.recv().await.unwrap(),
            ClientMessage::JoinRoom {
                room: "lobby".into()
            }
        );
        // The switch finishes (history included) before the send runs.
        assert_eq!(seen.recv().await.unwrap(), ClientMessage::GetStoredMessages);
        assert_eq!(
            seen.recv().await.unwrap(),
            ClientMessage::SendMessage {
                data: "hi".into(),
                persist: true
            }
        );

        let mut got_history = None;
        while let Some(event) = events.recv().await {
            if let SessionEvent::HistoryReceived { messages, .. } = event {
                got_history = Some(messages);
                break;
            }
        }
        assert_eq!(got_history, Some(history));

        session.shutdown().await;
        assert_eq!(seen.recv().await.unwrap(), ClientMessage::LeaveRoom);
    }
}

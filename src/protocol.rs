//! Wire types for the relay protocol spoken by
//! [`WebSocketRoomTransport`](crate::transports::WebSocketRoomTransport).
//!
//! Every frame is a JSON text message, adjacently tagged as
//! `{"type": "<Variant>", "data": { ... }}`. Unit variants carry no `data`.
//! Message records keep the `senderId` / `data` / `timeStamp` keys used by
//! the stored history format.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_codes::ErrorCode;
use crate::message::{MessageRecord, RoomId};

/// Unique identifier the relay assigns to each connected peer.
pub type PeerId = Uuid;

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Join a room. The server answers with `RoomJoined` or `JoinFailed`.
    JoinRoom { room: RoomId },
    /// Leave the current room. The server answers with `RoomLeft`.
    LeaveRoom,
    /// Broadcast a message to the current room.
    SendMessage {
        data: String,
        /// Whether the server should keep the message for history requests.
        #[serde(default = "default_persist")]
        persist: bool,
    },
    /// Request the stored history of the current room.
    GetStoredMessages,
}

fn default_persist() -> bool {
    true
}

/// Message types sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// Successfully joined a room.
    RoomJoined {
        /// Id assigned to this client for the lifetime of the connection.
        peer_id: PeerId,
        room: RoomId,
        /// Peers already in the room.
        #[serde(default)]
        peers: Vec<PeerId>,
    },
    /// Failed to join a room.
    JoinFailed {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    /// Successfully left the room.
    RoomLeft,
    /// Another peer joined the room.
    PeerJoined { peer_id: PeerId },
    /// Another peer left the room.
    PeerLeft { peer_id: PeerId },
    /// A message from another peer.
    Message(MessageRecord),
    /// Stored history of the current room, in any order.
    StoredMessages { messages: Vec<MessageRecord> },
    /// A message sent by this client could not be delivered.
    SendFailed {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    /// Error not tied to a specific request.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn unit_variants_carry_no_data() {
        let json = serde_json::to_string(&ClientMessage::LeaveRoom).unwrap();
        assert_eq!(json, r#"{"type":"LeaveRoom"}"#);
    }

    #[test]
    fn send_message_persists_by_default() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"SendMessage","data":{"data":"hi"}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SendMessage {
                data: "hi".into(),
                persist: true
            }
        );
    }

    #[test]
    fn message_frame_uses_record_keys() {
        let json = r#"{"type":"Message","data":{"senderId":"p1","data":"yo","timeStamp":42}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg, ServerMessage::Message(MessageRecord::new("p1", "yo", 42)));
    }
}

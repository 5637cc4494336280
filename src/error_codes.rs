//! Error codes for structured error handling in the relay protocol.
//!
//! Codes serialize as `SCREAMING_SNAKE_CASE` strings (e.g. `"ROOM_FULL"`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes returned by the relay server.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Request errors
    InvalidInput,
    InvalidRoomName,
    MessageTooLarge,

    // Room errors
    RoomNotFound,
    RoomFull,
    AlreadyInRoom,
    NotInRoom,

    // Rate limiting
    RateLimitExceeded,

    // Server errors
    InternalError,
    StorageUnavailable,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Text suitable for showing next to a failed message.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidInput => {
                "The request was invalid or malformed. Check the message format."
            }
            Self::InvalidRoomName => {
                "The room name is invalid. Room names must be non-empty."
            }
            Self::MessageTooLarge => {
                "The message exceeds the maximum allowed size. Please send a shorter message."
            }

            Self::RoomNotFound => {
                "The requested room does not exist on this server."
            }
            Self::RoomFull => "The room has reached its maximum capacity. Try another room.",
            Self::AlreadyInRoom => {
                "You are already in a room. Leave it before joining another."
            }
            Self::NotInRoom => {
                "You are not in any room. Join a room before sending messages or requesting history."
            }

            Self::RateLimitExceeded => {
                "The relay is throttling this connection. Wait before sending again."
            }

            Self::InternalError => {
                "An internal server error occurred. Please try again later."
            }
            Self::StorageUnavailable => {
                "Message storage is temporarily unavailable. History may be incomplete."
            }
            Self::ServiceUnavailable => {
                "The relay is not accepting room traffic right now. Reconnect later."
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

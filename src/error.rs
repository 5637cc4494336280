//! Error types for the room session coordinator.

use thiserror::Error;

/// Errors that can occur when driving a [`RoomSession`](crate::RoomSession).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session has been shut down (or its worker exited) and no longer
    /// accepts work.
    #[error("session closed")]
    SessionClosed,

    /// The room is not part of the room set fixed at session start.
    #[error("unknown room: {0}")]
    UnknownRoom(String),

    /// A message was submitted before any room was selected.
    #[error("no room selected")]
    NoRoomSelected,

    /// A transition was started while another one was still outstanding.
    #[error("a room transition is already in flight")]
    GateBusy,

    /// The transport refused to issue a request.
    #[error("transport request failed: {0}")]
    TransportRequest(String),

    /// The transport connection is closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// The local message cache could not be read.
    #[error("message cache error: {0}")]
    Cache(String),

    /// Failed to serialize or deserialize a message or protocol frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for room session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

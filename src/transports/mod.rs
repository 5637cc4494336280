//! Concrete [`RoomTransport`](crate::RoomTransport) implementations behind
//! feature gates.
//!
//! | Feature                | Transport                  |
//! |------------------------|----------------------------|
//! | `transport-websocket`  | [`WebSocketRoomTransport`] |

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketRoomTransport;

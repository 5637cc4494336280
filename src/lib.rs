//! # Roomsync Client
//!
//! Room-scoped chat session coordinator for callback-driven real-time
//! backends.
//!
//! A [`RoomSession`] lets a user pick one chat room out of a fixed set and
//! keeps the backend connected to exactly that room, even when the user
//! switches rooms faster than the backend can join and leave them.
//!
//! ## Features
//!
//! - **Serialized transitions**: every join, leave, send and history request
//!   runs on one worker task, one at a time
//! - **Latest selection wins**: room switches that were overtaken by a newer
//!   selection abandon themselves
//! - **Offline queues**: messages sent before the room is connected are kept
//!   per room and replayed in order once it is
//! - **Transport-agnostic**: implement [`RoomTransport`] for any backend;
//!   the default `transport-websocket` feature provides
//!   `WebSocketRoomTransport` for the relay [`protocol`]
//! - **Event-driven**: outcomes arrive as [`SessionEvent`]s on a channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use roomsync_client::{MemoryCache, RoomSession, SessionConfig, SessionEvent, WebSocketRoomTransport};
//!
//! let transport = WebSocketRoomTransport::connect("ws://localhost:3536/ws").await?;
//! let config = SessionConfig::new(["lobby", "sports", "news"]);
//! let (mut session, mut events) = RoomSession::start(transport, MemoryCache::new(), config);
//!
//! let cached = session.select_room("lobby")?;
//! session.send("hello")?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! session.shutdown().await;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod error_codes;
pub mod event;
mod gate;
pub mod history;
mod machine;
pub mod message;
pub mod protocol;
mod queue;
mod selection;
pub mod session;
pub mod state;
pub mod transport;
#[cfg(feature = "transport-websocket")]
pub mod transports;
mod worker;

// Re-export primary types for ergonomic imports.
pub use cache::{DisabledCache, MemoryCache, MessageCache};
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use error_codes::ErrorCode;
pub use event::SessionEvent;
pub use message::{parse_history, MessageRecord, RoomId, Transcript};
pub use protocol::{ClientMessage, ServerMessage};
pub use session::RoomSession;
pub use state::ConnectionState;
pub use transport::{RoomTransport, TransportCallbacks};

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketRoomTransport;

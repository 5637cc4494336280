//! Session configuration.

use std::time::Duration;

use crate::history::DEFAULT_HISTORY_QUIESCENCE;
use crate::message::RoomId;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Sender label shown for messages waiting in an offline queue.
pub const DEFAULT_PENDING_SENDER_LABEL: &str = "Pending...";

/// Configuration for a [`RoomSession`](crate::RoomSession).
///
/// # Example
///
/// ```
/// use roomsync_client::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new(["lobby", "sports", "news"])
///     .with_history_quiescence(Duration::from_secs(2))
///     .with_transition_timeout(Duration::from_secs(30));
/// assert_eq!(config.rooms.len(), 3);
/// assert_eq!(config.transition_timeout, Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rooms the user may select. Fixed for the lifetime of the session.
    /// Empty means any room is accepted.
    pub rooms: Vec<RoomId>,
    /// Quiet period between replaying queued messages and requesting the
    /// server history.
    ///
    /// Defaults to **5 seconds**. Zero requests history right away.
    pub history_quiescence: Duration,
    /// Upper bound on a single join or leave. `None` waits for the transport
    /// indefinitely.
    ///
    /// When set, a join that does not resolve in time ends in
    /// [`Failed`](crate::ConnectionState::Failed) and a leave in
    /// [`Disconnected`](crate::ConnectionState::Disconnected).
    pub transition_timeout: Option<Duration>,
    /// Sender id used for records of messages still in an offline queue.
    pub pending_sender_label: String,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) so the worker never blocks. The final `Closed` event is
    /// always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time the worker is given to finish teardown on
    /// [`RoomSession::shutdown`](crate::RoomSession::shutdown) before it is
    /// aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration for the given room set with default values.
    pub fn new<I, R>(rooms: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RoomId>,
    {
        Self {
            rooms: rooms.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the quiet period before requesting history after replayed sends.
    #[must_use]
    pub fn with_history_quiescence(mut self, quiescence: Duration) -> Self {
        self.history_quiescence = quiescence;
        self
    }

    /// Bound every join and leave by `timeout`.
    #[must_use]
    pub fn with_transition_timeout(mut self, timeout: Duration) -> Self {
        self.transition_timeout = Some(timeout);
        self
    }

    /// Set the sender label of pending messages.
    #[must_use]
    pub fn with_pending_sender_label(mut self, label: impl Into<String>) -> Self {
        self.pending_sender_label = label.into();
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Returns `true` if `room` may be selected.
    pub fn allows(&self, room: &RoomId) -> bool {
        self.rooms.is_empty() || self.rooms.contains(room)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rooms: Vec::new(),
            history_quiescence: DEFAULT_HISTORY_QUIESCENCE,
            transition_timeout: None,
            pending_sender_label: DEFAULT_PENDING_SENDER_LABEL.to_owned(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

//! Connection state and the state shared between the session handle, the
//! worker and transport callbacks.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::message::RoomId;
use crate::selection::SelectedRoom;

/// Connection state of the session. Exactly one value holds at any time.
///
/// ```text
/// Disconnected ──→ Connecting ──→ Connected ──→ Disconnecting ──→ Disconnected
///                       │                            ▲
///                       └──────→ Failed ─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    /// Returns `true` if `self → next` is one of the legal edges.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Disconnecting, Failed};
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected | Failed)
                | (Connected | Failed, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }

    /// Returns `true` while a transport transition is outstanding.
    pub fn is_transitioning(self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Disconnecting => 3,
            Self::Failed => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnecting,
            4 => Self::Failed,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-lock a std `RwLock`, recovering the data if a writer panicked.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write-lock a std `RwLock`, recovering the data if a writer panicked.
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ── Shared state ────────────────────────────────────────────────────

/// State read by the handle and callbacks, written by the worker.
///
/// The worker is the only writer of `connection` and `active_room`;
/// `selected` is written by the handle. Peers are written by callbacks.
pub(crate) struct SharedState {
    connection: AtomicU8,
    active_room: Mutex<Option<RoomId>>,
    pub(crate) selected: SelectedRoom,
    peers: Mutex<BTreeSet<String>>,
    open: AtomicBool,
    closing: Notify,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            connection: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            active_room: Mutex::new(None),
            selected: SelectedRoom::new(),
            peers: Mutex::new(BTreeSet::new()),
            open: AtomicBool::new(true),
            closing: Notify::new(),
        }
    }

    pub(crate) fn connection(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection.load(Ordering::Acquire))
    }

    pub(crate) fn set_connection(&self, state: ConnectionState) {
        self.connection.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn active_room(&self) -> Option<RoomId> {
        lock(&self.active_room).clone()
    }

    pub(crate) fn set_active_room(&self, room: Option<RoomId>) {
        *lock(&self.active_room) = room;
    }

    /// Returns `true` if connected and the active room is `room`.
    pub(crate) fn is_connected_to(&self, room: &RoomId) -> bool {
        self.connection() == ConnectionState::Connected
            && lock(&self.active_room).as_ref() == Some(room)
    }

    /// Apply a peer change; returns the new sorted list if it changed.
    pub(crate) fn update_peers(&self, peer_id: &str, joined: bool) -> Option<Vec<String>> {
        let mut peers = lock(&self.peers);
        let changed = if joined {
            peers.insert(peer_id.to_owned())
        } else {
            peers.remove(peer_id)
        };
        changed.then(|| peers.iter().cloned().collect())
    }

    /// Forget every peer; returns `true` if any were known.
    pub(crate) fn clear_peers(&self) -> bool {
        let mut peers = lock(&self.peers);
        let had_peers = !peers.is_empty();
        peers.clear();
        had_peers
    }

    pub(crate) fn peers(&self) -> Vec<String> {
        lock(&self.peers).iter().cloned().collect()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.closing.notify_waiters();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub(crate) async fn closed(&self) {
        let mut notified = std::pin::pin!(self.closing.notified());
        // Register before checking the flag so a concurrent close is not missed.
        notified.as_mut().enable();
        if !self.is_open() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use ConnectionState::{Connected, Connecting, Disconnected, Disconnecting, Failed};

    const ALL: [ConnectionState; 5] = [Disconnected, Connecting, Connected, Disconnecting, Failed];

    #[test]
    fn only_documented_edges_are_legal() {
        let legal = [
            (Disconnected, Connecting),
            (Connecting, Connected),
            (Connecting, Failed),
            (Connected, Disconnecting),
            (Failed, Disconnecting),
            (Disconnecting, Disconnected),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn atomic_encoding_round_trips() {
        let shared = SharedState::new();
        for state in ALL {
            shared.set_connection(state);
            assert_eq!(shared.connection(), state);
        }
    }

    #[test]
    fn is_connected_to_requires_both_state_and_room() {
        let shared = SharedState::new();
        let lobby = RoomId::from("lobby");
        shared.set_active_room(Some(lobby.clone()));
        shared.set_connection(Connecting);
        assert!(!shared.is_connected_to(&lobby));
        shared.set_connection(Connected);
        assert!(shared.is_connected_to(&lobby));
        assert!(!shared.is_connected_to(&RoomId::from("sports")));
    }

    #[test]
    fn peer_updates_report_changes_only() {
        let shared = SharedState::new();
        assert_eq!(shared.update_peers("b", true), Some(vec!["b".to_owned()]));
        assert_eq!(
            shared.update_peers("a", true),
            Some(vec!["a".to_owned(), "b".to_owned()])
        );
        assert_eq!(shared.update_peers("a", true), None);
        assert_eq!(shared.update_peers("zzz", false), None);
        assert!(shared.clear_peers());
        assert!(!shared.clear_peers());
        assert!(shared.peers().is_empty());
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(Failed.to_string(), "failed");
        assert_eq!(serde_json::to_string(&Disconnecting).unwrap(), "\"disconnecting\"");
    }

    #[tokio::test]
    async fn closed_resolves_for_waiters_and_latecomers() {
        let shared = std::sync::Arc::new(SharedState::new());
        let waiter = {
            let shared = std::sync::Arc::clone(&shared);
            tokio::spawn(async move { shared.closed().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        shared.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // Already closed: returns at once.
        shared.closed().await;
    }
}

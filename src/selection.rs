//! The user's most recent room choice.
//!
//! Written from the caller's thread the moment a room is picked, read by the
//! worker at each staleness checkpoint. A transition whose room no longer
//! matches the selection is stale and skips its remaining effects.

use std::sync::RwLock;

use crate::message::RoomId;
use crate::state::{read, write};

/// Thread-safe cell holding the Selected Room.
#[derive(Debug, Default)]
pub(crate) struct SelectedRoom {
    room: RwLock<Option<RoomId>>,
}

impl SelectedRoom {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a new selection, returning the previous one.
    pub(crate) fn select(&self, room: RoomId) -> Option<RoomId> {
        write(&self.room).replace(room)
    }

    /// Forget the selection so any queued transition becomes stale.
    pub(crate) fn clear(&self) {
        *write(&self.room) = None;
    }

    pub(crate) fn get(&self) -> Option<RoomId> {
        read(&self.room).clone()
    }

    /// Returns `true` if `room` is still the selected room.
    pub(crate) fn is(&self, room: &RoomId) -> bool {
        read(&self.room).as_ref() == Some(room)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn latest_selection_wins() {
        let selected = SelectedRoom::new();
        assert!(selected.get().is_none());
        assert_eq!(selected.select("lobby".into()), None);
        assert_eq!(selected.select("sports".into()), Some("lobby".into()));
        assert!(selected.is(&"sports".into()));
        assert!(!selected.is(&"lobby".into()));
    }

    #[test]
    fn clear_makes_every_room_stale() {
        let selected = SelectedRoom::new();
        selected.select("lobby".into());
        selected.clear();
        assert!(!selected.is(&"lobby".into()));
    }

    #[test]
    fn visible_across_threads() {
        let selected = Arc::new(SelectedRoom::new());
        let writer = Arc::clone(&selected);
        std::thread::spawn(move || {
            writer.select("news".into());
        })
        .join()
        .unwrap();
        assert_eq!(selected.get(), Some("news".into()));
    }

    #[test]
    fn selection_survives_a_panicking_writer() {
        let selected = Arc::new(SelectedRoom::new());
        selected.select("lobby".into());
        let writer = Arc::clone(&selected);
        let _ = std::thread::spawn(move || {
            let _slot = writer.room.write().unwrap();
            panic!("writer died holding the selection");
        })
        .join();

        assert!(selected.room.is_poisoned());
        assert_eq!(selected.get(), Some("lobby".into()));
        selected.select("sports".into());
        assert!(selected.is(&"sports".into()));
    }
}

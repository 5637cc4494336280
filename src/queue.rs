//! Per-room FIFO buffers of messages submitted while not connected to
//! their room.
//!
//! Owned by the worker. A room's buffer is created on its first offline
//! send and never removed; it only shrinks by popping, so a retried drain
//! cannot send anything twice.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::message::RoomId;

#[derive(Debug, Default)]
pub(crate) struct OfflineQueues {
    rooms: HashMap<RoomId, VecDeque<String>>,
}

impl OfflineQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append `payload` to `room`'s buffer.
    pub(crate) fn enqueue(&mut self, room: &RoomId, payload: String) {
        let queue = self.rooms.entry(room.clone()).or_default();
        queue.push_back(payload);
        debug!(room = %room, queued = queue.len(), "pending message queued");
    }

    /// Remove and return the oldest pending payload for `room`.
    pub(crate) fn pop(&mut self, room: &RoomId) -> Option<String> {
        self.rooms.get_mut(room).and_then(VecDeque::pop_front)
    }

    pub(crate) fn is_empty(&self, room: &RoomId) -> bool {
        self.rooms.get(room).is_none_or(VecDeque::is_empty)
    }

    pub(crate) fn len(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map_or(0, VecDeque::len)
    }

    /// Non-destructive snapshot in send order.
    pub(crate) fn pending(&self, room: &RoomId) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rooms that still hold undelivered messages, with their counts.
    pub(crate) fn backlog(&self) -> impl Iterator<Item = (&RoomId, usize)> {
        self.rooms
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(room, queue)| (room, queue.len()))
    }
}

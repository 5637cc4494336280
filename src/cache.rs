//! Read-only access to locally cached messages.
//!
//! The session reads the cache on the caller's thread when a room is
//! selected, so implementations must be cheap and local (an in-memory map,
//! an embedded database read). A read failure never reaches the caller as an
//! error: the session substitutes an empty history and emits
//! [`SessionEvent::CacheReadFailed`](crate::SessionEvent::CacheReadFailed).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::Result;
use crate::message::{MessageRecord, RoomId};
use crate::state::{read, write};

/// Source of previously seen messages for a room.
pub trait MessageCache: Send + Sync + 'static {
    /// Messages cached for `room`, in any order. May be empty.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Cache`](crate::SessionError::Cache) if the cache cannot be read.
    fn cached_messages(&self, room: &RoomId) -> Result<Vec<MessageRecord>>;

    /// Whether caching is enabled at all. A disabled cache is never read.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// A cache that is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCache;

impl MessageCache for DisabledCache {
    fn cached_messages(&self, _room: &RoomId) -> Result<Vec<MessageRecord>> {
        Ok(Vec::new())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// In-memory cache, filled by the embedding application.
///
/// ```
/// use roomsync_client::{MemoryCache, MessageCache, MessageRecord, RoomId};
///
/// let cache = MemoryCache::new();
/// cache.insert(&RoomId::from("lobby"), MessageRecord::new("peer", "hello", 1));
/// assert_eq!(cache.cached_messages(&RoomId::from("lobby")).unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryCache {
    rooms: RwLock<HashMap<RoomId, Vec<MessageRecord>>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one record to `room`.
    pub fn insert(&self, room: &RoomId, record: MessageRecord) {
        write(&self.rooms)
            .entry(room.clone())
            .or_default()
            .push(record);
    }

    /// Replace everything cached for `room`.
    pub fn store(&self, room: &RoomId, records: Vec<MessageRecord>) {
        write(&self.rooms).insert(room.clone(), records);
    }
}

impl MessageCache for MemoryCache {
    fn cached_messages(&self, room: &RoomId) -> Result<Vec<MessageRecord>> {
        Ok(read(&self.rooms).get(room).cloned().unwrap_or_default())
    }
}

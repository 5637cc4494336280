//! Room identifiers, message records and the timestamp-ordered transcript.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ── RoomId ──────────────────────────────────────────────────────────

/// Opaque, externally assigned name of a chat room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Create a room identifier from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the room name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for RoomId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

// ── MessageRecord ───────────────────────────────────────────────────

/// A chat message as displayed: locally sent, queued, remote, cached or
/// returned by the server history.
///
/// The JSON shape (`senderId`, `data`, `timeStamp`) matches the records
/// stored by the backend and the local cache.
///
/// ```
/// use roomsync_client::MessageRecord;
///
/// let record: MessageRecord =
///     serde_json::from_str(r#"{"senderId":"peer-1","data":"hi","timeStamp":42}"#).unwrap();
/// assert_eq!(record.sender_id, "peer-1");
/// assert_eq!(record.timestamp, 42);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Peer id of the sender (or the pending label for queued messages).
    #[serde(rename = "senderId")]
    pub sender_id: String,
    /// Message text.
    pub data: String,
    /// Unix epoch milliseconds.
    #[serde(rename = "timeStamp")]
    pub timestamp: i64,
}

impl MessageRecord {
    /// Build a record with an explicit timestamp.
    pub fn new(sender_id: impl Into<String>, data: impl Into<String>, timestamp: i64) -> Self {
        Self {
            sender_id: sender_id.into(),
            data: data.into(),
            timestamp,
        }
    }

    /// Build a record stamped with the current wall-clock time.
    pub fn now(sender_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(sender_id, data, now_millis())
    }
}

/// Current wall-clock time in Unix epoch milliseconds.
///
/// Clocks set before the epoch yield `0`.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Parse a JSON array of stored messages, as delivered by the backend's
/// history response or read from a cache file.
///
/// # Errors
///
/// Returns [`SessionError::Serialization`](crate::SessionError::Serialization)
/// if the text is not a JSON array of message records.
pub fn parse_history(json: &str) -> Result<Vec<MessageRecord>> {
    Ok(serde_json::from_str(json)?)
}

// ── Transcript ──────────────────────────────────────────────────────

/// Display collection ordered by timestamp ascending.
///
/// Insertion order only breaks ties: a record inserted later with the same
/// timestamp lands after the existing ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    records: Vec<MessageRecord>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a transcript from an unordered batch.
    pub fn from_records(records: impl IntoIterator<Item = MessageRecord>) -> Self {
        let mut records: Vec<MessageRecord> = records.into_iter().collect();
        records.sort_by_key(|r| r.timestamp);
        Self { records }
    }

    /// Insert one record at its timestamp position.
    pub fn push(&mut self, record: MessageRecord) {
        let at = self
            .records
            .partition_point(|r| r.timestamp <= record.timestamp);
        self.records.insert(at, record);
    }

    /// Replace the whole transcript, e.g. with a fresh history batch.
    pub fn replace(&mut self, records: impl IntoIterator<Item = MessageRecord>) {
        *self = Self::from_records(records);
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate in display order.
    pub fn iter(&self) -> std::slice::Iter<'_, MessageRecord> {
        self.records.iter()
    }

    /// Records in display order.
    pub fn as_slice(&self) -> &[MessageRecord] {
        &self.records
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a MessageRecord;
    type IntoIter = std::slice::Iter<'a, MessageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_backend_field_names() {
        let record = MessageRecord::new("peer-a", "hello", 1_700_000_000_000);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["senderId"], "peer-a");
        assert_eq!(json["data"], "hello");
        assert_eq!(json["timeStamp"], 1_700_000_000_000_i64);
    }

    #[test]
    fn parse_history_accepts_array() {
        let json = r#"[
            {"senderId":"a","data":"one","timeStamp":2},
            {"senderId":"b","data":"two","timeStamp":1}
        ]"#;
        let records = parse_history(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].sender_id, "b");
    }

    #[test]
    fn parse_history_rejects_garbage() {
        assert!(parse_history("{not json").is_err());
        assert!(parse_history(r#"{"senderId":"a"}"#).is_err());
    }

    #[test]
    fn transcript_orders_by_timestamp_not_insertion() {
        let mut transcript = Transcript::new();
        transcript.push(MessageRecord::new("a", "third", 30));
        transcript.push(MessageRecord::new("a", "first", 10));
        transcript.push(MessageRecord::new("a", "second", 20));

        let texts: Vec<&str> = transcript.iter().map(|r| r.data.as_str()).collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[test]
    fn transcript_ties_keep_insertion_order() {
        let mut transcript = Transcript::from_records([MessageRecord::new("a", "x", 5)]);
        transcript.push(MessageRecord::new("b", "y", 5));
        assert_eq!(transcript.as_slice()[0].data, "x");
        assert_eq!(transcript.as_slice()[1].data, "y");
    }

    #[test]
    fn transcript_replace_resorts() {
        let mut transcript = Transcript::new();
        transcript.push(MessageRecord::new("a", "old", 1));
        transcript.replace(vec![
            MessageRecord::new("s", "late", 9),
            MessageRecord::new("s", "early", 3),
        ]);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.as_slice()[0].data, "early");
    }

    #[test]
    fn room_id_display_and_conversions() {
        let room = RoomId::from("lobby");
        assert_eq!(room.to_string(), "lobby");
        assert_eq!(room, RoomId::new(String::from("lobby")));
        assert_eq!(serde_json::to_string(&room).unwrap(), "\"lobby\"");
    }
}

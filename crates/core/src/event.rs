//! Outbox events.
//!
//! A [`StoredEvent`] is recorded in the same transaction as the mutation it describes and stays
//! in the store until a relay has published it and acknowledged it. The store is the source of
//! truth; the event channels are derived from it.

use chrono::{DateTime, Utc};
use journal_types::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The record types the service owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Patient,
    JournalEntry,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Patient => "PATIENT",
            RecordKind::JournalEntry => "JOURNAL_ENTRY",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Full post-mutation state of the record.
    Upsert,
    /// The record was deleted.
    Tombstone,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Upsert => "UPSERT",
            EventType::Tombstone => "TOMBSTONE",
        }
    }
}

/// A committed, not yet published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Position in the outbox; strictly increasing in commit order.
    pub sequence: u64,
    pub kind: RecordKind,
    pub record_id: RecordId,
    /// Serialized record state, `None` for a tombstone.
    pub state: Option<serde_json::Value>,
    /// Id of the command whose application produced this event.
    pub command_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

impl StoredEvent {
    pub fn event_type(&self) -> EventType {
        match self.state {
            Some(_) => EventType::Upsert,
            None => EventType::Tombstone,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.state.is_none()
    }
}

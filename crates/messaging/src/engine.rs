//! Mutation engine: applies commands from the command channel to the record store.
//!
//! Per message:
//!
//! 1. Decode and validate the envelope. Anything invalid is logged and acknowledged.
//! 2. Apply the command in one store transaction, which also records the resulting event in
//!    the outbox. The outbox relay publishes it once the transaction has committed.
//! 3. Classify the outcome:
//!    - applied: acknowledge;
//!    - rejected (duplicate, not found, missing parent, invalid input): warn and acknowledge;
//!    - transient store failure: ask for redelivery;
//!    - anything else, panics included: log an error and acknowledge.
//!
//! The engine keeps no record state between messages.

use crate::channel::{Message, HEADER_COMMAND_ID};
use crate::consumer::{HandlerOutcome, MessageHandler};
use crate::envelope::decode_command;
use async_trait::async_trait;
use journal_core::{apply, Applied, CommandTarget, RecordStore};
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

pub struct MutationEngine<K> {
    store: Arc<RecordStore>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for MutationEngine<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationEngine")
            .field("store", &self.store)
            .finish()
    }
}

impl<K: CommandTarget> MutationEngine<K> {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: CommandTarget> MessageHandler for MutationEngine<K> {
    async fn handle(&self, message: &Message, attempt: u32) -> HandlerOutcome {
        let command_id = message
            .header(HEADER_COMMAND_ID)
            .and_then(|raw| Uuid::parse_str(raw).ok());

        let Some(payload) = message.payload.as_deref() else {
            tracing::warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "dropping command message without payload"
            );
            return HandlerOutcome::Ack;
        };

        let command = match decode_command::<K::Data>(payload) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    command_id = ?command_id,
                    "dropping invalid command: {}",
                    e
                );
                return HandlerOutcome::Ack;
            }
        };

        let name = command.name();
        let target_id = command.target_id();
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || {
            store.transaction(|tx| apply::<K>(tx, command, command_id))
        })
        .await;

        match result {
            Ok(Ok(applied)) => {
                let action = match &applied {
                    Applied::Created(_) => "created",
                    Applied::Updated(_) => "updated",
                    Applied::Deleted(_) => "deleted",
                };
                tracing::info!(
                    kind = %K::KIND,
                    record_id = %applied.record_id(),
                    command_id = ?command_id,
                    partition = message.partition,
                    offset = message.offset,
                    "record {}",
                    action
                );
                HandlerOutcome::Ack
            }
            Ok(Err(e)) if e.is_rejection() => {
                tracing::warn!(
                    kind = %K::KIND,
                    command = name,
                    target_id = ?target_id.map(|id| id.get()),
                    command_id = ?command_id,
                    "command rejected: {}",
                    e
                );
                HandlerOutcome::Ack
            }
            Ok(Err(e)) if e.is_transient() => {
                tracing::warn!(
                    kind = %K::KIND,
                    command = name,
                    target_id = ?target_id.map(|id| id.get()),
                    command_id = ?command_id,
                    attempt,
                    "store failure, requesting redelivery: {}",
                    e
                );
                HandlerOutcome::Retry(e.to_string())
            }
            Ok(Err(e)) => {
                tracing::error!(
                    kind = %K::KIND,
                    command = name,
                    target_id = ?target_id.map(|id| id.get()),
                    command_id = ?command_id,
                    "command failed: {}",
                    e
                );
                HandlerOutcome::Ack
            }
            Err(e) => {
                tracing::error!(
                    kind = %K::KIND,
                    command = name,
                    target_id = ?target_id.map(|id| id.get()),
                    command_id = ?command_id,
                    "command processing aborted: {}",
                    e
                );
                HandlerOutcome::Ack
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Headers;
    use crate::envelope::encode_command;
    use chrono::Utc;
    use journal_core::{Command, JournalEntry, JournalEntryData, Patient, PatientData, RecordId};

    fn message(payload: Option<Vec<u8>>, command_id: Option<Uuid>) -> Message {
        let mut headers = Headers::new();
        if let Some(id) = command_id {
            headers.insert(HEADER_COMMAND_ID.into(), id.to_string());
        }
        Message {
            topic: "patient.commands".into(),
            partition: 0,
            offset: 0,
            key: None,
            headers,
            payload,
            timestamp: Utc::now(),
        }
    }

    fn command_message(command: &Command<PatientData>) -> Message {
        message(Some(encode_command(command).unwrap()), Some(Uuid::new_v4()))
    }

    fn anna() -> PatientData {
        PatientData::new("Anna", "Andersson", "19900101-1234").unwrap()
    }

    #[tokio::test]
    async fn create_persists_and_records_event_with_command_id() {
        let store = Arc::new(RecordStore::in_memory());
        let engine = MutationEngine::<Patient>::new(store.clone());
        let msg = command_message(&Command::Create(anna()));

        assert_eq!(engine.handle(&msg, 1).await, HandlerOutcome::Ack);

        let patient = store.get_patient(RecordId::FIRST).expect("patient stored");
        assert_eq!(patient.first_name.as_str(), "Anna");
        let events = store.pending_events(10);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].command_id.map(|id| id.to_string()).as_deref(),
            msg.header(HEADER_COMMAND_ID)
        );
    }

    #[tokio::test]
    async fn rejections_and_garbage_are_acknowledged_without_effect() {
        let store = Arc::new(RecordStore::in_memory());
        let engine = MutationEngine::<Patient>::new(store.clone());
        engine
            .handle(&command_message(&Command::Create(anna())), 1)
            .await;
        let events_before = store.pending_event_count();

        for msg in [
            command_message(&Command::Create(anna())),
            command_message(&Command::Delete {
                id: RecordId::new(999).unwrap(),
            }),
            message(Some(b"{\"commandType\":\"PATCH\"}".to_vec()), None),
            message(Some(b"garbage".to_vec()), None),
            message(None, None),
        ] {
            assert_eq!(engine.handle(&msg, 1).await, HandlerOutcome::Ack);
        }

        assert_eq!(store.list_patients().len(), 1);
        assert_eq!(store.pending_event_count(), events_before);
    }

    #[tokio::test]
    async fn journal_engine_requires_parent() {
        let store = Arc::new(RecordStore::in_memory());
        let engine = MutationEngine::<JournalEntry>::new(store.clone());
        let command =
            Command::Create(JournalEntryData::new(RecordId::new(3).unwrap(), "Orphan").unwrap());
        let msg = message(Some(encode_command(&command).unwrap()), None);

        assert_eq!(engine.handle(&msg, 1).await, HandlerOutcome::Ack);
        assert!(store.list_journal_entries().is_empty());
    }
}

//! Command producer: the synchronous entry point of the command pipeline.
//!
//! Submitting a command publishes exactly one envelope and returns as soon as the channel has
//! accepted it. Acceptance says nothing about whether the command will be applied; callers
//! that need the outcome watch the event channel for the returned `command_id`.

use crate::channel::{
    ChannelError, OutgoingMessage, Publisher, HEADER_COMMAND_ID, HEADER_COMMAND_TYPE,
    HEADER_RECORD_KIND,
};
use crate::envelope::{encode_command, EnvelopeError};
use journal_core::{Command, CommandTarget, RecordId};
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] EnvelopeError),
    #[error("command channel unavailable: {0}")]
    Channel(#[from] ChannelError),
}

/// Receipt for a command handed to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub command_id: Uuid,
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
}

/// Publishes commands for records of type `K`.
pub struct CommandProducer<K> {
    publisher: Arc<dyn Publisher>,
    topic: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for CommandProducer<K> {
    fn clone(&self) -> Self {
        Self {
            publisher: self.publisher.clone(),
            topic: self.topic.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> std::fmt::Debug for CommandProducer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProducer")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl<K: CommandTarget> CommandProducer<K> {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            _kind: PhantomData,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `command`, keyed by its target id. Creates have no id yet and are unkeyed.
    ///
    /// # Errors
    ///
    /// `PublishError::Channel` when the channel does not accept the envelope within its bounded
    /// wait. The producer does not retry; that is the caller's decision.
    pub async fn submit(&self, command: Command<K::Data>) -> Result<Accepted, PublishError> {
        let command_id = Uuid::new_v4();
        let key = command.target_id().map(|id| id.to_string());
        let payload = encode_command(&command)?;

        let message = OutgoingMessage::new(key.clone(), Some(payload))
            .with_header(HEADER_COMMAND_ID, command_id.to_string())
            .with_header(HEADER_COMMAND_TYPE, command.name())
            .with_header(HEADER_RECORD_KIND, K::KIND.as_str());

        match self.publisher.publish(&self.topic, message).await {
            Ok(delivery) => {
                tracing::info!(
                    %command_id,
                    command = command.name(),
                    key = ?key,
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "command accepted"
                );
                Ok(Accepted {
                    command_id,
                    topic: delivery.topic,
                    partition: delivery.partition,
                    offset: delivery.offset,
                })
            }
            Err(e) => {
                tracing::warn!(
                    %command_id,
                    command = command.name(),
                    key = ?key,
                    topic = %self.topic,
                    "command not accepted: {}",
                    e
                );
                Err(e.into())
            }
        }
    }

    pub async fn create(&self, data: K::Data) -> Result<Accepted, PublishError> {
        self.submit(Command::Create(data)).await
    }

    pub async fn update(&self, id: RecordId, data: K::Data) -> Result<Accepted, PublishError> {
        self.submit(Command::Update { id, data }).await
    }

    pub async fn delete(&self, id: RecordId) -> Result<Accepted, PublishError> {
        self.submit(Command::Delete { id }).await
    }
}

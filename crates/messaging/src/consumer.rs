//! Consumer groups: one worker per partition, redelivery with fixed backoff, dead letters.
//!
//! A worker takes the message at its group's committed offset, hands it to the
//! [`MessageHandler`], and commits only after the handler is done with it. Messages of one
//! partition are therefore processed strictly one after the other, while partitions proceed
//! independently.

use crate::broker::EmbeddedBroker;
use crate::channel::{
    ChannelError, Message, OutgoingMessage, Publisher, HEADER_DLT_DELIVERY_ATTEMPTS,
    HEADER_DLT_EXCEPTION_MESSAGE, HEADER_DLT_ORIGINAL_OFFSET, HEADER_DLT_ORIGINAL_PARTITION,
    HEADER_DLT_ORIGINAL_TOPIC,
};
use crate::config::MessagingConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What the consumer should do with a message after the handler has seen it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Done with, successfully or not; commit it.
    Ack,
    /// Failed for a reason that may clear up; deliver it again after the backoff.
    Retry(String),
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one delivery. `attempt` starts at 1 and grows with each redelivery.
    async fn handle(&self, message: &Message, attempt: u32) -> HandlerOutcome;
}

#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    pub max_delivery_attempts: u32,
    pub backoff: Duration,
    pub dead_letter_suffix: String,
}

impl From<&MessagingConfig> for RedeliveryPolicy {
    fn from(config: &MessagingConfig) -> Self {
        Self {
            max_delivery_attempts: config.max_delivery_attempts.max(1),
            backoff: config.redelivery_backoff,
            dead_letter_suffix: config.dead_letter_suffix.clone(),
        }
    }
}

impl RedeliveryPolicy {
    /// Where messages from `topic` go once their delivery attempts are used up.
    pub fn dead_letter_topic(&self, topic: &str) -> String {
        format!("{topic}{}", self.dead_letter_suffix)
    }
}

pub struct ConsumerGroup {
    broker: EmbeddedBroker,
    group: String,
    topic: String,
    handler: Arc<dyn MessageHandler>,
    policy: RedeliveryPolicy,
}

impl std::fmt::Debug for ConsumerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerGroup")
            .field("group", &self.group)
            .field("topic", &self.topic)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ConsumerGroup {
    pub fn new(
        broker: EmbeddedBroker,
        group: impl Into<String>,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        policy: RedeliveryPolicy,
    ) -> Self {
        Self {
            broker,
            group: group.into(),
            topic: topic.into(),
            handler,
            policy,
        }
    }

    /// Subscribe the group and start one worker per partition.
    ///
    /// Workers run until `shutdown` becomes `true` (or its sender is dropped). A worker that is
    /// in the middle of a message finishes it first.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>, ChannelError> {
        let partitions = self.broker.subscribe(&self.topic, &self.group)?;
        tracing::info!(
            topic = %self.topic,
            group = %self.group,
            partitions,
            "consumer group started"
        );

        let worker = Arc::new(self);
        Ok((0..partitions)
            .map(|partition| {
                let worker = worker.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker.run_partition(partition, shutdown).await })
            })
            .collect())
    }

    async fn run_partition(self: Arc<Self>, partition: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            let message = match self
                .broker
                .next_message(&self.topic, partition, &self.group, &mut shutdown)
                .await
            {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(topic = %self.topic, partition, "consumer stopped: {}", e);
                    break;
                }
            };

            self.process(&message).await;

            if let Err(e) = self
                .broker
                .commit(&self.topic, partition, &self.group, message.offset + 1)
            {
                tracing::error!(
                    topic = %self.topic,
                    partition,
                    offset = message.offset,
                    "failed to commit offset: {}",
                    e
                );
                break;
            }
        }
        tracing::debug!(topic = %self.topic, partition, "partition worker stopped");
    }

    /// Deliver `message` until the handler acks it or attempts run out.
    async fn process(&self, message: &Message) {
        let mut attempt = 1;
        loop {
            match self.deliver(message, attempt).await {
                HandlerOutcome::Ack => return,
                HandlerOutcome::Retry(reason) if attempt >= self.policy.max_delivery_attempts => {
                    self.dead_letter(message, attempt, &reason).await;
                    return;
                }
                HandlerOutcome::Retry(reason) => {
                    tracing::warn!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        attempt,
                        "delivery failed, retrying in {:?}: {}",
                        self.policy.backoff,
                        reason
                    );
                    tokio::time::sleep(self.policy.backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run the handler on its own task so a panic is contained to this delivery.
    async fn deliver(&self, message: &Message, attempt: u32) -> HandlerOutcome {
        let handler = self.handler.clone();
        let owned = message.clone();
        let task = tokio::spawn(async move { handler.handle(&owned, attempt).await });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = ?message.key,
                    attempt,
                    "handler failed unexpectedly, acknowledging message: {}",
                    e
                );
                HandlerOutcome::Ack
            }
        }
    }

    async fn dead_letter(&self, message: &Message, attempts: u32, reason: &str) {
        let dlt = self.policy.dead_letter_topic(&message.topic);
        let partitions = self.broker.partition_count(&message.topic).unwrap_or(1);
        self.broker.create_topic(&dlt, partitions);

        let mut outgoing = OutgoingMessage {
            key: message.key.clone(),
            headers: message.headers.clone(),
            payload: message.payload.clone(),
        }
        .with_header(HEADER_DLT_ORIGINAL_TOPIC, message.topic.clone())
        .with_header(HEADER_DLT_ORIGINAL_PARTITION, message.partition.to_string())
        .with_header(HEADER_DLT_ORIGINAL_OFFSET, message.offset.to_string())
        .with_header(HEADER_DLT_DELIVERY_ATTEMPTS, attempts.to_string());
        outgoing
            .headers
            .insert(HEADER_DLT_EXCEPTION_MESSAGE.to_string(), reason.to_string());

        match self.broker.publish(&dlt, outgoing).await {
            Ok(delivery) => tracing::error!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                attempts,
                dead_letter = %delivery,
                "delivery attempts exhausted, message dead-lettered: {}",
                reason
            ),
            Err(e) => tracing::error!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                key = ?message.key,
                attempts,
                "delivery attempts exhausted and dead-letter publish failed ({}): {}",
                e,
                reason
            ),
        }
    }
}

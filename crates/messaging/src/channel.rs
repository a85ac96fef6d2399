//! Channel contracts shared by producers, consumers and the broker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub const HEADER_COMMAND_ID: &str = "command-id";
pub const HEADER_COMMAND_TYPE: &str = "command-type";
pub const HEADER_RECORD_KIND: &str = "record-kind";
pub const HEADER_EVENT_TYPE: &str = "event-type";
pub const HEADER_EVENT_SEQUENCE: &str = "event-sequence";

pub const HEADER_DLT_ORIGINAL_TOPIC: &str = "dlt-original-topic";
pub const HEADER_DLT_ORIGINAL_PARTITION: &str = "dlt-original-partition";
pub const HEADER_DLT_ORIGINAL_OFFSET: &str = "dlt-original-offset";
pub const HEADER_DLT_EXCEPTION_MESSAGE: &str = "dlt-exception-message";
pub const HEADER_DLT_DELIVERY_ATTEMPTS: &str = "dlt-delivery-attempts";

pub type Headers = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("topic {topic} has no partition {partition}")]
    UnknownPartition { topic: String, partition: usize },
    #[error("publish to {topic} not acknowledged within {timeout:?}")]
    Timeout { topic: String, timeout: Duration },
    #[error("channel is closed")]
    Closed,
}

/// A message as stored in a partition log.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: Option<String>,
    pub headers: Headers,
    /// `None` for a tombstone.
    pub payload: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Payload decoded as JSON; `None` for tombstones and undecodable payloads.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.payload
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }
}

/// A message handed to [`Publisher::publish`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    /// Partition key. Unkeyed messages are spread round-robin.
    pub key: Option<String>,
    pub headers: Headers,
    pub payload: Option<Vec<u8>>,
}

impl OutgoingMessage {
    pub fn new(key: Option<String>, payload: Option<Vec<u8>>) -> Self {
        Self {
            key,
            headers: Headers::new(),
            payload,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }
}

/// Where a published message landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// Something messages can be published to.
#[async_trait]
pub trait Publisher: Send + Sync + fmt::Debug {
    /// Append `message` to `topic` and wait for the channel to acknowledge it.
    ///
    /// # Errors
    ///
    /// `ChannelError::Timeout` when the channel does not accept the message within its bounded
    /// wait, `ChannelError::Closed` once the channel has shut down.
    async fn publish(&self, topic: &str, message: OutgoingMessage) -> Result<Delivery, ChannelError>;
}

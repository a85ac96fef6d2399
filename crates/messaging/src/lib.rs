//! # Journal Messaging
//!
//! The asynchronous half of the journal service: commands travel over a partitioned channel
//! to a mutation engine, and committed changes travel back out as events.
//!
//! - [`channel`]: message types and the [`Publisher`] contract
//! - [`broker`]: the in-process partitioned broker
//! - [`consumer`]: consumer groups with redelivery and dead-lettering
//! - [`envelope`]: the command wire format
//! - [`producer`], [`engine`], [`relay`]: the three stages of the pipeline
//! - [`pipeline`]: all of the above wired around one record store

pub mod broker;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod engine;
pub mod envelope;
pub mod pipeline;
pub mod producer;
pub mod relay;

pub use broker::{BrokerSettings, EmbeddedBroker};
pub use channel::{ChannelError, Delivery, Headers, Message, OutgoingMessage, Publisher};
pub use config::{ConfigError, MessagingConfig, Topics};
pub use consumer::{ConsumerGroup, HandlerOutcome, MessageHandler, RedeliveryPolicy};
pub use engine::MutationEngine;
pub use envelope::{decode_command, encode_command, CommandEnvelope, CommandTag, EnvelopeError};
pub use pipeline::{Pipeline, PipelineError};
pub use producer::{Accepted, CommandProducer, PublishError};
pub use relay::{OutboxRelay, RelayError};

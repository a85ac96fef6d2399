//! Wiring of the whole command pipeline around one record store.
//!
//! ```text
//! CommandProducer ──▶ *.commands ──▶ ConsumerGroup ──▶ MutationEngine ──▶ RecordStore
//!                                                                            │ outbox
//!                                     *.events ◀── OutboxRelay ◀─────────────┘
//! ```

use crate::broker::EmbeddedBroker;
use crate::channel::{ChannelError, Publisher};
use crate::config::MessagingConfig;
use crate::consumer::{ConsumerGroup, RedeliveryPolicy};
use crate::engine::MutationEngine;
use crate::producer::CommandProducer;
use crate::relay::{OutboxRelay, RelayError};
use journal_core::{CommandTarget, JournalEntry, Patient, RecordKind, RecordStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("command channel not drained within {0:?}")]
    DrainTimeout(Duration),
}

/// Running pipeline: consumers and relay are spawned on the current tokio runtime.
#[derive(Debug)]
pub struct Pipeline {
    broker: EmbeddedBroker,
    config: MessagingConfig,
    store: Arc<RecordStore>,
    relay: Arc<OutboxRelay>,
    patient_commands: CommandProducer<Patient>,
    journal_commands: CommandProducer<JournalEntry>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Create the broker topics, subscribe a mutation engine per record type and start the
    /// outbox relay.
    pub fn start(store: Arc<RecordStore>, config: MessagingConfig) -> Result<Self, ChannelError> {
        let broker = EmbeddedBroker::from_config(&config);
        let publisher: Arc<dyn Publisher> = Arc::new(broker.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::new();
        tasks.extend(spawn_engine::<Patient>(&broker, &config, &store, shutdown_rx.clone())?);
        tasks.extend(spawn_engine::<JournalEntry>(&broker, &config, &store, shutdown_rx.clone())?);

        let relay = Arc::new(OutboxRelay::new(store.clone(), publisher.clone(), &config));
        tasks.push(tokio::spawn(relay.clone().run(shutdown_rx)));

        let patient_commands =
            CommandProducer::new(publisher.clone(), config.topics.commands(RecordKind::Patient));
        let journal_commands =
            CommandProducer::new(publisher, config.topics.commands(RecordKind::JournalEntry));

        Ok(Self {
            broker,
            config,
            store,
            relay,
            patient_commands,
            journal_commands,
            shutdown,
            tasks,
        })
    }

    pub fn broker(&self) -> &EmbeddedBroker {
        &self.broker
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn patient_commands(&self) -> &CommandProducer<Patient> {
        &self.patient_commands
    }

    pub fn journal_commands(&self) -> &CommandProducer<JournalEntry> {
        &self.journal_commands
    }

    /// Wait until both command topics are fully consumed, then publish every pending event.
    pub async fn settle(&self, timeout: Duration) -> Result<(), PipelineError> {
        for kind in [RecordKind::Patient, RecordKind::JournalEntry] {
            let topic = self.config.topics.commands(kind);
            if !self
                .broker
                .wait_until_consumed(topic, &self.config.consumer_group, timeout)
                .await?
            {
                return Err(PipelineError::DrainTimeout(timeout));
            }
        }
        self.relay.drain().await?;
        Ok(())
    }

    /// Stop consumers and relay after their in-flight work, then close the broker.
    pub async fn shutdown(self) {
        // Receivers may already be gone if every task has stopped.
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("pipeline task ended abnormally: {}", e);
            }
        }
        self.broker.close();
        tracing::info!("command pipeline stopped");
    }
}

fn spawn_engine<K: CommandTarget>(
    broker: &EmbeddedBroker,
    config: &MessagingConfig,
    store: &Arc<RecordStore>,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, ChannelError> {
    let engine = Arc::new(MutationEngine::<K>::new(store.clone()));
    ConsumerGroup::new(
        broker.clone(),
        config.consumer_group.clone(),
        config.topics.commands(K::KIND),
        engine,
        RedeliveryPolicy::from(config),
    )
    .spawn(shutdown)
}

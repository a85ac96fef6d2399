//! Outbox relay: moves committed events from the record store to the event channels.
//!
//! Events are published in outbox order, keyed by record id, and acknowledged in the store
//! only after the channel has accepted them. A publish failure stops the drain so that a later
//! event for the same record can never overtake an earlier one; the remaining events are
//! retried on the next wake-up. A crash between publish and acknowledgement republishes the
//! event, so the event channels are at-least-once.

use crate::channel::{
    OutgoingMessage, Publisher, HEADER_COMMAND_ID, HEADER_EVENT_SEQUENCE, HEADER_EVENT_TYPE,
    HEADER_RECORD_KIND,
};
use crate::config::{MessagingConfig, Topics};
use journal_core::{RecordError, RecordStore, StoredEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to publish event {sequence}: {source}")]
    Publish {
        sequence: u64,
        #[source]
        source: crate::channel::ChannelError,
    },
    #[error("failed to encode event {sequence}: {source}")]
    Encode {
        sequence: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to acknowledge published events: {0}")]
    Acknowledge(#[source] RecordError),
}

#[derive(Debug)]
pub struct OutboxRelay {
    store: Arc<RecordStore>,
    publisher: Arc<dyn Publisher>,
    topics: Topics,
    interval: Duration,
    batch_size: usize,
    draining: Mutex<()>,
}

impl OutboxRelay {
    pub fn new(store: Arc<RecordStore>, publisher: Arc<dyn Publisher>, config: &MessagingConfig) -> Self {
        Self {
            store,
            publisher,
            topics: config.topics.clone(),
            interval: config.relay_interval,
            batch_size: config.relay_batch_size.max(1),
            draining: Mutex::new(()),
        }
    }

    /// Publish every pending event. Returns how many were published.
    ///
    /// Concurrent calls are serialized.
    pub async fn drain(&self) -> Result<usize, RelayError> {
        let _guard = self.draining.lock().await;
        let mut published = 0;

        loop {
            let batch = self.store.pending_events(self.batch_size);
            if batch.is_empty() {
                return Ok(published);
            }

            let mut done = Vec::with_capacity(batch.len());
            let mut failure = None;
            for event in &batch {
                match self.publish(event).await {
                    Ok(()) => done.push(event.sequence),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            published += done.len();
            self.acknowledge(done).await?;

            if let Some(e) = failure {
                return Err(e);
            }
        }
    }

    async fn publish(&self, event: &StoredEvent) -> Result<(), RelayError> {
        let payload = event
            .state
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|source| RelayError::Encode {
                sequence: event.sequence,
                source,
            })?;

        let mut message = OutgoingMessage::new(Some(event.record_id.to_string()), payload)
            .with_header(HEADER_RECORD_KIND, event.kind.as_str())
            .with_header(HEADER_EVENT_TYPE, event.event_type().as_str())
            .with_header(HEADER_EVENT_SEQUENCE, event.sequence.to_string());
        if let Some(command_id) = event.command_id {
            message = message.with_header(HEADER_COMMAND_ID, command_id.to_string());
        }

        let topic = self.topics.events(event.kind);
        let delivery = self
            .publisher
            .publish(topic, message)
            .await
            .map_err(|source| RelayError::Publish {
                sequence: event.sequence,
                source,
            })?;

        tracing::info!(
            kind = %event.kind,
            record_id = %event.record_id,
            event_type = event.event_type().as_str(),
            command_id = ?event.command_id,
            delivery = %delivery,
            "event published"
        );
        Ok(())
    }

    async fn acknowledge(&self, sequences: Vec<u64>) -> Result<(), RelayError> {
        if sequences.is_empty() {
            return Ok(());
        }
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.acknowledge_events(&sequences))
            .await
            .map_err(|e| RelayError::Acknowledge(RecordError::Unavailable(e.to_string())))?
            .map_err(RelayError::Acknowledge)
    }

    /// Drain whenever the store signals new events, and on a fixed interval as a safety net,
    /// until `shutdown` fires. A final drain runs before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let signal = self.store.outbox_signal();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, "outbox relay started");

        loop {
            tokio::select! {
                _ = signal.notified() => {}
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            self.drain_logged().await;
        }

        self.drain_logged().await;
        tracing::info!("outbox relay stopped");
    }

    async fn drain_logged(&self) {
        match self.drain().await {
            Ok(0) => {}
            Ok(published) => tracing::debug!(published, "outbox drained"),
            Err(e) => tracing::warn!(
                pending = self.store.pending_event_count(),
                "outbox drain interrupted, will retry: {}",
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::EmbeddedBroker;
    use crate::channel::{ChannelError, Delivery};
    use async_trait::async_trait;
    use journal_core::{Patient, PatientData, PatientService};

    fn setup() -> (Arc<RecordStore>, EmbeddedBroker, OutboxRelay) {
        let config = MessagingConfig::default();
        let store = Arc::new(RecordStore::in_memory());
        let broker = EmbeddedBroker::from_config(&config);
        let relay = OutboxRelay::new(store.clone(), Arc::new(broker.clone()), &config);
        (store, broker, relay)
    }

    fn anna() -> PatientData {
        PatientData::new("Anna", "Andersson", "19900101-1234").unwrap()
    }

    #[tokio::test]
    async fn drain_publishes_keyed_events_and_empties_outbox() {
        let (store, broker, relay) = setup();
        let patients = PatientService::new(store.clone());
        let patient: Patient = patients.create(anna()).unwrap();
        patients.delete(patient.id).unwrap();

        assert_eq!(relay.drain().await.unwrap(), 2);
        assert_eq!(store.pending_event_count(), 0);

        let events = broker.messages("patient.events").unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.key.as_deref() == Some("1")));
        assert_eq!(events[0].header(HEADER_EVENT_TYPE), Some("UPSERT"));
        assert_eq!(events[0].json().unwrap()["firstName"], "Anna");
        assert_eq!(events[1].header(HEADER_EVENT_TYPE), Some("TOMBSTONE"));
        assert_eq!(events[1].payload, None);
        assert_eq!(events[1].header(HEADER_COMMAND_ID), None);
    }

    #[derive(Debug)]
    struct Unavailable;

    #[async_trait]
    impl Publisher for Unavailable {
        async fn publish(&self, _topic: &str, _message: OutgoingMessage) -> Result<Delivery, ChannelError> {
            Err(ChannelError::Closed)
        }
    }

    #[tokio::test]
    async fn failed_publish_keeps_events_pending() {
        let config = MessagingConfig::default();
        let store = Arc::new(RecordStore::in_memory());
        let relay = OutboxRelay::new(store.clone(), Arc::new(Unavailable), &config);
        PatientService::new(store.clone()).create(anna()).unwrap();

        let err = relay.drain().await.unwrap_err();
        assert!(matches!(err, RelayError::Publish { sequence: 1, .. }));
        assert_eq!(store.pending_event_count(), 1);
    }

    #[tokio::test]
    async fn run_publishes_on_signal_and_stops_on_shutdown() {
        let (store, broker, relay) = setup();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::new(relay).run(rx));

        PatientService::new(store.clone()).create(anna()).unwrap();
        for _ in 0..100 {
            if store.pending_event_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.messages("patient.events").unwrap().len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

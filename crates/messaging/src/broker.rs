//! In-process partitioned message broker.
//!
//! Each topic is split into a fixed number of partitions. A partition is an append-only log
//! with one committed offset per consumer group, so every group sees every message of a
//! partition in publish order. Keyed messages are placed by a stable hash of the key, which
//! keeps all messages for one key in one partition and therefore in order.
//!
//! Back-pressure: a partition accepts at most `partition_capacity` messages that some
//! subscribed group has not committed yet. A publisher that finds the partition full waits up
//! to `publish_timeout` for consumers to catch up and then fails with
//! [`ChannelError::Timeout`].

use crate::channel::{ChannelError, Delivery, Message, OutgoingMessage, Publisher};
use crate::config::MessagingConfig;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Clone, Debug)]
pub struct BrokerSettings {
    pub partition_capacity: usize,
    pub partition_retention: usize,
    pub publish_timeout: Duration,
}

impl From<&MessagingConfig> for BrokerSettings {
    fn from(config: &MessagingConfig) -> Self {
        Self {
            partition_capacity: config.partition_capacity.max(1),
            partition_retention: config.partition_retention,
            publish_timeout: config.publish_timeout,
        }
    }
}

#[derive(Debug, Default)]
struct PartitionLog {
    base_offset: u64,
    messages: VecDeque<Message>,
    /// Next offset to deliver, per consumer group.
    committed: HashMap<String, u64>,
}

impl PartitionLog {
    fn end_offset(&self) -> u64 {
        self.base_offset + self.messages.len() as u64
    }

    fn low_watermark(&self) -> Option<u64> {
        self.committed.values().min().copied()
    }

    fn uncommitted(&self) -> u64 {
        match self.low_watermark() {
            Some(committed) => self.end_offset().saturating_sub(committed),
            None => 0,
        }
    }

    fn get(&self, offset: u64) -> Option<&Message> {
        let index = offset.checked_sub(self.base_offset)?;
        self.messages.get(usize::try_from(index).ok()?)
    }

    /// Drop consumed messages beyond the retention limit.
    fn trim(&mut self, retention: usize) {
        let floor = self.low_watermark().unwrap_or_else(|| self.end_offset());
        while self.messages.len() > retention && self.base_offset < floor {
            self.messages.pop_front();
            self.base_offset += 1;
        }
    }
}

#[derive(Debug, Default)]
struct Partition {
    log: Mutex<PartitionLog>,
    appended: Notify,
    released: Notify,
}

impl Partition {
    // The log is only changed by short, non-panicking critical sections.
    fn lock(&self) -> MutexGuard<'_, PartitionLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct Topic {
    name: String,
    partitions: Vec<Partition>,
    next_unkeyed: AtomicUsize,
}

impl Topic {
    fn partition(&self, index: usize) -> Result<&Partition, ChannelError> {
        self.partitions
            .get(index)
            .ok_or_else(|| ChannelError::UnknownPartition {
                topic: self.name.clone(),
                partition: index,
            })
    }

    fn select_partition(&self, key: Option<&str>) -> usize {
        let count = self.partitions.len();
        match key {
            Some(key) => (partition_hash(key.as_bytes()) % count as u64) as usize,
            None => self.next_unkeyed.fetch_add(1, Ordering::Relaxed) % count,
        }
    }
}

/// Stable across processes and toolchains, unlike `DefaultHasher`.
fn partition_hash(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

#[derive(Debug)]
struct BrokerInner {
    settings: BrokerSettings,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    closed: AtomicBool,
}

/// Cheap to clone; clones share the same topics.
#[derive(Clone, Debug)]
pub struct EmbeddedBroker {
    inner: Arc<BrokerInner>,
}

impl EmbeddedBroker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                settings,
                topics: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// A broker with the configured topics already created.
    pub fn from_config(config: &MessagingConfig) -> Self {
        let broker = Self::new(BrokerSettings::from(config));
        for topic in config.topics.all() {
            broker.create_topic(topic, config.partitions);
        }
        broker
    }

    /// Create `name` with `partitions` partitions. Existing topics are left as they are.
    pub fn create_topic(&self, name: &str, partitions: usize) {
        let mut topics = self
            .inner
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if topics.contains_key(name) {
            return;
        }
        let partitions = partitions.max(1);
        topics.insert(
            name.to_string(),
            Arc::new(Topic {
                name: name.to_string(),
                partitions: (0..partitions).map(|_| Partition::default()).collect(),
                next_unkeyed: AtomicUsize::new(0),
            }),
        );
        tracing::debug!(topic = name, partitions, "topic created");
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>, ChannelError> {
        self.inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownTopic(name.to_string()))
    }

    pub fn partition_count(&self, topic: &str) -> Result<usize, ChannelError> {
        Ok(self.topic(topic)?.partitions.len())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Refuse further publishes and wake publishers waiting for capacity.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let topics = self
            .inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for topic in topics.values() {
            for partition in &topic.partitions {
                partition.released.notify_waiters();
            }
        }
        tracing::info!("embedded broker closed");
    }

    /// Register `group` on every partition of `topic`, starting at the earliest retained
    /// message. Registering an existing group keeps its committed offsets.
    pub fn subscribe(&self, topic: &str, group: &str) -> Result<usize, ChannelError> {
        let topic = self.topic(topic)?;
        for partition in &topic.partitions {
            let mut log = partition.lock();
            let base = log.base_offset;
            log.committed.entry(group.to_string()).or_insert(base);
        }
        Ok(topic.partitions.len())
    }

    /// Wait for the next message `group` has not committed on one partition.
    ///
    /// Returns `Ok(None)` when `shutdown` fires first. The message stays uncommitted until
    /// [`EmbeddedBroker::commit`] is called, so asking again yields the same message.
    pub async fn next_message(
        &self,
        topic: &str,
        partition: usize,
        group: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Message>, ChannelError> {
        let topic = self.topic(topic)?;
        let partition = topic.partition(partition)?;

        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }

            let appended = partition.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            {
                let mut log = partition.lock();
                let base = log.base_offset;
                let offset = log.committed.entry(group.to_string()).or_insert(base);
                if *offset < base {
                    *offset = base;
                }
                let offset = *offset;
                if let Some(message) = log.get(offset) {
                    return Ok(Some(message.clone()));
                }
            }

            tokio::select! {
                _ = &mut appended => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Mark everything before `next_offset` as consumed by `group`.
    pub fn commit(
        &self,
        topic: &str,
        partition: usize,
        group: &str,
        next_offset: u64,
    ) -> Result<(), ChannelError> {
        let topic = self.topic(topic)?;
        let partition = topic.partition(partition)?;
        {
            let mut log = partition.lock();
            let base = log.base_offset;
            let committed = log.committed.entry(group.to_string()).or_insert(base);
            if next_offset > *committed {
                *committed = next_offset;
            }
            log.trim(self.inner.settings.partition_retention);
        }
        partition.released.notify_waiters();
        Ok(())
    }

    /// Messages on `topic` not yet committed by `group`, across all partitions.
    pub fn pending(&self, topic: &str, group: &str) -> Result<u64, ChannelError> {
        let topic = self.topic(topic)?;
        Ok(topic
            .partitions
            .iter()
            .map(|partition| {
                let log = partition.lock();
                let committed = log.committed.get(group).copied().unwrap_or(log.base_offset);
                log.end_offset().saturating_sub(committed)
            })
            .sum())
    }

    /// Poll until `group` has committed everything on `topic`. Returns `false` on timeout.
    pub async fn wait_until_consumed(
        &self,
        topic: &str,
        group: &str,
        timeout: Duration,
    ) -> Result<bool, ChannelError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending(topic, group)? == 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Retained messages of `topic`, partition by partition in offset order.
    pub fn messages(&self, topic: &str) -> Result<Vec<Message>, ChannelError> {
        let topic = self.topic(topic)?;
        Ok(topic
            .partitions
            .iter()
            .flat_map(|partition| partition.lock().messages.iter().cloned().collect::<Vec<_>>())
            .collect())
    }
}

#[async_trait]
impl Publisher for EmbeddedBroker {
    async fn publish(&self, topic: &str, message: OutgoingMessage) -> Result<Delivery, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let topic = self.topic(topic)?;
        let partition_index = topic.select_partition(message.key.as_deref());
        let partition = topic.partition(partition_index)?;
        let settings = &self.inner.settings;
        let deadline = Instant::now() + settings.publish_timeout;

        let mut log = loop {
            let released = partition.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.is_closed() {
                return Err(ChannelError::Closed);
            }
            {
                let log = partition.lock();
                if log.uncommitted() < settings.partition_capacity as u64 {
                    break log;
                }
            }

            tracing::debug!(topic = %topic.name, partition = partition_index, "partition full, waiting");
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return Err(ChannelError::Timeout {
                    topic: topic.name.clone(),
                    timeout: settings.publish_timeout,
                });
            }
        };

        let offset = log.end_offset();
        log.messages.push_back(Message {
            topic: topic.name.clone(),
            partition: partition_index,
            offset,
            key: message.key,
            headers: message.headers,
            payload: message.payload,
            timestamp: Utc::now(),
        });
        log.trim(settings.partition_retention);
        drop(log);
        partition.appended.notify_waiters();

        Ok(Delivery {
            topic: topic.name.clone(),
            partition: partition_index,
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(capacity: usize, timeout: Duration) -> EmbeddedBroker {
        let broker = EmbeddedBroker::new(BrokerSettings {
            partition_capacity: capacity,
            partition_retention: 100,
            publish_timeout: timeout,
        });
        broker.create_topic("t", 3);
        broker
    }

    fn keyed(key: &str, body: &str) -> OutgoingMessage {
        OutgoingMessage::new(Some(key.to_string()), Some(body.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn same_key_lands_in_same_partition_in_order() {
        let broker = broker(100, Duration::from_secs(1));

        let first = broker.publish("t", keyed("42", "a")).await.unwrap();
        let second = broker.publish("t", keyed("42", "b")).await.unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn unkeyed_messages_are_spread_round_robin() {
        let broker = broker(100, Duration::from_secs(1));
        let mut partitions = Vec::new();
        for _ in 0..3 {
            let delivery = broker
                .publish("t", OutgoingMessage::new(None, None))
                .await
                .unwrap();
            partitions.push(delivery.partition);
        }
        partitions.sort_unstable();
        assert_eq!(partitions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn unknown_topic_is_an_error() {
        let broker = broker(100, Duration::from_secs(1));
        let err = broker
            .publish("missing", OutgoingMessage::default())
            .await
            .unwrap_err();
        assert_eq!(err, ChannelError::UnknownTopic("missing".into()));
    }

    #[tokio::test]
    async fn full_partition_times_out_publisher() {
        let broker = broker(1, Duration::from_millis(50));
        broker.subscribe("t", "g").unwrap();

        broker.publish("t", keyed("k", "1")).await.unwrap();
        let err = broker.publish("t", keyed("k", "2")).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout { .. }));
    }

    #[tokio::test]
    async fn commit_releases_waiting_publisher() {
        let broker = broker(1, Duration::from_secs(2));
        broker.subscribe("t", "g").unwrap();
        let first = broker.publish("t", keyed("k", "1")).await.unwrap();

        let waiting = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.publish("t", keyed("k", "2")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker
            .commit("t", first.partition, "g", first.offset + 1)
            .unwrap();

        let second = waiting.await.unwrap().expect("publish should proceed");
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn closed_broker_rejects_publishes() {
        let broker = broker(100, Duration::from_secs(1));
        broker.close();
        let err = broker.publish("t", keyed("k", "1")).await.unwrap_err();
        assert_eq!(err, ChannelError::Closed);
    }

    #[tokio::test]
    async fn next_message_repeats_until_committed() {
        let broker = broker(100, Duration::from_secs(1));
        broker.subscribe("t", "g").unwrap();
        let delivery = broker.publish("t", keyed("k", "1")).await.unwrap();
        let (_tx, mut shutdown) = watch::channel(false);

        let first = broker
            .next_message("t", delivery.partition, "g", &mut shutdown)
            .await
            .unwrap()
            .unwrap();
        let again = broker
            .next_message("t", delivery.partition, "g", &mut shutdown)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(broker.pending("t", "g").unwrap(), 1);

        broker
            .commit("t", delivery.partition, "g", delivery.offset + 1)
            .unwrap();
        assert_eq!(broker.pending("t", "g").unwrap(), 0);
    }

    #[tokio::test]
    async fn next_message_returns_none_on_shutdown() {
        let broker = broker(100, Duration::from_secs(1));
        broker.subscribe("t", "g").unwrap();
        let (tx, mut shutdown) = watch::channel(false);

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.next_message("t", 0, "g", &mut shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), None);
    }

    #[test]
    fn partition_hash_is_stable() {
        assert_eq!(partition_hash(b"42"), xxh3_64(b"42"));
        assert_eq!(partition_hash(b"1"), partition_hash(b"1"));
        assert_ne!(partition_hash(b"1"), partition_hash(b"2"));
    }

    #[tokio::test]
    async fn keys_spread_over_partitions() {
        let broker = broker(100, Duration::from_secs(1));
        let mut used = std::collections::HashSet::new();
        for key in 0..64 {
            let delivery = broker
                .publish("t", keyed(&key.to_string(), "x"))
                .await
                .unwrap();
            used.insert(delivery.partition);
        }
        assert_eq!(used.len(), 3);
    }

    #[tokio::test]
    async fn commit_by_new_group_starts_at_retained_base() {
        let broker = EmbeddedBroker::new(BrokerSettings {
            partition_capacity: 100,
            partition_retention: 1,
            publish_timeout: Duration::from_secs(1),
        });
        broker.create_topic("t", 1);
        broker.subscribe("t", "a").unwrap();
        for body in ["1", "2", "3"] {
            let delivery = broker.publish("t", keyed("k", body)).await.unwrap();
            broker.commit("t", 0, "a", delivery.offset + 1).unwrap();
        }
        assert_eq!(broker.messages("t").unwrap().len(), 1);

        // An unseen group committing below the base must not pin trimmed offsets.
        broker.commit("t", 0, "late", 0).unwrap();
        assert_eq!(broker.pending("t", "late").unwrap(), 1);

        let delivery = broker.publish("t", keyed("k", "4")).await.unwrap();
        broker.commit("t", 0, "a", delivery.offset + 1).unwrap();
        broker.commit("t", 0, "late", delivery.offset + 1).unwrap();
        assert_eq!(broker.messages("t").unwrap().len(), 1);
        assert_eq!(broker.pending("t", "late").unwrap(), 0);
    }
}

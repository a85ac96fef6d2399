//! Messaging configuration.
//!
//! Like `CoreConfig`, this is resolved once at process startup and passed to the broker,
//! consumer groups and relay. Nothing in this crate reads environment variables on its own.

use journal_core::RecordKind;
use std::time::Duration;

pub const DEFAULT_PARTITIONS: usize = 3;
pub const DEFAULT_PARTITION_CAPACITY: usize = 1_000;
pub const DEFAULT_PARTITION_RETENTION: usize = 10_000;
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;
pub const DEFAULT_REDELIVERY_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_CONSUMER_GROUP: &str = "patient-journal-group";
pub const DEFAULT_DEAD_LETTER_SUFFIX: &str = ".DLT";
pub const DEFAULT_RELAY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RELAY_BATCH_SIZE: usize = 100;

pub const ENV_PARTITIONS: &str = "JOURNAL_PARTITIONS";
pub const ENV_PUBLISH_TIMEOUT_MS: &str = "JOURNAL_PUBLISH_TIMEOUT_MS";
pub const ENV_MAX_DELIVERY_ATTEMPTS: &str = "JOURNAL_MAX_DELIVERY_ATTEMPTS";
pub const ENV_REDELIVERY_BACKOFF_MS: &str = "JOURNAL_REDELIVERY_BACKOFF_MS";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    NotPositive { name: &'static str, value: String },
}

/// Topic names used by the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub patient_commands: String,
    pub journal_commands: String,
    pub patient_events: String,
    pub journal_events: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            patient_commands: "patient.commands".into(),
            journal_commands: "journal.commands".into(),
            patient_events: "patient.events".into(),
            journal_events: "journal.events".into(),
        }
    }
}

impl Topics {
    pub fn commands(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Patient => &self.patient_commands,
            RecordKind::JournalEntry => &self.journal_commands,
        }
    }

    pub fn events(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Patient => &self.patient_events,
            RecordKind::JournalEntry => &self.journal_events,
        }
    }

    pub fn all(&self) -> [&str; 4] {
        [
            &self.patient_commands,
            &self.journal_commands,
            &self.patient_events,
            &self.journal_events,
        ]
    }
}

#[derive(Clone, Debug)]
pub struct MessagingConfig {
    pub topics: Topics,
    pub partitions: usize,
    /// Uncommitted messages a partition holds before publishers have to wait.
    pub partition_capacity: usize,
    /// Consumed messages a partition keeps around for inspection.
    pub partition_retention: usize,
    pub publish_timeout: Duration,
    pub consumer_group: String,
    /// Deliveries of one message, the first included, before it is dead-lettered.
    pub max_delivery_attempts: u32,
    pub redelivery_backoff: Duration,
    pub dead_letter_suffix: String,
    pub relay_interval: Duration,
    pub relay_batch_size: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            topics: Topics::default(),
            partitions: DEFAULT_PARTITIONS,
            partition_capacity: DEFAULT_PARTITION_CAPACITY,
            partition_retention: DEFAULT_PARTITION_RETENTION,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            consumer_group: DEFAULT_CONSUMER_GROUP.into(),
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            redelivery_backoff: DEFAULT_REDELIVERY_BACKOFF,
            dead_letter_suffix: DEFAULT_DEAD_LETTER_SUFFIX.into(),
            relay_interval: DEFAULT_RELAY_INTERVAL,
            relay_batch_size: DEFAULT_RELAY_BATCH_SIZE,
        }
    }
}

impl MessagingConfig {
    /// Build configuration from a variable lookup, typically `std::env::var(..).ok()`.
    ///
    /// Unset or blank variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(partitions) = positive(&lookup, ENV_PARTITIONS)? {
            config.partitions = partitions as usize;
        }
        if let Some(ms) = positive(&lookup, ENV_PUBLISH_TIMEOUT_MS)? {
            config.publish_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = positive(&lookup, ENV_MAX_DELIVERY_ATTEMPTS)? {
            config.max_delivery_attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        }
        if let Some(ms) = positive(&lookup, ENV_REDELIVERY_BACKOFF_MS)? {
            config.redelivery_backoff = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn positive<F>(lookup: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(ConfigError::NotPositive { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = MessagingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.partitions, 3);
        assert_eq!(config.publish_timeout, Duration::from_secs(5));
        assert_eq!(config.max_delivery_attempts, 3);
        assert_eq!(config.consumer_group, "patient-journal-group");
        assert_eq!(config.dead_letter_suffix, ".DLT");
    }

    #[test]
    fn variables_override_defaults() {
        let config = MessagingConfig::from_lookup(lookup(&[
            (ENV_PARTITIONS, "6"),
            (ENV_PUBLISH_TIMEOUT_MS, "250"),
            (ENV_MAX_DELIVERY_ATTEMPTS, " 5 "),
            (ENV_REDELIVERY_BACKOFF_MS, ""),
        ]))
        .unwrap();
        assert_eq!(config.partitions, 6);
        assert_eq!(config.publish_timeout, Duration::from_millis(250));
        assert_eq!(config.max_delivery_attempts, 5);
        assert_eq!(config.redelivery_backoff, DEFAULT_REDELIVERY_BACKOFF);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        let err = MessagingConfig::from_lookup(lookup(&[(ENV_PARTITIONS, "0")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NotPositive {
                name: ENV_PARTITIONS,
                value: "0".into()
            }
        );
        assert!(MessagingConfig::from_lookup(lookup(&[(ENV_PUBLISH_TIMEOUT_MS, "soon")])).is_err());
    }

    #[test]
    fn topics_route_by_kind() {
        let topics = Topics::default();
        assert_eq!(topics.commands(RecordKind::JournalEntry), "journal.commands");
        assert_eq!(topics.events(RecordKind::Patient), "patient.events");
    }
}

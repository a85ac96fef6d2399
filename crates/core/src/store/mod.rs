//! Record store.
//!
//! The store is the single source of truth for patients, journal entries and the event
//! outbox. All state lives in one set of tables guarded by a lock:
//!
//! - Reads clone records out under a shared lock.
//! - Writes go through [`RecordStore::transaction`], which runs a read-modify-write against a
//!   write-set overlay ([`Tx`]). The overlay is turned into a [`LogEntry`], made durable by the
//!   configured [`Persistence`] backend, and only then applied to the in-memory tables. A
//!   closure that returns `Err` leaves the store untouched.
//!
//! Transactions are serialized; there are no cross-transaction locks to take.

mod persistence;
mod tx;

pub use persistence::{FilePersistence, MemoryPersistence, Persistence};
pub use tx::Tx;

use crate::event::StoredEvent;
use crate::journal::{sort_newest_first, JournalEntry};
use crate::patient::Patient;
use crate::RecordResult;
use chrono::Utc;
use journal_types::{PersonalNumber, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;

/// Identifier sequences. Identifiers are never reused, so the sequences are persisted
/// alongside the records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequences {
    pub next_patient_id: RecordId,
    pub next_journal_entry_id: RecordId,
    pub next_event_sequence: u64,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            next_patient_id: RecordId::FIRST,
            next_journal_entry_id: RecordId::FIRST,
            next_event_sequence: 1,
        }
    }
}

/// Complete store contents in serializable form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub patients: Vec<Patient>,
    pub journal_entries: Vec<JournalEntry>,
    pub outbox: Vec<StoredEvent>,
    pub sequences: Sequences,
}

/// The effect of one committed transaction.
///
/// Each record id appears at most once across the upserted and deleted lists of its table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub upserted_patients: Vec<Patient>,
    #[serde(default)]
    pub deleted_patients: Vec<RecordId>,
    #[serde(default)]
    pub upserted_journal_entries: Vec<JournalEntry>,
    #[serde(default)]
    pub deleted_journal_entries: Vec<RecordId>,
    #[serde(default)]
    pub recorded_events: Vec<StoredEvent>,
    #[serde(default)]
    pub acknowledged_events: Vec<u64>,
    pub sequences: Sequences,
}

impl LogEntry {
    pub fn is_empty(&self) -> bool {
        self.upserted_patients.is_empty()
            && self.deleted_patients.is_empty()
            && self.upserted_journal_entries.is_empty()
            && self.deleted_journal_entries.is_empty()
            && self.recorded_events.is_empty()
            && self.acknowledged_events.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) patients: BTreeMap<RecordId, Patient>,
    pub(crate) personal_numbers: HashMap<PersonalNumber, RecordId>,
    pub(crate) journal_entries: BTreeMap<RecordId, JournalEntry>,
    pub(crate) journal_by_patient: BTreeMap<RecordId, BTreeSet<RecordId>>,
    pub(crate) outbox: BTreeMap<u64, StoredEvent>,
    pub(crate) sequences: Sequences,
}

impl Tables {
    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        let entry = LogEntry {
            upserted_patients: snapshot.patients,
            upserted_journal_entries: snapshot.journal_entries,
            recorded_events: snapshot.outbox,
            sequences: snapshot.sequences,
            ..LogEntry::default()
        };
        let mut tables = Tables::default();
        tables.apply(&entry);
        tables
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            patients: self.patients.values().cloned().collect(),
            journal_entries: self.journal_entries.values().cloned().collect(),
            outbox: self.outbox.values().cloned().collect(),
            sequences: self.sequences,
        }
    }

    /// Apply a committed change set. Applying the same entry twice leaves the tables as
    /// applying it once, which keeps log replay after an interrupted compaction safe.
    pub(crate) fn apply(&mut self, entry: &LogEntry) {
        for id in &entry.deleted_patients {
            if let Some(old) = self.patients.remove(id) {
                self.personal_numbers.remove(&old.personal_number);
            }
        }
        for patient in &entry.upserted_patients {
            if let Some(old) = self.patients.insert(patient.id, patient.clone()) {
                self.personal_numbers.remove(&old.personal_number);
            }
            self.personal_numbers
                .insert(patient.personal_number.clone(), patient.id);
        }

        for id in &entry.deleted_journal_entries {
            if let Some(old) = self.journal_entries.remove(id) {
                self.unindex_journal_entry(&old);
            }
        }
        for journal_entry in &entry.upserted_journal_entries {
            if let Some(old) = self
                .journal_entries
                .insert(journal_entry.id, journal_entry.clone())
            {
                self.unindex_journal_entry(&old);
            }
            self.journal_by_patient
                .entry(journal_entry.patient_id)
                .or_default()
                .insert(journal_entry.id);
        }

        for event in &entry.recorded_events {
            self.outbox.insert(event.sequence, event.clone());
        }
        for sequence in &entry.acknowledged_events {
            self.outbox.remove(sequence);
        }

        self.sequences = entry.sequences;
    }

    fn unindex_journal_entry(&mut self, journal_entry: &JournalEntry) {
        if let Some(ids) = self.journal_by_patient.get_mut(&journal_entry.patient_id) {
            ids.remove(&journal_entry.id);
            if ids.is_empty() {
                self.journal_by_patient.remove(&journal_entry.patient_id);
            }
        }
    }
}

/// Keyed, transactional store for patients, journal entries and pending events.
pub struct RecordStore {
    tables: RwLock<Tables>,
    persistence: Box<dyn Persistence>,
    outbox_signal: Arc<Notify>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("persistence", &self.persistence)
            .finish_non_exhaustive()
    }
}

impl RecordStore {
    /// A store whose contents are lost when the process exits.
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            persistence: Box::new(MemoryPersistence),
            outbox_signal: Arc::new(Notify::new()),
        }
    }

    /// Open (or create) a file-backed store in `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns `RecordError` if the directory cannot be created or the existing log or
    /// snapshot cannot be read.
    pub fn open(data_dir: &Path) -> RecordResult<Self> {
        let persistence = FilePersistence::open(data_dir)?;
        Self::with_persistence(Box::new(persistence))
    }

    /// Build a store on top of any persistence backend, loading what it has committed.
    pub fn with_persistence(persistence: Box<dyn Persistence>) -> RecordResult<Self> {
        let snapshot = persistence.load()?;
        let tables = Tables::from_snapshot(snapshot);
        let pending = tables.outbox.len();
        if pending > 0 {
            tracing::info!(pending, "record store opened with unpublished events");
        }

        let store = Self {
            tables: RwLock::new(tables),
            persistence,
            outbox_signal: Arc::new(Notify::new()),
        };
        if pending > 0 {
            store.outbox_signal.notify_one();
        }
        Ok(store)
    }

    // Tables are only mutated by `Tables::apply`, which never unwinds halfway, so a panic in
    // another holder cannot leave them inconsistent and a poisoned lock is safe to reuse.
    fn read_tables(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_tables(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Run `f` as one transaction.
    ///
    /// The change set is committed only if `f` returns `Ok` and the persistence backend
    /// accepts it. Transactions that record events wake the outbox relay.
    pub fn transaction<T, F>(&self, f: F) -> RecordResult<T>
    where
        F: FnOnce(&mut Tx<'_>) -> RecordResult<T>,
    {
        let mut tables = self.write_tables();

        let mut tx = Tx::new(&tables, Utc::now());
        let value = f(&mut tx)?;
        let entry = tx.into_log_entry();

        if entry.is_empty() {
            return Ok(value);
        }

        self.persistence.commit(&entry)?;
        tables.apply(&entry);
        drop(tables);

        if !entry.recorded_events.is_empty() {
            self.outbox_signal.notify_one();
        }

        Ok(value)
    }

    pub fn get_patient(&self, id: RecordId) -> Option<Patient> {
        self.read_tables().patients.get(&id).cloned()
    }

    pub fn list_patients(&self) -> Vec<Patient> {
        self.read_tables().patients.values().cloned().collect()
    }

    pub fn personal_number_exists(&self, personal_number: &PersonalNumber) -> bool {
        self.read_tables()
            .personal_numbers
            .contains_key(personal_number)
    }

    pub fn get_journal_entry(&self, id: RecordId) -> Option<JournalEntry> {
        self.read_tables().journal_entries.get(&id).cloned()
    }

    pub fn list_journal_entries(&self) -> Vec<JournalEntry> {
        self.read_tables().journal_entries.values().cloned().collect()
    }

    /// Journal entries of one patient, newest first.
    pub fn journal_entries_for_patient(&self, patient_id: RecordId) -> Vec<JournalEntry> {
        let tables = self.read_tables();
        let mut entries: Vec<JournalEntry> = tables
            .journal_by_patient
            .get(&patient_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.journal_entries.get(id).cloned())
            .collect();
        sort_newest_first(&mut entries);
        entries
    }

    /// Up to `limit` unpublished events in commit order.
    pub fn pending_events(&self, limit: usize) -> Vec<StoredEvent> {
        self.read_tables()
            .outbox
            .values()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn pending_event_count(&self) -> usize {
        self.read_tables().outbox.len()
    }

    /// Remove published events from the outbox.
    pub fn acknowledge_events(&self, sequences: &[u64]) -> RecordResult<()> {
        self.transaction(|tx| {
            for sequence in sequences {
                tx.acknowledge_event(*sequence);
            }
            Ok(())
        })
    }

    /// Notified whenever a committed transaction records events.
    pub fn outbox_signal(&self) -> Arc<Notify> {
        self.outbox_signal.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RecordKind;
    use crate::patient::PatientData;
    use crate::RecordError;

    fn anna() -> PatientData {
        PatientData::new("Anna", "Andersson", "19900101-1234").unwrap()
    }

    #[test]
    fn insert_assigns_sequential_ids_starting_at_one() {
        let store = RecordStore::in_memory();

        let first = store
            .transaction(|tx| tx.insert_patient(anna()))
            .unwrap();
        let second = store
            .transaction(|tx| {
                tx.insert_patient(PatientData::new("Bo", "Berg", "19800101-0000").unwrap())
            })
            .unwrap();

        assert_eq!(first.id.get(), 1);
        assert_eq!(second.id.get(), 2);
        assert_eq!(store.list_patients().len(), 2);
    }

    #[test]
    fn failed_transaction_leaves_store_unchanged() {
        let store = RecordStore::in_memory();

        let result: RecordResult<()> = store.transaction(|tx| {
            tx.insert_patient(anna())?;
            Err(RecordError::InvalidInput("abort".into()))
        });

        assert!(result.is_err());
        assert!(store.list_patients().is_empty());
        let next = store.transaction(|tx| tx.insert_patient(anna())).unwrap();
        assert_eq!(next.id.get(), 1, "aborted transaction must not consume an id");
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let store = RecordStore::in_memory();
        let patient = store.transaction(|tx| tx.insert_patient(anna())).unwrap();
        store
            .transaction(|tx| Ok(tx.delete_patient(patient.id)))
            .unwrap();

        let again = store.transaction(|tx| tx.insert_patient(anna())).unwrap();
        assert_eq!(again.id.get(), 2);
    }

    #[test]
    fn personal_number_index_follows_deletes() {
        let store = RecordStore::in_memory();
        let patient = store.transaction(|tx| tx.insert_patient(anna())).unwrap();
        let pn = patient.personal_number.clone();
        assert!(store.personal_number_exists(&pn));

        store
            .transaction(|tx| Ok(tx.delete_patient(patient.id)))
            .unwrap();
        assert!(!store.personal_number_exists(&pn));
    }

    #[test]
    fn recorded_events_stay_pending_until_acknowledged() {
        let store = RecordStore::in_memory();
        store
            .transaction(|tx| {
                let patient = tx.insert_patient(anna())?;
                tx.record_event(RecordKind::Patient, patient.id, None, None);
                Ok(())
            })
            .unwrap();

        let pending = store.pending_events(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sequence, 1);

        store.acknowledge_events(&[pending[0].sequence]).unwrap();
        assert_eq!(store.pending_event_count(), 0);
    }

    #[test]
    fn snapshot_round_trip_rebuilds_indexes() {
        let store = RecordStore::in_memory();
        let patient = store.transaction(|tx| tx.insert_patient(anna())).unwrap();

        let snapshot = store.read_tables().to_snapshot();
        let tables = Tables::from_snapshot(snapshot);

        assert!(tables.personal_numbers.contains_key(&patient.personal_number));
        assert_eq!(tables.sequences.next_patient_id.get(), 2);
    }
}

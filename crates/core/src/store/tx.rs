use super::{LogEntry, Sequences, Tables};
use crate::event::{RecordKind, StoredEvent};
use crate::journal::{sort_newest_first, JournalEntry, JournalEntryData};
use crate::patient::{Patient, PatientData};
use crate::{RecordError, RecordResult};
use chrono::{DateTime, Utc};
use journal_types::{PersonalNumber, RecordId};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A read-modify-write transaction over the store.
///
/// Reads see the committed tables with this transaction's own writes layered on top.
/// Nothing is visible to other readers until the owning [`super::RecordStore::transaction`]
/// call commits.
pub struct Tx<'a> {
    base: &'a Tables,
    // `None` marks a delete.
    patients: BTreeMap<RecordId, Option<Patient>>,
    journal_entries: BTreeMap<RecordId, Option<JournalEntry>>,
    recorded_events: Vec<StoredEvent>,
    acknowledged_events: Vec<u64>,
    sequences: Sequences,
    now: DateTime<Utc>,
}

impl<'a> Tx<'a> {
    pub(crate) fn new(base: &'a Tables, now: DateTime<Utc>) -> Self {
        Self {
            base,
            patients: BTreeMap::new(),
            journal_entries: BTreeMap::new(),
            recorded_events: Vec::new(),
            acknowledged_events: Vec::new(),
            sequences: base.sequences,
            now,
        }
    }

    /// Transaction timestamp, used for every timestamp written by this transaction.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    // ---- patients -------------------------------------------------------

    pub fn find_patient(&self, id: RecordId) -> Option<Patient> {
        match self.patients.get(&id) {
            Some(state) => state.clone(),
            None => self.base.patients.get(&id).cloned(),
        }
    }

    pub fn patient_exists(&self, id: RecordId) -> bool {
        match self.patients.get(&id) {
            Some(state) => state.is_some(),
            None => self.base.patients.contains_key(&id),
        }
    }

    pub fn patient_exists_by_personal_number(&self, personal_number: &PersonalNumber) -> bool {
        let written = self
            .patients
            .values()
            .flatten()
            .any(|p| &p.personal_number == personal_number);
        if written {
            return true;
        }

        match self.base.personal_numbers.get(personal_number) {
            // Overwritten in this transaction: either deleted or checked above.
            Some(id) => !self.patients.contains_key(id),
            None => false,
        }
    }

    /// Persist a new patient under a freshly assigned id.
    pub fn insert_patient(&mut self, data: PatientData) -> RecordResult<Patient> {
        let id = self.sequences.next_patient_id;
        self.sequences.next_patient_id = id
            .next()
            .ok_or(RecordError::IdsExhausted(RecordKind::Patient))?;

        let patient = Patient::from_data(id, data);
        self.patients.insert(id, Some(patient.clone()));
        Ok(patient)
    }

    /// Overwrite an existing patient.
    pub fn save_patient(&mut self, patient: Patient) -> RecordResult<()> {
        if !self.patient_exists(patient.id) {
            return Err(RecordError::PatientNotFound(patient.id));
        }
        self.patients.insert(patient.id, Some(patient));
        Ok(())
    }

    /// Returns `false` when there was nothing to delete.
    pub fn delete_patient(&mut self, id: RecordId) -> bool {
        if !self.patient_exists(id) {
            return false;
        }
        self.patients.insert(id, None);
        true
    }

    // ---- journal entries ------------------------------------------------

    pub fn find_journal_entry(&self, id: RecordId) -> Option<JournalEntry> {
        match self.journal_entries.get(&id) {
            Some(state) => state.clone(),
            None => self.base.journal_entries.get(&id).cloned(),
        }
    }

    pub fn journal_entry_exists(&self, id: RecordId) -> bool {
        match self.journal_entries.get(&id) {
            Some(state) => state.is_some(),
            None => self.base.journal_entries.contains_key(&id),
        }
    }

    /// Persist a new journal entry under a freshly assigned id, stamped with [`Tx::now`].
    ///
    /// The caller is responsible for checking that the owning patient exists.
    pub fn insert_journal_entry(&mut self, data: JournalEntryData) -> RecordResult<JournalEntry> {
        let id = self.sequences.next_journal_entry_id;
        self.sequences.next_journal_entry_id = id
            .next()
            .ok_or(RecordError::IdsExhausted(RecordKind::JournalEntry))?;

        let journal_entry = JournalEntry::from_data(id, data, self.now);
        self.journal_entries
            .insert(id, Some(journal_entry.clone()));
        Ok(journal_entry)
    }

    pub fn save_journal_entry(&mut self, journal_entry: JournalEntry) -> RecordResult<()> {
        if !self.journal_entry_exists(journal_entry.id) {
            return Err(RecordError::JournalEntryNotFound(journal_entry.id));
        }
        self.journal_entries
            .insert(journal_entry.id, Some(journal_entry));
        Ok(())
    }

    pub fn delete_journal_entry(&mut self, id: RecordId) -> bool {
        if !self.journal_entry_exists(id) {
            return false;
        }
        self.journal_entries.insert(id, None);
        true
    }

    /// All journal entries of a patient, newest first.
    pub fn find_journal_entries_by_patient(&self, patient_id: RecordId) -> Vec<JournalEntry> {
        let committed = self
            .base
            .journal_by_patient
            .get(&patient_id)
            .into_iter()
            .flatten()
            .filter(|id| !self.journal_entries.contains_key(id))
            .filter_map(|id| self.base.journal_entries.get(id).cloned());

        let written = self
            .journal_entries
            .values()
            .flatten()
            .filter(|entry| entry.patient_id == patient_id)
            .cloned();

        let mut entries: Vec<JournalEntry> = committed.chain(written).collect();
        sort_newest_first(&mut entries);
        entries
    }

    // ---- outbox ---------------------------------------------------------

    /// Record an event to be published once this transaction commits.
    ///
    /// `state` is the serialized post-mutation record, `None` for a tombstone.
    pub fn record_event(
        &mut self,
        kind: RecordKind,
        record_id: RecordId,
        state: Option<serde_json::Value>,
        command_id: Option<Uuid>,
    ) -> u64 {
        let sequence = self.sequences.next_event_sequence;
        self.sequences.next_event_sequence = sequence.saturating_add(1);

        self.recorded_events.push(StoredEvent {
            sequence,
            kind,
            record_id,
            state,
            command_id,
            recorded_at: self.now,
        });
        sequence
    }

    pub(crate) fn acknowledge_event(&mut self, sequence: u64) {
        if self.base.outbox.contains_key(&sequence) {
            self.acknowledged_events.push(sequence);
        }
    }

    pub(crate) fn into_log_entry(self) -> LogEntry {
        let mut entry = LogEntry {
            sequences: self.sequences,
            recorded_events: self.recorded_events,
            acknowledged_events: self.acknowledged_events,
            ..LogEntry::default()
        };

        for (id, state) in self.patients {
            match state {
                Some(patient) => entry.upserted_patients.push(patient),
                None => entry.deleted_patients.push(id),
            }
        }
        for (id, state) in self.journal_entries {
            match state {
                Some(journal_entry) => entry.upserted_journal_entries.push(journal_entry),
                None => entry.deleted_journal_entries.push(id),
            }
        }

        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordStore;

    fn patient_data(pn: &str) -> PatientData {
        PatientData::new("Anna", "Andersson", pn).unwrap()
    }

    #[test]
    fn reads_see_own_writes() {
        let store = RecordStore::in_memory();
        store
            .transaction(|tx| {
                let patient = tx.insert_patient(patient_data("19900101-1234"))?;
                assert!(tx.patient_exists(patient.id));
                assert!(tx.patient_exists_by_personal_number(&patient.personal_number));
                assert_eq!(tx.find_patient(patient.id), Some(patient));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn deleted_personal_number_is_free_within_transaction() {
        let store = RecordStore::in_memory();
        let patient = store
            .transaction(|tx| tx.insert_patient(patient_data("19900101-1234")))
            .unwrap();

        store
            .transaction(|tx| {
                assert!(tx.delete_patient(patient.id));
                assert!(!tx.patient_exists(patient.id));
                assert!(!tx.patient_exists_by_personal_number(&patient.personal_number));
                assert!(!tx.delete_patient(patient.id), "second delete is a no-op");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn save_requires_existing_patient() {
        let store = RecordStore::in_memory();
        let ghost = Patient::from_data(RecordId::new(99).unwrap(), patient_data("1"));

        let err = store
            .transaction(|tx| tx.save_patient(ghost))
            .expect_err("saving an unknown patient should fail");
        assert!(matches!(err, RecordError::PatientNotFound(id) if id.get() == 99));
    }

    #[test]
    fn journal_entries_by_patient_merge_committed_and_written() {
        let store = RecordStore::in_memory();
        let patient = store
            .transaction(|tx| tx.insert_patient(patient_data("19900101-1234")))
            .unwrap();
        let first = store
            .transaction(|tx| {
                tx.insert_journal_entry(
                    JournalEntryData::new(patient.id, "Headache").unwrap(),
                )
            })
            .unwrap();

        store
            .transaction(|tx| {
                let second = tx.insert_journal_entry(
                    JournalEntryData::new(patient.id, "Follow-up").unwrap(),
                )?;
                let entries = tx.find_journal_entries_by_patient(patient.id);
                let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
                assert_eq!(ids, vec![second.id, first.id]);

                tx.delete_journal_entry(first.id);
                assert_eq!(tx.find_journal_entries_by_patient(patient.id).len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn journal_entry_created_at_is_transaction_time() {
        let store = RecordStore::in_memory();
        store
            .transaction(|tx| {
                let entry = tx.insert_journal_entry(
                    JournalEntryData::new(RecordId::FIRST, "Note").unwrap(),
                )?;
                assert_eq!(entry.created_at, tx.now());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn exhausted_id_sequence_is_an_error() {
        let mut tables = Tables::default();
        let last = RecordId::new(i64::MAX).unwrap();
        tables.sequences.next_patient_id = last;
        tables.sequences.next_journal_entry_id = last;
        let mut tx = Tx::new(&tables, Utc::now());

        let err = tx
            .insert_patient(patient_data("19900101-1234"))
            .expect_err("no id left to assign");
        assert!(matches!(err, RecordError::IdsExhausted(RecordKind::Patient)));
        assert!(!tx.patient_exists(last));

        let err = tx
            .insert_journal_entry(JournalEntryData::new(RecordId::FIRST, "Note").unwrap())
            .expect_err("no id left to assign");
        assert!(matches!(err, RecordError::IdsExhausted(RecordKind::JournalEntry)));
    }
}

//! Read-only access to the record store.
//!
//! Queries read directly from the store and never go through the command pipeline, so they see
//! every command whose transaction has committed regardless of whether its event has been
//! published yet.

use crate::journal::JournalEntry;
use crate::patient::Patient;
use crate::store::RecordStore;
use crate::{RecordError, RecordResult};
use journal_types::{PersonalNumber, RecordId};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<RecordStore>,
}

impl QueryService {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// # Errors
    ///
    /// Returns `RecordError::PatientNotFound` if no patient has `id`.
    pub fn patient(&self, id: RecordId) -> RecordResult<Patient> {
        self.store
            .get_patient(id)
            .ok_or(RecordError::PatientNotFound(id))
    }

    /// All patients in ascending id order.
    pub fn patients(&self) -> Vec<Patient> {
        self.store.list_patients()
    }

    pub fn personal_number_exists(&self, personal_number: &PersonalNumber) -> bool {
        self.store.personal_number_exists(personal_number)
    }

    /// # Errors
    ///
    /// Returns `RecordError::JournalEntryNotFound` if no entry has `id`.
    pub fn journal_entry(&self, id: RecordId) -> RecordResult<JournalEntry> {
        self.store
            .get_journal_entry(id)
            .ok_or(RecordError::JournalEntryNotFound(id))
    }

    /// All journal entries in ascending id order.
    pub fn journal_entries(&self) -> Vec<JournalEntry> {
        self.store.list_journal_entries()
    }

    /// Journal entries of one patient, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RecordError::PatientNotFound` if the patient does not exist, so that an unknown
    /// patient is distinguishable from one without entries.
    pub fn journal_entries_for_patient(&self, patient_id: RecordId) -> RecordResult<Vec<JournalEntry>> {
        if self.store.get_patient(patient_id).is_none() {
            return Err(RecordError::PatientNotFound(patient_id));
        }
        Ok(self.store.journal_entries_for_patient(patient_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{apply, Command};
    use crate::journal::JournalEntryData;
    use crate::patient::PatientData;

    fn seeded() -> (QueryService, RecordId) {
        let store = Arc::new(RecordStore::in_memory());
        let patient_id = store
            .transaction(|tx| {
                apply::<Patient>(
                    tx,
                    Command::Create(PatientData::new("Anna", "Andersson", "19900101-1234").unwrap()),
                    None,
                )
            })
            .unwrap()
            .record_id();
        for note in ["Headache", "Follow-up"] {
            store
                .transaction(|tx| {
                    apply::<JournalEntry>(
                        tx,
                        Command::Create(JournalEntryData::new(patient_id, note).unwrap()),
                        None,
                    )
                })
                .unwrap();
        }
        (QueryService::new(store), patient_id)
    }

    #[test]
    fn finds_patient_and_entries() {
        let (queries, patient_id) = seeded();

        let patient = queries.patient(patient_id).expect("patient should exist");
        assert_eq!(patient.last_name.as_str(), "Andersson");
        assert!(queries.personal_number_exists(&patient.personal_number));
        assert_eq!(queries.patients().len(), 1);

        let entries = queries.journal_entries_for_patient(patient_id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].note.as_str(), "Follow-up");
        assert_eq!(queries.journal_entries().len(), 2);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let (queries, _) = seeded();
        let missing = RecordId::new(404).unwrap();

        assert!(matches!(
            queries.patient(missing),
            Err(RecordError::PatientNotFound(_))
        ));
        assert!(matches!(
            queries.journal_entry(missing),
            Err(RecordError::JournalEntryNotFound(_))
        ));
        assert!(queries.journal_entries_for_patient(missing).is_err());
    }

    #[test]
    fn patient_without_entries_yields_empty_list() {
        let (queries, _) = seeded();
        let store = queries.store.clone();
        let other = store
            .transaction(|tx| {
                apply::<Patient>(
                    tx,
                    Command::Create(PatientData::new("Bo", "Berg", "19800101-0000").unwrap()),
                    None,
                )
            })
            .unwrap()
            .record_id();

        assert!(queries.journal_entries_for_patient(other).unwrap().is_empty());
    }
}

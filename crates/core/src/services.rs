//! Synchronous CRUD services.
//!
//! These apply mutations immediately and return the resulting record to the caller. They go
//! through [`apply`], the same rules the command pipeline uses, and their events are recorded
//! in the outbox like any other mutation.

use crate::command::{apply, Applied, Command, CommandTarget};
use crate::journal::JournalEntry;
use crate::patient::Patient;
use crate::store::RecordStore;
use crate::RecordResult;
use journal_types::RecordId;
use std::marker::PhantomData;
use std::sync::Arc;

/// Synchronous create, update and delete for records of type `K`.
#[derive(Debug)]
pub struct RecordService<K> {
    store: Arc<RecordStore>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for RecordService<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _kind: PhantomData,
        }
    }
}

pub type PatientService = RecordService<Patient>;
pub type JournalService = RecordService<JournalEntry>;

impl<K: CommandTarget> RecordService<K> {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }

    /// Create a record and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns a rejection (`RecordError::is_rejection`) when the record breaks an invariant,
    /// or a store error if the transaction cannot be committed.
    pub fn create(&self, data: K::Data) -> RecordResult<K> {
        let applied = self.run(Command::Create(data))?;
        let record = expect_record(applied)?;
        tracing::info!(kind = %K::KIND, record_id = %record.id(), "record created");
        Ok(record)
    }

    /// Replace the mutable fields of record `id`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the record does not exist.
    pub fn update(&self, id: RecordId, data: K::Data) -> RecordResult<K> {
        let applied = self.run(Command::Update { id, data })?;
        let record = expect_record(applied)?;
        tracing::info!(kind = %K::KIND, record_id = %id, "record updated");
        Ok(record)
    }

    /// # Errors
    ///
    /// Returns a not-found error if the record does not exist.
    pub fn delete(&self, id: RecordId) -> RecordResult<()> {
        self.run(Command::Delete { id })?;
        tracing::info!(kind = %K::KIND, record_id = %id, "record deleted");
        Ok(())
    }

    fn run(&self, command: Command<K::Data>) -> RecordResult<Applied<K>> {
        self.store.transaction(|tx| apply::<K>(tx, command, None))
    }
}

fn expect_record<K: CommandTarget>(applied: Applied<K>) -> RecordResult<K> {
    let record_id = applied.record_id();
    applied.into_record().ok_or_else(|| {
        crate::RecordError::Unavailable(format!(
            "{} {record_id} produced no record state",
            K::KIND
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalEntryData;
    use crate::patient::PatientData;
    use crate::RecordError;

    fn services() -> (Arc<RecordStore>, PatientService, JournalService) {
        let store = Arc::new(RecordStore::in_memory());
        (
            store.clone(),
            PatientService::new(store.clone()),
            JournalService::new(store),
        )
    }

    #[test]
    fn create_update_delete_round() {
        let (store, patients, _) = services();

        let created = patients
            .create(PatientData::new("Anna", "Andersson", "19900101-1234").unwrap())
            .expect("create should succeed");
        assert_eq!(created.id.get(), 1);

        let updated = patients
            .update(
                created.id,
                PatientData::new("Anna", "Berg", "19900101-1234").unwrap(),
            )
            .expect("update should succeed");
        assert_eq!(updated.last_name.as_str(), "Berg");

        patients.delete(created.id).expect("delete should succeed");
        assert!(store.get_patient(created.id).is_none());
        assert_eq!(store.pending_event_count(), 3);
    }

    #[test]
    fn sync_path_enforces_same_invariants() {
        let (_, patients, journal) = services();
        patients
            .create(PatientData::new("Anna", "Andersson", "19900101-1234").unwrap())
            .unwrap();

        let err = patients
            .create(PatientData::new("Annie", "A", "19900101-1234").unwrap())
            .expect_err("duplicate should fail");
        assert!(matches!(err, RecordError::DuplicatePersonalNumber(_)));

        let err = journal
            .create(JournalEntryData::new(RecordId::new(9).unwrap(), "Orphan").unwrap())
            .expect_err("orphan should fail");
        assert!(matches!(err, RecordError::MissingPatient(_)));

        let err = journal
            .delete(RecordId::new(9).unwrap())
            .expect_err("missing entry should fail");
        assert!(err.is_not_found());
    }
}

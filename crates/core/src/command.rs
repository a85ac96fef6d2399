//! Typed mutation commands and the rules for applying them.
//!
//! [`Command`] makes the field combinations of a mutation unrepresentable when they are
//! invalid: a create has no target id, a delete has no payload. [`apply`] runs one command
//! inside a store transaction and records the resulting event in the outbox of that same
//! transaction, so the event commits if and only if the mutation does.
//!
//! Both the asynchronous command pipeline and the synchronous CRUD services go through
//! [`apply`], so they enforce identical invariants.

use crate::event::RecordKind;
use crate::store::Tx;
use crate::{RecordError, RecordResult};
use journal_types::RecordId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// A mutation of one record of type `K` where `D` is `K`'s payload type.
#[derive(Debug, Clone, PartialEq)]
pub enum Command<D> {
    Create(D),
    Update { id: RecordId, data: D },
    Delete { id: RecordId },
}

impl<D> Command<D> {
    /// Wire name of the command tag.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create(_) => "CREATE",
            Command::Update { .. } => "UPDATE",
            Command::Delete { .. } => "DELETE",
        }
    }

    /// The record the command targets; `None` for a create, whose id does not exist yet.
    pub fn target_id(&self) -> Option<RecordId> {
        match self {
            Command::Create(_) => None,
            Command::Update { id, .. } | Command::Delete { id } => Some(*id),
        }
    }

    pub fn data(&self) -> Option<&D> {
        match self {
            Command::Create(data) | Command::Update { data, .. } => Some(data),
            Command::Delete { .. } => None,
        }
    }
}

/// What a successfully applied command did.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied<K> {
    Created(K),
    Updated(K),
    Deleted(RecordId),
}

impl<K: CommandTarget> Applied<K> {
    pub fn record_id(&self) -> RecordId {
        match self {
            Applied::Created(record) | Applied::Updated(record) => record.id(),
            Applied::Deleted(id) => *id,
        }
    }

    pub fn record(&self) -> Option<&K> {
        match self {
            Applied::Created(record) | Applied::Updated(record) => Some(record),
            Applied::Deleted(_) => None,
        }
    }

    pub fn into_record(self) -> Option<K> {
        match self {
            Applied::Created(record) | Applied::Updated(record) => Some(record),
            Applied::Deleted(_) => None,
        }
    }
}

/// A record type that can be created, updated and deleted by commands.
///
/// Implementations hold the per-type invariants (natural-id uniqueness, parent existence)
/// and report violations as rejections (`RecordError::is_rejection`).
pub trait CommandTarget:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Proposed record state carried by create and update commands.
    type Data: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    const KIND: RecordKind;

    fn id(&self) -> RecordId;

    fn create(tx: &mut Tx<'_>, data: Self::Data) -> RecordResult<Self>;

    fn update(tx: &mut Tx<'_>, id: RecordId, data: Self::Data) -> RecordResult<Self>;

    /// Delete the record and anything that cannot outlive it. Tombstones for dependent
    /// records are recorded here; the tombstone for `id` itself is recorded by [`apply`].
    fn delete(tx: &mut Tx<'_>, id: RecordId, command_id: Option<Uuid>) -> RecordResult<()>;
}

/// Apply `command` within `tx` and record its event.
///
/// # Errors
///
/// Returns the rejection raised by the record type, or `RecordError::Serialization` if the
/// resulting record cannot be encoded for the outbox.
pub fn apply<K: CommandTarget>(
    tx: &mut Tx<'_>,
    command: Command<K::Data>,
    command_id: Option<Uuid>,
) -> RecordResult<Applied<K>> {
    match command {
        Command::Create(data) => {
            let record = K::create(tx, data)?;
            record_upsert(tx, &record, command_id)?;
            Ok(Applied::Created(record))
        }
        Command::Update { id, data } => {
            let record = K::update(tx, id, data)?;
            record_upsert(tx, &record, command_id)?;
            Ok(Applied::Updated(record))
        }
        Command::Delete { id } => {
            K::delete(tx, id, command_id)?;
            tx.record_event(K::KIND, id, None, command_id);
            Ok(Applied::Deleted(id))
        }
    }
}

fn record_upsert<K: CommandTarget>(
    tx: &mut Tx<'_>,
    record: &K,
    command_id: Option<Uuid>,
) -> RecordResult<u64> {
    let state = serde_json::to_value(record).map_err(RecordError::Serialization)?;
    Ok(tx.record_event(K::KIND, record.id(), Some(state), command_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JournalEntry, JournalEntryData};
    use crate::patient::{Patient, PatientData};
    use crate::store::RecordStore;

    fn anna() -> PatientData {
        PatientData::new("Anna", "Andersson", "19900101-1234").unwrap()
    }

    fn create_patient(store: &RecordStore, data: PatientData) -> RecordResult<Patient> {
        store
            .transaction(|tx| apply::<Patient>(tx, Command::Create(data), None))
            .map(|applied| applied.into_record().unwrap())
    }

    #[test]
    fn command_accessors() {
        let id = RecordId::new(5).unwrap();
        let create: Command<()> = Command::Create(());
        let update = Command::Update { id, data: () };
        let delete: Command<()> = Command::Delete { id };

        assert_eq!(create.name(), "CREATE");
        assert_eq!(create.target_id(), None);
        assert_eq!(update.target_id(), Some(id));
        assert!(update.data().is_some());
        assert_eq!(delete.name(), "DELETE");
        assert!(delete.data().is_none());
    }

    #[test]
    fn create_records_one_upsert_event() {
        let store = RecordStore::in_memory();
        let command_id = Uuid::new_v4();

        let applied = store
            .transaction(|tx| apply::<Patient>(tx, Command::Create(anna()), Some(command_id)))
            .unwrap();

        let events = store.pending_events(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].record_id, applied.record_id());
        assert_eq!(events[0].command_id, Some(command_id));
        let state = events[0].state.as_ref().expect("create should publish state");
        assert_eq!(state["firstName"], "Anna");
        assert_eq!(state["id"], 1);
    }

    #[test]
    fn duplicate_create_is_rejected_without_event() {
        let store = RecordStore::in_memory();
        create_patient(&store, anna()).unwrap();

        let err = create_patient(&store, anna()).expect_err("duplicate should be rejected");
        assert!(matches!(err, RecordError::DuplicatePersonalNumber(_)));
        assert!(err.is_rejection());
        assert_eq!(store.list_patients().len(), 1);
        assert_eq!(store.pending_event_count(), 1);
    }

    #[test]
    fn update_keeps_identity_and_replaces_mutable_fields() {
        let store = RecordStore::in_memory();
        let created = create_patient(&store, anna()).unwrap();

        let mut data = anna().with_phone_number(Some("0709999999".into()));
        data.personal_number = journal_types::PersonalNumber::new("20000101-0000").unwrap();
        data.first_name = journal_types::NonEmptyText::new("Annika").unwrap();

        let updated = store
            .transaction(|tx| {
                apply::<Patient>(tx, Command::Update { id: created.id, data }, None)
            })
            .unwrap()
            .into_record()
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.personal_number, created.personal_number);
        assert_eq!(updated.first_name.as_str(), "Annika");
        assert_eq!(updated.phone_number.as_deref(), Some("0709999999"));
        assert_eq!(store.get_patient(created.id), Some(updated));
    }

    #[test]
    fn update_and_delete_of_missing_record_change_nothing() {
        let store = RecordStore::in_memory();
        let missing = RecordId::new(999).unwrap();

        let err = store
            .transaction(|tx| {
                apply::<Patient>(tx, Command::Update { id: missing, data: anna() }, None)
            })
            .expect_err("update of missing patient should fail");
        assert!(matches!(err, RecordError::PatientNotFound(_)));

        let err = store
            .transaction(|tx| apply::<Patient>(tx, Command::Delete { id: missing }, None))
            .expect_err("delete of missing patient should fail");
        assert!(matches!(err, RecordError::PatientNotFound(_)));

        assert_eq!(store.pending_event_count(), 0);
    }

    #[test]
    fn delete_patient_cascades_to_journal_entries() {
        let store = RecordStore::in_memory();
        let patient = create_patient(&store, anna()).unwrap();
        let entry = store
            .transaction(|tx| {
                apply::<JournalEntry>(
                    tx,
                    Command::Create(JournalEntryData::new(patient.id, "Headache").unwrap()),
                    None,
                )
            })
            .unwrap();
        let before = store.pending_event_count();

        store
            .transaction(|tx| apply::<Patient>(tx, Command::Delete { id: patient.id }, None))
            .unwrap();

        assert!(store.get_patient(patient.id).is_none());
        assert!(store.get_journal_entry(entry.record_id()).is_none());

        let tombstones: Vec<_> = store
            .pending_events(100)
            .into_iter()
            .skip(before)
            .collect();
        assert_eq!(tombstones.len(), 2);
        assert!(tombstones.iter().all(|e| e.is_tombstone()));
        assert_eq!(tombstones[0].kind, RecordKind::JournalEntry);
        assert_eq!(tombstones[1].kind, RecordKind::Patient);
    }

    #[test]
    fn journal_entry_requires_existing_patient() {
        let store = RecordStore::in_memory();
        let err = store
            .transaction(|tx| {
                apply::<JournalEntry>(
                    tx,
                    Command::Create(
                        JournalEntryData::new(RecordId::new(42).unwrap(), "Orphan").unwrap(),
                    ),
                    None,
                )
            })
            .expect_err("journal entry without patient should fail");

        assert!(matches!(err, RecordError::MissingPatient(id) if id.get() == 42));
        assert!(store.list_journal_entries().is_empty());
    }
}

//! Journal entries: timestamped clinical notes owned by a patient.

use crate::command::CommandTarget;
use crate::event::RecordKind;
use crate::patient::blank_as_none;
use crate::store::Tx;
use crate::{RecordError, RecordResult};
use chrono::{DateTime, Utc};
use journal_types::{NonEmptyText, RecordId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted journal entry.
///
/// `patient_id` and `created_at` are fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: RecordId,
    pub patient_id: RecordId,
    pub note: NonEmptyText,
    pub created_at: DateTime<Utc>,
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
}

/// Proposed journal entry state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntryData {
    #[serde(alias = "patient")]
    pub patient_id: RecordId,
    pub note: NonEmptyText,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub diagnosis: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub treatment: Option<String>,
}

impl JournalEntryData {
    pub fn new(patient_id: RecordId, note: impl AsRef<str>) -> RecordResult<Self> {
        Ok(Self {
            patient_id,
            note: NonEmptyText::new(note)?,
            diagnosis: None,
            treatment: None,
        })
    }

    pub fn with_diagnosis(mut self, diagnosis: Option<String>) -> Self {
        self.diagnosis = diagnosis.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn with_treatment(mut self, treatment: Option<String>) -> Self {
        self.treatment = treatment.filter(|t| !t.trim().is_empty());
        self
    }
}

impl JournalEntry {
    pub(crate) fn from_data(id: RecordId, data: JournalEntryData, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            patient_id: data.patient_id,
            note: data.note,
            created_at,
            diagnosis: data.diagnosis,
            treatment: data.treatment,
        }
    }
}

/// Newest first; entries created in the same instant fall back to descending id.
pub(crate) fn sort_newest_first(entries: &mut [JournalEntry]) {
    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

impl CommandTarget for JournalEntry {
    type Data = JournalEntryData;

    const KIND: RecordKind = RecordKind::JournalEntry;

    fn id(&self) -> RecordId {
        self.id
    }

    fn create(tx: &mut Tx<'_>, data: JournalEntryData) -> RecordResult<Self> {
        if !tx.patient_exists(data.patient_id) {
            return Err(RecordError::MissingPatient(data.patient_id));
        }
        tx.insert_journal_entry(data)
    }

    fn update(tx: &mut Tx<'_>, id: RecordId, data: JournalEntryData) -> RecordResult<Self> {
        let mut entry = tx
            .find_journal_entry(id)
            .ok_or(RecordError::JournalEntryNotFound(id))?;

        if data.patient_id != entry.patient_id {
            tracing::debug!(
                journal_entry_id = %id,
                "ignoring patient change on journal entry update"
            );
        }
        entry.note = data.note;
        entry.diagnosis = data.diagnosis;
        entry.treatment = data.treatment;

        tx.save_journal_entry(entry.clone())?;
        Ok(entry)
    }

    fn delete(tx: &mut Tx<'_>, id: RecordId, _command_id: Option<Uuid>) -> RecordResult<()> {
        if !tx.delete_journal_entry(id) {
            return Err(RecordError::JournalEntryNotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{apply, Command};
    use crate::patient::{Patient, PatientData};
    use crate::store::RecordStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn store_with_patient() -> (RecordStore, RecordId) {
        let store = RecordStore::in_memory();
        let patient = store
            .transaction(|tx| {
                apply::<Patient>(
                    tx,
                    Command::Create(PatientData::new("Anna", "Andersson", "19900101-1234").unwrap()),
                    None,
                )
            })
            .unwrap();
        (store, patient.record_id())
    }

    #[test]
    fn payload_accepts_patient_alias() {
        let data: JournalEntryData =
            serde_json::from_value(json!({ "patient": 3, "note": "Headache" }))
                .expect("alias should deserialize");
        assert_eq!(data.patient_id.get(), 3);
        assert_eq!(data.diagnosis, None);

        let result: Result<JournalEntryData, _> =
            serde_json::from_value(json!({ "patientId": 0, "note": "Headache" }));
        assert!(result.is_err(), "patient id must be positive");
    }

    #[test]
    fn sort_orders_by_time_then_id() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        let data = JournalEntryData::new(RecordId::FIRST, "n").unwrap();

        let mut entries = vec![
            JournalEntry::from_data(RecordId::new(1).unwrap(), data.clone(), early),
            JournalEntry::from_data(RecordId::new(2).unwrap(), data.clone(), late),
            JournalEntry::from_data(RecordId::new(3).unwrap(), data, early),
        ];
        sort_newest_first(&mut entries);

        let ids: Vec<i64> = entries.iter().map(|e| e.id.get()).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn update_keeps_owner_and_creation_time() {
        let (store, patient_id) = store_with_patient();
        let created = store
            .transaction(|tx| {
                apply::<JournalEntry>(
                    tx,
                    Command::Create(JournalEntryData::new(patient_id, "Headache").unwrap()),
                    None,
                )
            })
            .unwrap()
            .into_record()
            .unwrap();

        let data = JournalEntryData::new(RecordId::new(77).unwrap(), "Migraine")
            .unwrap()
            .with_diagnosis(Some("G43".into()));
        let updated = store
            .transaction(|tx| {
                apply::<JournalEntry>(tx, Command::Update { id: created.id, data }, None)
            })
            .unwrap()
            .into_record()
            .unwrap();

        assert_eq!(updated.patient_id, patient_id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.note.as_str(), "Migraine");
        assert_eq!(updated.diagnosis.as_deref(), Some("G43"));
    }

    #[test]
    fn delete_missing_entry_is_rejected() {
        let (store, _) = store_with_patient();
        let err = store
            .transaction(|tx| {
                apply::<JournalEntry>(tx, Command::Delete { id: RecordId::new(5).unwrap() }, None)
            })
            .expect_err("delete of missing entry should fail");
        assert!(matches!(err, RecordError::JournalEntryNotFound(_)));
    }
}

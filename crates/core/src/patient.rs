//! Patient records.
//!
//! A patient is identified by a store-assigned [`RecordId`] and by a natural identifier, the
//! personal number, which must be unique across all patients. Both are fixed once the record
//! exists; every other field is replaced wholesale by an update.

use crate::command::CommandTarget;
use crate::event::RecordKind;
use crate::store::Tx;
use crate::{RecordError, RecordResult};
use chrono::NaiveDate;
use journal_types::{EmailAddress, NonEmptyText, PersonalNumber, RecordId};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A persisted patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: RecordId,
    pub first_name: NonEmptyText,
    pub last_name: NonEmptyText,
    pub personal_number: PersonalNumber,
    pub date_of_birth: Option<NaiveDate>,
    pub email: Option<EmailAddress>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

/// Proposed patient state: everything but the id.
///
/// On update `personal_number` is ignored; the stored value is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientData {
    pub first_name: NonEmptyText,
    pub last_name: NonEmptyText,
    #[serde(alias = "naturalId")]
    pub personal_number: PersonalNumber,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default, deserialize_with = "blank_email_as_none")]
    pub email: Option<EmailAddress>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub phone_number: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub address: Option<String>,
}

impl PatientData {
    /// Payload with the required fields set and every optional field empty.
    pub fn new(
        first_name: impl AsRef<str>,
        last_name: impl AsRef<str>,
        personal_number: impl AsRef<str>,
    ) -> RecordResult<Self> {
        Ok(Self {
            first_name: NonEmptyText::new(first_name)?,
            last_name: NonEmptyText::new(last_name)?,
            personal_number: PersonalNumber::new(personal_number)?,
            date_of_birth: None,
            email: None,
            phone_number: None,
            address: None,
        })
    }

    pub fn with_date_of_birth(mut self, date_of_birth: Option<NaiveDate>) -> Self {
        self.date_of_birth = date_of_birth;
        self
    }

    pub fn with_email(mut self, email: Option<EmailAddress>) -> Self {
        self.email = email;
        self
    }

    pub fn with_phone_number(mut self, phone_number: Option<String>) -> Self {
        self.phone_number = normalise_optional(phone_number);
        self
    }

    pub fn with_address(mut self, address: Option<String>) -> Self {
        self.address = normalise_optional(address);
        self
    }
}

impl Patient {
    pub(crate) fn from_data(id: RecordId, data: PatientData) -> Self {
        Self {
            id,
            first_name: data.first_name,
            last_name: data.last_name,
            personal_number: data.personal_number,
            date_of_birth: data.date_of_birth,
            email: data.email,
            phone_number: data.phone_number,
            address: data.address,
        }
    }

    /// Replace the mutable fields with those of `data`.
    pub fn apply_update(&mut self, data: PatientData) {
        if data.personal_number != self.personal_number {
            tracing::debug!(
                patient_id = %self.id,
                "ignoring personal number change on update"
            );
        }
        self.first_name = data.first_name;
        self.last_name = data.last_name;
        self.date_of_birth = data.date_of_birth;
        self.email = data.email;
        self.phone_number = data.phone_number;
        self.address = data.address;
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl CommandTarget for Patient {
    type Data = PatientData;

    const KIND: RecordKind = RecordKind::Patient;

    fn id(&self) -> RecordId {
        self.id
    }

    fn create(tx: &mut Tx<'_>, data: PatientData) -> RecordResult<Self> {
        if tx.patient_exists_by_personal_number(&data.personal_number) {
            return Err(RecordError::DuplicatePersonalNumber(
                data.personal_number.to_string(),
            ));
        }
        tx.insert_patient(data)
    }

    fn update(tx: &mut Tx<'_>, id: RecordId, data: PatientData) -> RecordResult<Self> {
        let mut patient = tx
            .find_patient(id)
            .ok_or(RecordError::PatientNotFound(id))?;
        patient.apply_update(data);
        tx.save_patient(patient.clone())?;
        Ok(patient)
    }

    fn delete(tx: &mut Tx<'_>, id: RecordId, command_id: Option<Uuid>) -> RecordResult<()> {
        if !tx.patient_exists(id) {
            return Err(RecordError::PatientNotFound(id));
        }

        for entry in tx.find_journal_entries_by_patient(id) {
            tx.delete_journal_entry(entry.id);
            tx.record_event(RecordKind::JournalEntry, entry.id, None, command_id);
        }
        tx.delete_patient(id);
        Ok(())
    }
}

fn normalise_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(normalise_optional(value))
}

fn blank_email_as_none<'de, D>(deserializer: D) -> Result<Option<EmailAddress>, D::Error>
where
    D: Deserializer<'de>,
{
    match blank_as_none(deserializer)? {
        Some(raw) => EmailAddress::parse(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

//! Request and response bodies.
//!
//! Requests carry raw strings and are validated on conversion into the core payload types, so
//! a malformed request becomes a `RecordError::InvalidInput` rather than a deserialisation
//! failure deep inside a handler.

use chrono::NaiveDate;
use journal_core::{
    EmailAddress, JournalEntry, JournalEntryData, NonEmptyText, Patient, PatientData,
    PersonalNumber, RecordError, RecordId,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatientReq {
    pub first_name: String,
    pub last_name: String,
    #[serde(alias = "naturalId")]
    pub personal_number: String,
    /// ISO 8601 date, `YYYY-MM-DD`.
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl TryFrom<PatientReq> for PatientData {
    type Error = RecordError;

    fn try_from(req: PatientReq) -> Result<Self, Self::Error> {
        let date_of_birth = non_blank(req.date_of_birth)
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|_| {
                    RecordError::InvalidInput(format!("dateOfBirth is not a valid date: {raw}"))
                })
            })
            .transpose()?;
        let email = non_blank(req.email)
            .map(EmailAddress::parse)
            .transpose()?;

        Ok(PatientData {
            first_name: NonEmptyText::new(&req.first_name)?,
            last_name: NonEmptyText::new(&req.last_name)?,
            personal_number: PersonalNumber::new(&req.personal_number)?,
            date_of_birth,
            email,
            phone_number: None,
            address: None,
        }
        .with_phone_number(req.phone_number)
        .with_address(req.address))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatientRes {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub personal_number: String,
    pub date_of_birth: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

impl From<Patient> for PatientRes {
    fn from(patient: Patient) -> Self {
        Self {
            id: patient.id.get(),
            first_name: patient.first_name.into_inner(),
            last_name: patient.last_name.into_inner(),
            personal_number: patient.personal_number.to_string(),
            date_of_birth: patient
                .date_of_birth
                .map(|d| d.format(DATE_FORMAT).to_string()),
            email: patient.email.map(|e| e.as_str().to_string()),
            phone_number: patient.phone_number,
            address: patient.address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListPatientsRes {
    pub patients: Vec<PatientRes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntryReq {
    #[serde(alias = "patient")]
    pub patient_id: i64,
    pub note: String,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub treatment: Option<String>,
}

impl TryFrom<JournalEntryReq> for JournalEntryData {
    type Error = RecordError;

    fn try_from(req: JournalEntryReq) -> Result<Self, Self::Error> {
        Ok(JournalEntryData::new(RecordId::new(req.patient_id)?, &req.note)?
            .with_diagnosis(non_blank(req.diagnosis))
            .with_treatment(non_blank(req.treatment)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntryRes {
    pub id: i64,
    pub patient_id: i64,
    pub note: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
}

impl From<JournalEntry> for JournalEntryRes {
    fn from(entry: JournalEntry) -> Self {
        Self {
            id: entry.id.get(),
            patient_id: entry.patient_id.get(),
            note: entry.note.into_inner(),
            created_at: entry.created_at.to_rfc3339(),
            diagnosis: entry.diagnosis,
            treatment: entry.treatment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListJournalEntriesRes {
    pub entries: Vec<JournalEntryRes>,
}

/// Receipt for an asynchronous command. The command has been queued, not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandAcceptedRes {
    pub command_id: String,
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub message: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

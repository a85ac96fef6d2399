use crate::event::RecordKind;
use journal_types::RecordId;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("patient with personal number {0} already exists")]
    DuplicatePersonalNumber(String),
    #[error("patient {0} does not exist")]
    PatientNotFound(RecordId),
    #[error("journal entry {0} does not exist")]
    JournalEntryNotFound(RecordId),
    #[error("cannot create journal entry: patient {0} does not exist")]
    MissingPatient(RecordId),

    #[error("failed to create data directory: {0}")]
    DataDirCreation(std::io::Error),
    #[error("failed to read store file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write store file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize record: {0}")]
    Deserialization(serde_json::Error),
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("no {0} ids left to assign")]
    IdsExhausted(RecordKind),
}

impl RecordError {
    /// Conditions caused by the request itself: retrying the same input gives the same answer.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RecordError::InvalidInput(_)
                | RecordError::DuplicatePersonalNumber(_)
                | RecordError::PatientNotFound(_)
                | RecordError::JournalEntryNotFound(_)
                | RecordError::MissingPatient(_)
        )
    }

    /// Infrastructure conditions that may clear up on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RecordError::FileWrite(_) | RecordError::FileRead(_) | RecordError::Unavailable(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RecordError::PatientNotFound(_) | RecordError::JournalEntryNotFound(_)
        )
    }
}

impl From<journal_types::TextError> for RecordError {
    fn from(err: journal_types::TextError) -> Self {
        RecordError::InvalidInput(err.to_string())
    }
}

impl From<journal_types::EmailError> for RecordError {
    fn from(err: journal_types::EmailError) -> Self {
        RecordError::InvalidInput(err.to_string())
    }
}

impl From<journal_types::IdError> for RecordError {
    fn from(err: journal_types::IdError) -> Self {
        RecordError::InvalidInput(err.to_string())
    }
}

pub type RecordResult<T> = std::result::Result<T, RecordError>;

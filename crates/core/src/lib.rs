//! # Journal Core
//!
//! Core business logic for the patient journal service.
//!
//! This crate contains the data model and everything that touches stored state:
//! - Patient and journal entry records with their invariants
//! - The transactional record store (in memory or backed by a commit log under `data_dir`)
//! - The event outbox, written in the same transaction as each mutation
//! - Typed mutation commands shared by the command pipeline and the synchronous services
//! - Read-only queries
//!
//! **No transport concerns**: channels, HTTP and authorisation belong in `journal-messaging`,
//! `api-rest` or `api-shared`.

pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod journal;
pub mod patient;
pub mod query;
pub mod services;
pub mod store;

pub use command::{apply, Applied, Command, CommandTarget};
pub use config::CoreConfig;
pub use error::{RecordError, RecordResult};
pub use event::{EventType, RecordKind, StoredEvent};
pub use journal::{JournalEntry, JournalEntryData};
pub use patient::{Patient, PatientData};
pub use query::QueryService;
pub use services::{JournalService, PatientService, RecordService};
pub use store::{FilePersistence, LogEntry, MemoryPersistence, Persistence, RecordStore, Snapshot};

pub use journal_types::{EmailAddress, NonEmptyText, PersonalNumber, RecordId};

//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.

use crate::store::RecordStore;
use crate::{RecordError, RecordResult};
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug, Default)]
pub struct CoreConfig {
    data_dir: Option<PathBuf>,
}

impl CoreConfig {
    /// Configuration for a store that lives only in memory.
    pub fn in_memory() -> Self {
        Self { data_dir: None }
    }

    /// Configuration for a file-backed store rooted at `data_dir`.
    ///
    /// The directory is created on first use if it does not exist, but an existing path that
    /// is not a directory is rejected here so the process fails at startup rather than on the
    /// first write.
    pub fn with_data_dir(data_dir: PathBuf) -> RecordResult<Self> {
        if data_dir.as_os_str().is_empty() {
            return Err(RecordError::InvalidInput("data_dir cannot be empty".into()));
        }
        if data_dir.exists() && !data_dir.is_dir() {
            return Err(RecordError::InvalidInput(format!(
                "data_dir is not a directory: {}",
                data_dir.display()
            )));
        }
        Ok(Self {
            data_dir: Some(data_dir),
        })
    }

    /// Build configuration from an optional raw value (typically an environment variable).
    ///
    /// `None` or a blank value selects the in-memory store.
    pub fn from_data_dir_value(value: Option<String>) -> RecordResult<Self> {
        match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            Some(dir) => Self::with_data_dir(PathBuf::from(dir)),
            None => Ok(Self::in_memory()),
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Open the record store described by this configuration.
    pub fn open_store(&self) -> RecordResult<RecordStore> {
        match &self.data_dir {
            Some(dir) => RecordStore::open(dir),
            None => Ok(RecordStore::in_memory()),
        }
    }
}

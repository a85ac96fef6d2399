//! Durability backends for the record store.
//!
//! ## File layout
//!
//! ```text
//! <data_dir>/
//!   store.snapshot.json   # compacted state, rewritten when the store is opened
//!   store.log             # one JSON line per transaction committed since the snapshot
//! ```
//!
//! A commit appends one line and syncs it before the store applies the change in memory, so
//! a transaction is durable exactly when `commit` returns `Ok`. A crash in the middle of a
//! write leaves a torn final line, which is discarded on the next open.

use super::{LogEntry, Snapshot, Tables};
use crate::constants::{STORE_LOG_FILENAME, STORE_SNAPSHOT_FILENAME, STORE_SNAPSHOT_TMP_FILENAME};
use crate::{RecordError, RecordResult};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Where committed transactions go.
pub trait Persistence: Send + Sync + std::fmt::Debug {
    /// Everything committed so far.
    fn load(&self) -> RecordResult<Snapshot>;

    /// Make one transaction durable. The store applies the change only after this returns
    /// `Ok`; an `Err` aborts the transaction.
    fn commit(&self, entry: &LogEntry) -> RecordResult<()>;
}

/// No durability: state lives only in the store's memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryPersistence;

impl Persistence for MemoryPersistence {
    fn load(&self) -> RecordResult<Snapshot> {
        Ok(Snapshot::default())
    }

    fn commit(&self, _entry: &LogEntry) -> RecordResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct LogFile {
    file: File,
    len: u64,
}

/// Append-only JSON Lines commit log with a snapshot written on open.
#[derive(Debug)]
pub struct FilePersistence {
    dir: PathBuf,
    log: Mutex<LogFile>,
}

impl FilePersistence {
    /// Open the log in `dir`, creating the directory and an empty log if needed.
    pub fn open(dir: &Path) -> RecordResult<Self> {
        fs::create_dir_all(dir).map_err(RecordError::DataDirCreation)?;

        let log_path = dir.join(STORE_LOG_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&log_path)
            .map_err(RecordError::FileWrite)?;
        let len = file.metadata().map_err(RecordError::FileRead)?.len();

        Ok(Self {
            dir: dir.to_path_buf(),
            log: Mutex::new(LogFile { file, len }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, LogFile> {
        self.log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_snapshot(&self) -> RecordResult<Snapshot> {
        let path = self.dir.join(STORE_SNAPSHOT_FILENAME);
        if !path.is_file() {
            return Ok(Snapshot::default());
        }
        let contents = fs::read_to_string(&path).map_err(RecordError::FileRead)?;
        serde_json::from_str(&contents).map_err(RecordError::Deserialization)
    }

    fn read_log(&self) -> RecordResult<Vec<LogEntry>> {
        let file = File::open(self.dir.join(STORE_LOG_FILENAME)).map_err(RecordError::FileRead)?;
        let lines = BufReader::new(file)
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .map_err(RecordError::FileRead)?;

        let last = lines.len().saturating_sub(1);
        let mut entries = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) if index == last => {
                    tracing::warn!(
                        "discarding torn final line of {}: {}",
                        STORE_LOG_FILENAME,
                        e
                    );
                }
                Err(e) => return Err(RecordError::Deserialization(e)),
            }
        }
        Ok(entries)
    }

    /// Replace the snapshot with `snapshot` and empty the log.
    fn compact(&self, snapshot: &Snapshot, log: &mut LogFile) -> RecordResult<()> {
        let tmp_path = self.dir.join(STORE_SNAPSHOT_TMP_FILENAME);
        let raw = serde_json::to_vec_pretty(snapshot).map_err(RecordError::Serialization)?;
        {
            let mut tmp = File::create(&tmp_path).map_err(RecordError::FileWrite)?;
            tmp.write_all(&raw).map_err(RecordError::FileWrite)?;
            tmp.sync_all().map_err(RecordError::FileWrite)?;
        }
        fs::rename(&tmp_path, self.dir.join(STORE_SNAPSHOT_FILENAME))
            .map_err(RecordError::FileWrite)?;

        // Replaying the log over the new snapshot is idempotent, so a crash before this
        // truncation is harmless.
        log.file.set_len(0).map_err(RecordError::FileWrite)?;
        log.file.sync_all().map_err(RecordError::FileWrite)?;
        log.len = 0;
        Ok(())
    }
}

impl Persistence for FilePersistence {
    fn load(&self) -> RecordResult<Snapshot> {
        let mut log = self.lock_log();

        let mut tables = Tables::from_snapshot(self.read_snapshot()?);
        let entries = self.read_log()?;
        let replayed = entries.len();
        for entry in &entries {
            tables.apply(entry);
        }

        let snapshot = tables.to_snapshot();
        self.compact(&snapshot, &mut log)?;

        tracing::info!(
            dir = %self.dir.display(),
            replayed,
            patients = snapshot.patients.len(),
            journal_entries = snapshot.journal_entries.len(),
            "record store loaded"
        );
        Ok(snapshot)
    }

    fn commit(&self, entry: &LogEntry) -> RecordResult<()> {
        let mut line = serde_json::to_vec(entry).map_err(RecordError::Serialization)?;
        line.push(b'\n');

        let mut log = self.lock_log();
        let previous_len = log.len;

        let written = log
            .file
            .write_all(&line)
            .and_then(|()| log.file.sync_data());
        if let Err(e) = written {
            // Cut off whatever part of the line made it to disk so later commits do not land
            // behind a torn line.
            if let Err(truncate_err) = log.file.set_len(previous_len) {
                tracing::error!(
                    "failed to roll back partial write to {}: {}",
                    STORE_LOG_FILENAME,
                    truncate_err
                );
            }
            return Err(RecordError::FileWrite(e));
        }

        log.len = previous_len + line.len() as u64;
        Ok(())
    }
}

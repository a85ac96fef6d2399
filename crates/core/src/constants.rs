//! Constants used throughout the journal core crate.

/// Append-only commit log, one JSON line per committed transaction.
pub const STORE_LOG_FILENAME: &str = "store.log";

/// Compacted state written when the store is opened.
pub const STORE_SNAPSHOT_FILENAME: &str = "store.snapshot.json";

/// Temporary file used while replacing the snapshot.
pub const STORE_SNAPSHOT_TMP_FILENAME: &str = "store.snapshot.json.tmp";

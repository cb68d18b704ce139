//! Error types for the docket storage core.
//!
//! Storage failures are typed so callers can distinguish missing records
//! from lock contention, transaction misuse, and plain I/O faults. Bulk
//! operations and JSONL import never surface these directly for a single
//! bad record — per-record failures are aggregated into
//! [`crate::storage::BulkOutcome`] instead.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for docket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in docket storage operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Item not found: {id}")]
    ItemNotFound { id: i64 },

    #[error("Dependency not found: {item_id} -> {depends_on_id}")]
    DependencyNotFound { item_id: i64, depends_on_id: i64 },

    #[error("Retrospective not found for item {item_id}")]
    RetrospectiveNotFound { item_id: i64 },

    #[error("Reminder not found: {id}")]
    ReminderNotFound { id: i64 },

    #[error("Link not found: {id}")]
    LinkNotFound { id: i64 },

    #[error("Link already recorded for commit {commit_hash}")]
    DuplicateCommit { commit_hash: String },

    #[error("Could not acquire store lock at {path} within {waited_ms}ms (held by pid {holder:?})")]
    LockContention {
        path: PathBuf,
        waited_ms: u64,
        holder: Option<u32>,
    },

    #[error("A transaction is already open")]
    TransactionAlreadyOpen,

    #[error("No transaction is open")]
    NoOpenTransaction,

    #[error("Corrupt record in {file} line {line}: {message}")]
    CorruptRecord {
        file: String,
        line: usize,
        message: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error means a referenced record does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ItemNotFound { .. }
                | Self::DependencyNotFound { .. }
                | Self::RetrospectiveNotFound { .. }
                | Self::ReminderNotFound { .. }
                | Self::LinkNotFound { .. }
        )
    }

    /// Whether this error came from lock contention rather than a fault.
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }
}

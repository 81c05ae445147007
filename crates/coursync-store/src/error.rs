use std::fmt;

use coursync_shared::ProtocolError;
use thiserror::Error;

/// Which quota tier rejected an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    File,
    Assignment,
    User,
}

impl fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "file size limit",
            Self::Assignment => "assignment storage limit",
            Self::User => "user storage quota",
        })
    }
}

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (database directory, document payloads).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// The row left the pending state before this create round trip
    /// recorded its ids.
    #[error("{table} row {id} is already synced")]
    AlreadySynced { table: &'static str, id: i64 },

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Column name or value rejected before reaching SQL.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An assignment referenced a course code with no local course.
    #[error("Unknown course code: {0}")]
    UnknownCourse(String),

    #[error("File type not allowed: {0}")]
    UnsupportedFileType(String),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Upload of {incoming} bytes exceeds the {scope} ({used} of {limit} bytes used)")]
    QuotaExceeded {
        scope: QuotaScope,
        used: u64,
        incoming: u64,
        limit: u64,
    },

    #[error("Path traversal detected")]
    PathTraversal,
}

impl StoreError {
    /// Map `QueryReturnedNoRows` to [`StoreError::NotFound`].
    pub(crate) fn from_query(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

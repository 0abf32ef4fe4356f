//! Error types for the data store.

use std::io;
use std::path::PathBuf;

/// Result type alias for data store operations.
pub type Result<T> = std::result::Result<T, DataStoreError>;

/// Coarse classification of a [`DataStoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Open,
    Close,
    FileAccess,
    Schema,
    Statement,
}

/// Main error enum for the data store.
#[derive(Debug, thiserror::Error)]
pub enum DataStoreError {
    /// The database file could not be opened or configured.
    #[error("failed to open database at '{}': {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The engine refused to close the connection.
    #[error("failed to close database at '{}': {source}", .path.display())]
    Close {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The schema file could not be read.
    #[error("failed to read schema file '{}': {source}", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The schema script failed to execute.
    #[error("schema error: {0}")]
    Schema(#[source] rusqlite::Error),

    /// A statement failed to prepare, bind, run or commit.
    #[error("statement failed: {source} (sql: {sql})")]
    Statement {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A fetch was given a statement that writes to the database.
    #[error("statement is not read-only: {sql}")]
    NotReadOnly { sql: String },
}

impl DataStoreError {
    pub(crate) fn statement(sql: &str, source: rusqlite::Error) -> Self {
        Self::Statement {
            sql: sql.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Open { .. } => ErrorKind::Open,
            Self::Close { .. } => ErrorKind::Close,
            Self::FileAccess { .. } => ErrorKind::FileAccess,
            Self::Schema(_) => ErrorKind::Schema,
            Self::Statement { .. } | Self::NotReadOnly { .. } => ErrorKind::Statement,
        }
    }

    /// Whether the engine reported the database as busy or locked.
    ///
    /// No retry happens inside the store; callers that contend on the same
    /// file can use this to decide whether to try again.
    pub fn is_busy(&self) -> bool {
        let source = match self {
            Self::Open { source, .. }
            | Self::Close { source, .. }
            | Self::Schema(source)
            | Self::Statement { source, .. } => source,
            _ => return false,
        };
        matches!(
            source.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
        )
    }
}

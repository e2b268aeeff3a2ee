//! Error types for the persistence engine

use thiserror::Error;

use crate::database::Collection;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing the local store
#[derive(Error, Debug)]
pub enum Error {
    /// The store could not be opened; nothing persists for this session
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Stored bytes failed to decode. Callers treat the record as absent.
    #[error("Corrupt record '{id}' in {collection}: {reason}")]
    CorruptRecord {
        collection: Collection,
        id: String,
        reason: String,
    },

    /// Referenced id has no record
    #[error("No record '{id}' in {collection}")]
    NotFound { collection: Collection, id: String },

    /// Input rejected before any write
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A cascade only partly succeeded
    #[error("{operation}: {failed} of {attempted} cleanup steps failed")]
    PartialFailure {
        operation: String,
        attempted: usize,
        failed: usize,
    },

    /// An imported book document could not be parsed or validated
    #[error("Malformed book document: {0}")]
    InvalidDocument(String),

    /// A scope touched a collection it was not opened for
    #[error("Collection {0} is not part of this transaction")]
    OutOfScope(Collection),

    /// A write was attempted through a read-only scope
    #[error("Collection {0} was opened read-only")]
    ReadOnlyScope(Collection),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),
}

impl Error {
    pub fn not_found(collection: Collection, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection,
            id: id.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation(message.into())
    }

    /// True for errors that mean "the record is not usable" rather than
    /// "the store failed". Self-healing paths prune on these.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::CorruptRecord { .. })
    }
}

//! Error types for entity store operations.

use thiserror::Error;

/// Errors that can occur in entity store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced record does not exist.
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    /// A uniqueness or primary key constraint was violated.
    #[error("{0}")]
    Conflict(String),

    /// The SQLite backend failed.
    #[error("database error: {0}")]
    Backend(#[from] rusqlite::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

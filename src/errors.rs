/*!
 * Error types for the multilingual library.
 *
 * Every failure the translation core can produce is a variant of
 * `MultilingualError`. Errors propagate to the immediate caller; nothing
 * in the core retries or swallows them.
 */

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, MultilingualError>;

/// Errors raised by the translation core
#[derive(Error, Debug)]
pub enum MultilingualError {
    /// Invalid language or entity setup, fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A language code that is not part of the configured set
    #[error("Unknown language code: {0}")]
    UnknownLanguage(String),

    /// Unbalanced lock/release on a language context
    #[error("Language state error: {0}")]
    State(String),

    /// A field reference that is neither a master field nor a translatable one
    #[error("Cannot resolve field '{field}' on entity '{entity}'")]
    Resolution {
        /// Entity type the lookup ran against
        entity: String,
        /// Field name as written by the caller
        field: String,
    },

    /// Invalid entity schema registration
    #[error("Schema error: {0}")]
    Schema(String),

    /// Constraint violation reported by the backing store
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// No row matched a lookup that requires one
    #[error("{entity} matching query does not exist")]
    NotFound {
        /// Entity type the lookup ran against
        entity: String,
    },

    /// More than one row matched a lookup that requires exactly one
    #[error("get() returned {count} {entity} rows, expected one")]
    MultipleObjectsReturned {
        /// Entity type the lookup ran against
        entity: String,
        /// Number of matching rows
        count: usize,
    },

    /// Attribute access for a language whose translation was never fetched
    #[error("Translation for language '{code}' was not loaded for {entity} #{id}")]
    TranslationNotLoaded {
        /// Entity type
        entity: String,
        /// Master primary key
        id: i64,
        /// Language code that was requested
        code: String,
    },

    /// Any other driver failure
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// Filesystem failure around the database file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for MultilingualError {
    fn from(error: rusqlite::Error) -> Self {
        match error.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::Integrity(error.to_string()),
            _ => Self::Database(error),
        }
    }
}

impl MultilingualError {
    /// Shorthand for a resolution failure
    pub fn resolution(entity: &str, field: &str) -> Self {
        Self::Resolution {
            entity: entity.to_string(),
            field: field.to_string(),
        }
    }

    /// Whether the error came from a uniqueness or foreign key constraint
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

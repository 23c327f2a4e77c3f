use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot prepare database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A `context` column value that could not be written as JSON.
    #[error("Failed to encode JSON column: {0}")]
    Json(#[from] serde_json::Error),

    /// Another tenant already holds this tax id.
    #[error("A tenant with tax id '{0}' already exists")]
    DuplicateTenant(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    /// True for SQLite `UNIQUE`/`PRIMARY KEY` constraint failures.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

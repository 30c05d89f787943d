use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Store is not connected")]
    NotConnected,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Integrity check failed: {}", issues.join("; "))]
    Integrity { issues: Vec<String> },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Incompatible format version {found}, expected {expected}")]
    VersionIncompatible { found: String, expected: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LibraryError {
    pub(crate) fn not_found(entity_type: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            id: id.into(),
        }
    }

    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Lock contention that callers should retry rather than treat as fatal.
    pub fn is_busy(&self) -> bool {
        match self {
            LibraryError::Database(sqlx::Error::PoolTimedOut) => true,
            LibraryError::Database(sqlx::Error::Database(db)) => matches!(
                db.code().as_deref(),
                Some("5") | Some("6") | Some("261") | Some("517")
            ),
            _ => false,
        }
    }

    /// Turn a unique-constraint violation into [`LibraryError::Conflict`].
    pub(crate) fn from_write(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return LibraryError::Conflict(db.message().to_string());
            }
        }
        LibraryError::Database(err)
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_message_lists_issues() {
        let err = LibraryError::Integrity {
            issues: vec!["missing table settings".into(), "duplicate url".into()],
        };
        assert_eq!(
            err.to_string(),
            "Integrity check failed: missing table settings; duplicate url"
        );
    }

    #[test]
    fn test_pool_timeout_is_busy() {
        assert!(LibraryError::Database(sqlx::Error::PoolTimedOut).is_busy());
        assert!(!LibraryError::NotConnected.is_busy());
    }
}

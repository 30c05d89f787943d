use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync already in progress")]
    SyncInProgress,

    #[error("Legacy import already in progress")]
    ImportInProgress,

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Invalid legacy data in {file}: {message}")]
    InvalidLegacyData { file: String, message: String },

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] core_metadata::MetadataError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

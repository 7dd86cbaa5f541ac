use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Envelope already enqueued: {id}")]
    Duplicate { id: String },

    #[error("Invalid transition for {id}: entry is not in {expected}")]
    InvalidTransition { id: String, expected: &'static str },

    #[error("Entry not found: {id}")]
    NotFound { id: String },
}

pub type Result<T> = std::result::Result<T, BusError>;

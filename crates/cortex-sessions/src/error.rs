use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pending operation not found: {id}")]
    OpNotFound { id: String },

    #[error("Pending operation {id} is no longer pending")]
    OpNotPending { id: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;

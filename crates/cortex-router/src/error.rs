use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Job already enqueued: {id}")]
    Duplicate { id: String },

    #[error("Evaluator error: {0}")]
    Evaluator(String),

    #[error("Executor error: {0}")]
    Executor(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;

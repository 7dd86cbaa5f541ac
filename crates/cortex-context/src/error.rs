use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Session error: {0}")]
    Session(#[from] cortex_sessions::SessionError),

    #[error("Memory error: {0}")]
    Memory(#[from] cortex_hippocampus::MemoryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ContextError>;

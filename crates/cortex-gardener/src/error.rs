use thiserror::Error;

#[derive(Debug, Error)]
pub enum GardenerError {
    #[error("Session error: {0}")]
    Session(#[from] cortex_sessions::SessionError),

    #[error("Memory error: {0}")]
    Memory(#[from] cortex_hippocampus::MemoryError),

    #[error("Extractor model error: {0}")]
    Model(String),
}

pub type Result<T> = std::result::Result<T, GardenerError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Bus error: {0}")]
    Bus(#[from] cortex_bus::BusError),

    #[error("Session error: {0}")]
    Session(#[from] cortex_sessions::SessionError),

    #[error("Context error: {0}")]
    Context(#[from] cortex_context::ContextError),

    #[error("Memory error: {0}")]
    Memory(#[from] cortex_hippocampus::MemoryError),

    #[error("Model error: {0}")]
    Model(#[from] crate::provider::ModelError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Malformed inbound payload: {0}")]
    MalformedPayload(String),

    #[error("Channel unavailable: {channel}")]
    Unavailable { channel: String },

    #[error("Send failed on {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("No adapter registered for channel: {channel}")]
    UnknownChannel { channel: String },
}

pub type Result<T> = std::result::Result<T, ChannelError>;

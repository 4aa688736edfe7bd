use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] bincode::Error),

    #[error("unknown publish topic: {0}")]
    UnknownTopic(String),

    #[error("client-visible command error: {0}")]
    CommandError(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

use uuid::Uuid;

/// Crate-wide error taxonomy. No variant here is a hard process
/// failure — callers reduce each to the documented drop/skip/log
/// behavior for the boundary it crossed.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("epd transport: {0}")]
    EpdTransport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("stt transport: {0}")]
    SttTransport(#[from] reqwest::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("buffer range below base_chunk: requested {requested}, base {base}")]
    RangeAlreadyTruncated { requested: u64, base: u64 },

    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

use std::fmt;

/// Errors surfaced by the queue.
///
/// Transport and pool errors come straight from the Redis driver; `Codec`
/// covers malformed envelopes, including payloads packed with the other
/// compression mode.
#[derive(Debug, thiserror::Error)]
pub enum ImqError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("Redis pool setup error: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Where an emitted [`crate::QueueEvent::Error`] originated.
///
/// The `Display` strings are part of the observable surface and match the
/// source tags embedders filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Message,
    Watch,
    Config,
    SafeDelivery,
    ScriptLoad,
    ReadUnsafe,
    ReadSafe,
    ProcessDelayed,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ErrorSource::Message => "OnMessage",
            ErrorSource::Watch => "OnWatch",
            ErrorSource::Config => "OnConfig",
            ErrorSource::SafeDelivery => "OnSafeDelivery",
            ErrorSource::ScriptLoad => "OnScriptLoad",
            ErrorSource::ReadUnsafe => "OnReadUnsafe",
            ErrorSource::ReadSafe => "OnReadSafe",
            ErrorSource::ProcessDelayed => "OnProcessDelayed",
        };
        f.write_str(tag)
    }
}

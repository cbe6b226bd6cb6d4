use crate::ingest::transport::TransportFailure;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored record is invalid: {0}")]
    Invalid(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Why a lookup could not produce fresh data.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("offline mode: no upstream API key configured")]
    Offline,

    #[error("upstream transport error: {0}")]
    Transport(TransportFailure),

    #[error("upstream API call limit exceeded")]
    RateLimited,

    #[error("upstream returned an empty response")]
    Empty,

    #[error("upstream returned an error: {0}")]
    Upstream(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LookupError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Transport(_) => "transport",
            Self::RateLimited => "rate_limited",
            Self::Empty => "empty",
            Self::Upstream(_) => "upstream",
            Self::Storage(_) => "storage",
        }
    }
}

use coursync_shared::ProtocolError;
use coursync_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Local store unavailable, running without persistence")]
    NoPersistence,

    #[error("Local store lock poisoned")]
    LockPoisoned,

    #[error("Record is not synced yet")]
    NotSynced,
}

impl From<rusqlite::Error> for ClientError {
    fn from(e: rusqlite::Error) -> Self {
        ClientError::Store(StoreError::from(e))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Protocol(ProtocolError::from(e))
    }
}

impl ClientError {
    /// Whether the failure came from reaching the server rather than from
    /// the request itself. Such failures leave records pending.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

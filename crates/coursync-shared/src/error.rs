use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Invalid value for {column}: {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("Unknown sync status: {0}")]
    UnknownSyncStatus(String),

    #[error("Unknown document type: {0}")]
    UnknownDocumentType(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

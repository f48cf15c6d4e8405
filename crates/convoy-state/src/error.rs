//! State persistence error types.

use thiserror::Error;

/// Errors that can occur reading or writing the GDM.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("state changed since read (expected etag {expected}, found {actual})")]
    Conflict { expected: String, actual: String },

    #[error("deployment names undefined cluster {0:?}")]
    UnknownCluster(String),

    #[error("no deployment found for {0}")]
    NoSuchDeployment(String),

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

pub type StateResult<T> = Result<T, StateError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid entity kind: {0}")]
    InvalidEntityKind(String),

    #[error("Invalid relation kind: {0}")]
    InvalidRelationKind(String),

    #[error("Self-referential edge not allowed")]
    SelfReference,

    #[error("Run cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

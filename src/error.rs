use crate::config::StoreConfigError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TransferError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("working set '{0}' is not complete")]
    NotComplete(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("other error: {0}")]
    Other(String),
}

impl From<sqlx::Error> for TransferError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return TransferError::DuplicateKey(db.to_string());
            }
        }
        TransferError::Database(err.to_string())
    }
}

impl From<io::Error> for TransferError {
    fn from(err: io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}

impl From<StoreConfigError> for TransferError {
    fn from(err: StoreConfigError) -> Self {
        TransferError::Config(err.to_string())
    }
}

impl From<String> for TransferError {
    fn from(s: String) -> Self {
        TransferError::Other(s)
    }
}

impl From<&str> for TransferError {
    fn from(s: &str) -> Self {
        TransferError::Other(s.to_string())
    }
}

//! Error types for Blady.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid contact: {0}")]
    InvalidContact(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Watcher error: {0}")]
    Gate(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("History error: {0}")]
    History(String),

    #[error("{0}")]
    Other(String),
}

impl From<crate::providers::ProviderError> for Error {
    fn from(e: crate::providers::ProviderError) -> Self {
        Error::Provider(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::History(e.to_string())
    }
}

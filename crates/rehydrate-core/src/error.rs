use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Chunk store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Search timed out after {}ms", .0.as_millis())]
    SearchTimeout(Duration),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Errors that must fail the whole request instead of degrading one ranked list.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::InvalidConfig(_))
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self { Error::InvalidConfig(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, Error>;

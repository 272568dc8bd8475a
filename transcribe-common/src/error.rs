//! Common error types shared by the transcription engine and its CLI.

use thiserror::Error;

/// Common result type for transcription operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the transcription workspace.
///
/// Database errors are owned by `transcribe-engine` (the only crate that
/// talks to sqlite) and are wrapped into `Internal` here when they need to
/// cross into shared code paths.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

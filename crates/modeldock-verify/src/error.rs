use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    /// Computed digest does not match the expected value.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },

    #[error("I/O error during verification: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, VerifyError>;

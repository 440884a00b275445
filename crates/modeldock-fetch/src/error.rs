use thiserror::Error;

use crate::effects::http::HttpError;

/// Download failure modes.
///
/// [`is_recoverable`](DownloadError::is_recoverable) separates errors worth
/// retrying (transport hiccups, throttling, per-chunk digest mismatches)
/// from fatal conditions that must surface immediately.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server returned status {status}")]
    ServerStatus { status: u16 },

    /// The coordination service answered 200 but the manifest violates its
    /// contract (undecodable body, no chunks, or non-contiguous indices).
    /// Retrying cannot fix this.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("chunk {index} hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        index: u32,
        expected: String,
        actual: String,
    },

    #[error("assembled artifact hash mismatch: expected {expected}, got {actual}")]
    WholeHashMismatch { expected: String, actual: String },

    #[error("chunk {index} corrupted on disk during merge")]
    ChunkCorrupted { index: u32 },

    #[error("insufficient disk space: need {required} bytes, {available} available")]
    InsufficientDiskSpace { required: u64, available: u64 },

    #[error("disk error: {0}")]
    Disk(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("post-processing failed: {0}")]
    PostProcessFailed(String),

    #[error("a download for {0:?} is already running")]
    Busy(String),

    #[error("credentials not configured")]
    MissingCredentials,

    #[error(transparent)]
    Store(#[from] modeldock_store::StoreError),
}

impl DownloadError {
    /// Whether the chunk fetcher should retry after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DownloadError::Network(_) => true,
            DownloadError::ServerStatus { status } => {
                *status == 429 || (500..=599).contains(status)
            }
            DownloadError::HashMismatch { .. } => true,
            _ => false,
        }
    }
}

impl From<HttpError> for DownloadError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Status(status) => DownloadError::ServerStatus { status },
            HttpError::Timeout(message) | HttpError::Transport(message) => {
                DownloadError::Network(message)
            }
        }
    }
}

impl From<modeldock_fs::FsError> for DownloadError {
    fn from(e: modeldock_fs::FsError) -> Self {
        DownloadError::Disk(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Phases of a model download, in order.
///
/// `Compiling` only appears when the manifest marks the artifact as
/// native-inference and a post-process hook is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadPhase {
    Initializing,
    Downloading,
    Merging,
    Validating,
    Compiling,
    Complete,
}

impl fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadPhase::Initializing => "initializing",
            DownloadPhase::Downloading => "downloading",
            DownloadPhase::Merging => "merging",
            DownloadPhase::Validating => "validating",
            DownloadPhase::Compiling => "compiling",
            DownloadPhase::Complete => "complete",
        };
        write!(f, "{name}")
    }
}

/// Snapshot delivered to progress callbacks.
///
/// One event is emitted per completed chunk plus one per phase transition.
/// `total_bytes` is the running estimate projected from completed chunks
/// until the download finishes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedProgress {
    pub percentage: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub bytes_per_second: f64,
    pub eta_seconds: Option<u64>,
    /// Completed chunk count.
    pub current_chunk: u32,
    pub total_chunks: u32,
    pub phase: DownloadPhase,
}

/// Callback invoked with each progress snapshot.
pub type ProgressCallback = Arc<dyn Fn(&DetailedProgress) + Send + Sync>;

//! Immutable configuration and wire types.

pub(crate) mod config;
pub(crate) mod manifest;
pub(crate) mod progress;

pub use config::{init, Credentials, DownloadConfig};
pub use manifest::{Manifest, ManifestChunk};
pub use progress::{DetailedProgress, DownloadPhase, ProgressCallback};

//! Resumable, integrity-verified chunked model downloads.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Immutable configuration and wire types
//! - [`core`] - Pure transformations (backoff, concurrency, progress math)
//! - [`effects`] - I/O operations with trait abstraction
//!
//! The [`Downloader`] facade ties the layers together: it asks the
//! coordination service for a chunk manifest, fetches chunks concurrently
//! with per-chunk SHA-256 verification and adaptive concurrency, journals
//! progress so interrupted downloads resume without re-fetching validated
//! bytes, assembles and re-verifies the final artifact, and maintains a
//! catalog of completed models.

pub mod core;
pub mod data;
pub mod effects;

mod downloader;
mod error;

pub use data::{
    init, Credentials, DetailedProgress, DownloadConfig, DownloadPhase, Manifest, ManifestChunk,
    ProgressCallback,
};
pub use downloader::{Downloader, StatusReport};
pub use effects::{
    BoxStream, DownloadOutcome, HttpClient, HttpError, PostProcess, ReqwestClient, Timeouts,
};
pub use error::{DownloadError, Result};

pub use modeldock_fs::{DiskProbe, SystemDiskProbe};
pub use modeldock_store::{Artifact, ArtifactMetadata, ExistenceResult, Journal};

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use modeldock_fs::{atomic_write, AtomicWriteOptions};

use crate::{Result, StoreError};

/// Descriptive record written beside a finalized artifact. Its presence
/// marks the download as complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub model_name: String,
    pub model_id: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// SHA-256 of the assembled artifact, lowercase hex.
    pub hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub download_date: OffsetDateTime,
}

impl ArtifactMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&content).map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self).map_err(|source| StoreError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        atomic_write(path, &content, AtomicWriteOptions::new().sync(true))?;
        Ok(())
    }
}

use std::path::{Path, PathBuf};

use crate::{Result, StoreError};

/// Longest accepted model identifier.
pub const MAX_MODEL_ID_LEN: usize = 128;

/// Deterministic file layout under a single storage root.
///
/// Every model's files share one flat directory; suffix conventions keep the
/// kinds apart:
///
/// - chunk slot: `<model_id>_chunk_<index>`
/// - journal: `<model_id>_progress`
/// - generic artifact: `<model_id>`
/// - native artifact: `<model_id>.<native_suffix>` (a directory)
/// - metadata: `<model_id>_metadata`
///
/// Pure path arithmetic, no I/O.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    native_suffix: String,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            native_suffix: "mlmodelc".to_string(),
        }
    }

    /// Directory suffix used for the post-processed artifact.
    #[must_use]
    pub fn native_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.native_suffix = suffix.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject identifiers that could escape the storage directory or embed
    /// control characters.
    pub fn validate_model_id(id: &str) -> Result<()> {
        let bad = id.is_empty()
            || id.len() > MAX_MODEL_ID_LEN
            || id == "."
            || id == ".."
            || id
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_control());
        if bad {
            return Err(StoreError::InvalidModelId(id.to_string()));
        }
        Ok(())
    }

    pub fn chunk_path(&self, model_id: &str, index: u32) -> PathBuf {
        self.root.join(format!("{model_id}_chunk_{index}"))
    }

    /// Filename prefix shared by every chunk slot of a model, for bulk
    /// cleanup.
    pub fn chunk_prefix(&self, model_id: &str) -> String {
        format!("{model_id}_chunk_")
    }

    pub fn journal_path(&self, model_id: &str) -> PathBuf {
        self.root.join(format!("{model_id}_progress"))
    }

    pub fn artifact_path(&self, model_id: &str) -> PathBuf {
        self.root.join(model_id)
    }

    pub fn native_artifact_path(&self, model_id: &str) -> PathBuf {
        self.root
            .join(format!("{model_id}.{}", self.native_suffix))
    }

    pub fn metadata_path(&self, model_id: &str) -> PathBuf {
        self.root.join(format!("{model_id}_metadata"))
    }
}

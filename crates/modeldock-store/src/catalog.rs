use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::warn;

use modeldock_fs::dir_size;

use crate::layout::StorageLayout;
use crate::metadata::ArtifactMetadata;
use crate::{Result, StoreError};

const METADATA_SUFFIX: &str = "_metadata";

/// A completed artifact known to the catalog.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub model_id: String,
    pub artifact_path: PathBuf,
    pub metadata_path: PathBuf,
    pub size_bytes: u64,
    pub metadata: ArtifactMetadata,
}

/// Result of an existence query.
#[derive(Debug, Clone)]
pub struct ExistenceResult {
    pub exists: bool,
    pub artifact_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub metadata: Option<ArtifactMetadata>,
}

impl ExistenceResult {
    fn absent() -> Self {
        Self {
            exists: false,
            artifact_path: None,
            metadata_path: None,
            metadata: None,
        }
    }
}

/// Read-only view over completed artifacts under the storage root. Never
/// mutates state.
#[derive(Debug, Clone)]
pub struct Catalog {
    layout: StorageLayout,
}

impl Catalog {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// Snapshot of every completed artifact, newest download first.
    ///
    /// Entries whose metadata cannot be parsed or whose artifact file is
    /// missing are skipped with a warning rather than failing the whole
    /// listing.
    pub fn list_all(&self) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        let entries = match fs::read_dir(self.layout.root()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(artifacts),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.layout.root().to_path_buf(),
                    source,
                })
            }
        };

        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.layout.root().to_path_buf(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(model_id) = name.strip_suffix(METADATA_SUFFIX) else {
                continue;
            };

            let metadata_path = entry.path();
            let metadata = match ArtifactMetadata::load(&metadata_path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(model_id, error = %e, "skipping unreadable metadata");
                    continue;
                }
            };
            let Some(artifact_path) = self.resolve_artifact(model_id) else {
                warn!(model_id, "metadata present but artifact missing, skipping");
                continue;
            };
            let size_bytes = match dir_size(&artifact_path) {
                Ok(size) => size,
                Err(e) => {
                    warn!(model_id, error = %e, "failed to size artifact");
                    0
                }
            };

            artifacts.push(Artifact {
                model_id: model_id.to_string(),
                artifact_path,
                metadata_path,
                size_bytes,
                metadata,
            });
        }

        artifacts.sort_by(|a, b| b.metadata.download_date.cmp(&a.metadata.download_date));
        Ok(artifacts)
    }

    pub fn find_by_id(&self, model_id: &str) -> Result<ExistenceResult> {
        StorageLayout::validate_model_id(model_id)?;
        let metadata_path = self.layout.metadata_path(model_id);
        if !metadata_path.exists() {
            return Ok(ExistenceResult::absent());
        }
        let metadata = ArtifactMetadata::load(&metadata_path)?;
        let Some(artifact_path) = self.resolve_artifact(model_id) else {
            return Ok(ExistenceResult::absent());
        };
        Ok(ExistenceResult {
            exists: true,
            artifact_path: Some(artifact_path),
            metadata_path: Some(metadata_path),
            metadata: Some(metadata),
        })
    }

    /// First artifact whose `model_name` matches `name` exactly.
    pub fn find_by_name(&self, name: &str) -> Result<ExistenceResult> {
        for artifact in self.list_all()? {
            if artifact.metadata.model_name == name {
                return self.find_by_id(&artifact.model_id);
            }
        }
        Ok(ExistenceResult::absent())
    }

    /// The artifact file for a model: the native-format directory when
    /// present, otherwise the generic file.
    fn resolve_artifact(&self, model_id: &str) -> Option<PathBuf> {
        let native = self.layout.native_artifact_path(model_id);
        if native.exists() {
            return Some(native);
        }
        let generic = self.layout.artifact_path(model_id);
        if generic.exists() {
            return Some(generic);
        }
        None
    }
}

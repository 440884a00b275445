use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use modeldock_fs::{remove_if_exists, DiskProbe, SystemDiskProbe};
use modeldock_store::{
    Artifact, Catalog, ExistenceResult, Journal, JournalStore, StorageLayout,
};

use crate::data::config::registry_credentials;
use crate::data::{DownloadConfig, ProgressCallback};
use crate::effects::engine::{purge_partial, DownloadEngine, DownloadOutcome};
use crate::effects::hook::PostProcess;
use crate::effects::http::{HttpClient, ReqwestClient};
use crate::error::{DownloadError, Result};

/// Read-only snapshot of a model's download state.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub has_progress: bool,
    pub journal: Option<Journal>,
    /// Journal-validated chunk indices whose files are present on disk.
    pub existing_chunks: Vec<u32>,
    pub missing_chunks: Vec<u32>,
}

/// Facade over the download engine and catalog.
///
/// One `Downloader` may serve many models concurrently; admission control
/// allows a single in-flight run per model id, and a second `download` for
/// the same id fails fast with [`DownloadError::Busy`].
pub struct Downloader<C: HttpClient = ReqwestClient> {
    config: DownloadConfig,
    http: Arc<C>,
    hook: Option<Arc<dyn PostProcess>>,
    disk: Arc<dyn DiskProbe>,
    layout: StorageLayout,
    journals: JournalStore,
    catalog: Catalog,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Downloader<ReqwestClient> {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let http = ReqwestClient::new().map_err(DownloadError::from)?;
        Ok(Self::with_client(config, http))
    }
}

impl<C: HttpClient> Downloader<C> {
    /// Build a downloader around a custom HTTP client, e.g. a mock in
    /// tests.
    pub fn with_client(config: DownloadConfig, http: C) -> Self {
        let layout = StorageLayout::new(&config.storage_root)
            .native_suffix(config.native_suffix.clone());
        Self {
            http: Arc::new(http),
            hook: None,
            disk: Arc::new(SystemDiskProbe),
            journals: JournalStore::new(layout.clone()),
            catalog: Catalog::new(layout.clone()),
            layout,
            active: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Install the post-download transformation invoked for
    /// native-inference artifacts.
    #[must_use]
    pub fn post_process(mut self, hook: Arc<dyn PostProcess>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Override the free-space probe used by the disk guard.
    #[must_use]
    pub fn disk_probe(mut self, probe: Arc<dyn DiskProbe>) -> Self {
        self.disk = probe;
        self
    }

    /// Download a model, resuming any prior validated chunks, and return
    /// the final artifact and metadata paths. If the model is already in
    /// the catalog, returns its paths without network I/O.
    pub async fn download(
        &self,
        model_id: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DownloadOutcome> {
        StorageLayout::validate_model_id(model_id)?;
        let credentials = self
            .config
            .credentials
            .clone()
            .or_else(registry_credentials)
            .ok_or(DownloadError::MissingCredentials)?;

        let token = {
            let mut active = self.active.lock();
            if active.contains_key(model_id) {
                return Err(DownloadError::Busy(model_id.to_string()));
            }
            let token = CancellationToken::new();
            active.insert(model_id.to_string(), token.clone());
            token
        };
        let _guard = ActiveGuard {
            active: self.active.clone(),
            model_id: model_id.to_string(),
        };

        let engine = DownloadEngine::new(
            self.config.clone(),
            self.http.clone(),
            self.hook.clone(),
            self.disk.clone(),
        );
        engine.run(model_id, credentials, on_progress, token).await
    }

    /// Cancel a running download, or purge stale partial state when no run
    /// is active. Idempotent; unknown ids are a no-op.
    pub fn cancel(&self, model_id: &str) -> Result<()> {
        StorageLayout::validate_model_id(model_id)?;
        let token = self.active.lock().get(model_id).cloned();
        match token {
            Some(token) => {
                debug!(model_id, "cancelling in-flight download");
                // the engine purges chunks and journal at its next
                // suspension point
                token.cancel();
            }
            None => purge_partial(&self.layout, &self.journals, model_id),
        }
        Ok(())
    }

    pub fn exists(&self, model_id: &str) -> Result<ExistenceResult> {
        Ok(self.catalog.find_by_id(model_id)?)
    }

    pub fn find_by_name(&self, name: &str) -> Result<ExistenceResult> {
        Ok(self.catalog.find_by_name(name)?)
    }

    /// Snapshot of every completed artifact, newest first.
    pub fn list(&self) -> Result<Vec<Artifact>> {
        Ok(self.catalog.list_all()?)
    }

    /// Remove a completed artifact, its native variant, and its metadata.
    pub fn delete(&self, model_id: &str) -> Result<()> {
        StorageLayout::validate_model_id(model_id)?;
        if self.active.lock().contains_key(model_id) {
            return Err(DownloadError::Busy(model_id.to_string()));
        }
        remove_if_exists(self.layout.metadata_path(model_id))?;
        remove_if_exists(self.layout.artifact_path(model_id))?;
        remove_if_exists(self.layout.native_artifact_path(model_id))?;
        Ok(())
    }

    /// Read-only view of the journal and which chunk files are actually on
    /// disk.
    pub fn status(&self, model_id: &str) -> Result<StatusReport> {
        StorageLayout::validate_model_id(model_id)?;
        let Some(journal) = self.journals.load(model_id) else {
            return Ok(StatusReport {
                has_progress: false,
                journal: None,
                existing_chunks: Vec::new(),
                missing_chunks: Vec::new(),
            });
        };

        let existing: Vec<u32> = journal
            .validated_chunks
            .iter()
            .copied()
            .filter(|&index| self.layout.chunk_path(model_id, index).exists())
            .collect();
        let missing: Vec<u32> = (0..journal.total_chunks)
            .filter(|index| !existing.contains(index))
            .collect();

        Ok(StatusReport {
            has_progress: true,
            existing_chunks: existing,
            missing_chunks: missing,
            journal: Some(journal),
        })
    }
}

/// Releases the admission slot when a download run ends, however it ends.
struct ActiveGuard {
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
    model_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.model_id);
    }
}

use std::collections::{BTreeSet, VecDeque};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use modeldock_fs::{remove_if_exists, DiskProbe};
use modeldock_store::{ArtifactMetadata, Catalog, Journal, JournalStore, StorageLayout};
use modeldock_verify::{verify_file, HashingWriter, StreamingHasher};

use crate::core::estimated_total;
use crate::data::{Credentials, DownloadConfig, DownloadPhase, Manifest, ProgressCallback};
use crate::effects::chunk::ChunkFetcher;
use crate::effects::coordinator::Coordinator;
use crate::effects::emitter::ProgressEmitter;
use crate::effects::hook::PostProcess;
use crate::effects::http::HttpClient;
use crate::effects::manifest::ManifestClient;
use crate::error::{DownloadError, Result};

const MERGE_BUF_SIZE: usize = 1024 * 1024;

/// Paths produced by a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub artifact_path: PathBuf,
    pub metadata_path: PathBuf,
}

/// One download run: plan → fetch → merge → validate → post-process →
/// finalize.
///
/// The fetch stage is a task group with adaptive admission: the number of
/// in-flight chunk fetches never exceeds the level derived from the failure
/// ratio, and new fetches backfill as others complete. The journal is only
/// touched from the engine's own task, strictly ordered by completion.
pub(crate) struct DownloadEngine<C> {
    config: DownloadConfig,
    http: Arc<C>,
    layout: StorageLayout,
    journals: JournalStore,
    catalog: Catalog,
    hook: Option<Arc<dyn PostProcess>>,
    disk: Arc<dyn DiskProbe>,
}

impl<C: HttpClient> DownloadEngine<C> {
    pub fn new(
        config: DownloadConfig,
        http: Arc<C>,
        hook: Option<Arc<dyn PostProcess>>,
        disk: Arc<dyn DiskProbe>,
    ) -> Self {
        let layout = StorageLayout::new(&config.storage_root)
            .native_suffix(config.native_suffix.clone());
        Self {
            journals: JournalStore::new(layout.clone()),
            catalog: Catalog::new(layout.clone()),
            layout,
            config,
            http,
            hook,
            disk,
        }
    }

    pub async fn run(
        &self,
        model_id: &str,
        credentials: Credentials,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<DownloadOutcome> {
        let result = self
            .run_inner(model_id, credentials, on_progress, &cancel)
            .await;
        if matches!(result, Err(DownloadError::Cancelled)) {
            info!(model_id, "cancelled, removing partial state");
            purge_partial(&self.layout, &self.journals, model_id);
            let _ = remove_if_exists(self.partial_artifact_path(model_id));
            if !self.layout.metadata_path(model_id).exists() {
                let _ = remove_if_exists(self.layout.artifact_path(model_id));
                let _ = remove_if_exists(self.layout.native_artifact_path(model_id));
            }
        }
        result
    }

    async fn run_inner(
        &self,
        model_id: &str,
        credentials: Credentials,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        StorageLayout::validate_model_id(model_id)?;
        std::fs::create_dir_all(self.layout.root())
            .map_err(|e| DownloadError::Disk(e.to_string()))?;

        // A finished artifact satisfies the call without any network I/O.
        let existing = self.catalog.find_by_id(model_id)?;
        if existing.exists {
            if let (Some(artifact_path), Some(metadata_path)) =
                (existing.artifact_path, existing.metadata_path)
            {
                debug!(model_id, "artifact already in catalog");
                return Ok(DownloadOutcome {
                    artifact_path,
                    metadata_path,
                });
            }
        }

        let mut emitter = ProgressEmitter::new(on_progress);
        emitter.phase(DownloadPhase::Initializing, 0, 0, 0);

        let manifest_client =
            ManifestClient::new(self.http.clone(), &self.config.endpoint, credentials);
        let manifest = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            manifest = manifest_client.fetch(model_id) => manifest?,
        };
        validate_manifest(&manifest)?;

        let with_post_process =
            manifest.file_ext == self.config.native_ext && self.hook.is_some();
        emitter.configure(manifest.total_chunks(), with_post_process);

        // Planning: reconcile the journal with on-disk chunk files.
        let coordinator = Arc::new(Coordinator::new());
        let mut journal = {
            let layout = self.layout.clone();
            let journals = self.journals.clone();
            let manifest = manifest.clone();
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            let model_id = model_id.to_string();
            tokio::task::spawn_blocking(move || {
                plan(&layout, &journals, &model_id, &manifest, &coordinator, &cancel)
            })
            .await
            .map_err(|e| DownloadError::Disk(format!("planning task failed: {e}")))??
        };

        // Disk guard: enforce now when resumed chunks give an estimate,
        // otherwise after the first completed chunk.
        let mut guard_checked = false;
        if coordinator.completed_chunks() > 0 {
            self.check_disk_guard(&coordinator, manifest.total_chunks())?;
            guard_checked = true;
        }

        // Fetching.
        let downloaded = coordinator.downloaded_bytes();
        let completed = coordinator.completed_chunks();
        emitter.phase(
            DownloadPhase::Downloading,
            completed,
            downloaded,
            estimated_total(downloaded, manifest.total_chunks(), completed),
        );

        // Child token: fatal errors stop the in-flight fetches without
        // being mistaken for a caller cancellation.
        let abort = cancel.child_token();
        let fetcher = Arc::new(ChunkFetcher::new(
            self.http.clone(),
            self.layout.clone(),
            self.config.max_attempts,
            self.config.retry_backoff,
        ));
        let mut pending: VecDeque<_> = manifest
            .chunks
            .iter()
            .filter(|c| !coordinator.is_validated(c.index))
            .cloned()
            .collect();
        let mut tasks: JoinSet<(u32, Result<u64>)> = JoinSet::new();
        let mut first_error: Option<DownloadError> = None;

        loop {
            if first_error.is_none() && !abort.is_cancelled() {
                let level = coordinator.current_level().min(self.config.max_concurrency);
                while tasks.len() < level {
                    let Some(chunk) = pending.pop_front() else { break };
                    let fetcher = fetcher.clone();
                    let coordinator = coordinator.clone();
                    let abort = abort.clone();
                    let model_id = model_id.to_string();
                    tasks.spawn(async move {
                        let index = chunk.index;
                        let result = fetcher
                            .fetch(&model_id, &chunk, &coordinator, &abort)
                            .await;
                        (index, result)
                    });
                }
            }

            let Some(joined) = tasks.join_next().await else { break };
            let (index, result) =
                joined.map_err(|e| DownloadError::Disk(format!("fetch task failed: {e}")))?;

            match result {
                Ok(len) => {
                    coordinator.mark_validated(index, len);
                    journal.validated_chunks = coordinator.snapshot_validated();
                    journal.last_updated = OffsetDateTime::now_utc();
                    self.journals.save(&journal)?;

                    let downloaded = coordinator.downloaded_bytes();
                    let completed = coordinator.completed_chunks();
                    if !guard_checked {
                        guard_checked = true;
                        if let Err(e) =
                            self.check_disk_guard(&coordinator, manifest.total_chunks())
                        {
                            first_error = Some(e);
                            abort.cancel();
                            pending.clear();
                            continue;
                        }
                    }
                    emitter.chunk_completed(
                        completed,
                        downloaded,
                        estimated_total(downloaded, manifest.total_chunks(), completed),
                    );
                }
                // Either caller cancellation or our own abort; resolved
                // below once the group has drained.
                Err(DownloadError::Cancelled) => {}
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                        abort.cancel();
                        pending.clear();
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        if let Some(error) = first_error {
            return Err(error);
        }

        // Merging: concatenate chunk files in index order, re-hashing each
        // chunk and the composite in a single pass.
        let downloaded = coordinator.downloaded_bytes();
        let completed = coordinator.completed_chunks();
        emitter.phase(DownloadPhase::Merging, completed, downloaded, downloaded);

        let partial = self.partial_artifact_path(model_id);
        let whole_hash = {
            let layout = self.layout.clone();
            let journal = journal.clone();
            let partial_for_merge = partial.clone();
            let cancel = cancel.clone();
            let model_id = model_id.to_string();
            let merged = tokio::task::spawn_blocking(move || {
                merge_chunks(&layout, &model_id, &journal, &partial_for_merge, &cancel)
            })
            .await
            .map_err(|e| DownloadError::Disk(format!("merge task failed: {e}")))?;
            match merged {
                Ok(hash) => hash,
                Err(e) => {
                    let _ = remove_if_exists(&partial);
                    return Err(e);
                }
            }
        };

        // Validating: the artifact only becomes visible at its final path
        // with a matching composite digest.
        emitter.phase(DownloadPhase::Validating, completed, downloaded, downloaded);
        if whole_hash != manifest.whole_hash {
            let _ = remove_if_exists(&partial);
            return Err(DownloadError::WholeHashMismatch {
                expected: manifest.whole_hash.clone(),
                actual: whole_hash,
            });
        }

        let generic = self.layout.artifact_path(model_id);
        remove_if_exists(&generic)?;
        tokio::fs::rename(&partial, &generic)
            .await
            .map_err(|e| DownloadError::Disk(e.to_string()))?;

        // Post-processing.
        let mut artifact_path = generic.clone();
        if manifest.file_ext == self.config.native_ext {
            if let Some(hook) = &self.hook {
                emitter.phase(DownloadPhase::Compiling, completed, downloaded, downloaded);
                if cancel.is_cancelled() {
                    return Err(DownloadError::Cancelled);
                }
                let hook = hook.clone();
                let source = generic.clone();
                let id = model_id.to_string();
                let transformed =
                    tokio::task::spawn_blocking(move || hook.transform(&source, &id))
                        .await
                        .map_err(|e| {
                            DownloadError::PostProcessFailed(format!(
                                "post-process task failed: {e}"
                            ))
                        })?;
                match transformed {
                    Ok(path) => {
                        if path != generic {
                            if let Err(e) = remove_if_exists(&generic) {
                                warn!(model_id, error = %e, "failed to remove source artifact after post-processing");
                            }
                        }
                        artifact_path = path;
                    }
                    // Source artifact and journal stay on disk for
                    // inspection.
                    Err(e) => return Err(DownloadError::PostProcessFailed(e.to_string())),
                }
            } else {
                debug!(model_id, "no post-process hook configured, keeping generic artifact");
            }
        }

        // Finalizing: metadata first, then the journal and chunk slots go
        // away.
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let metadata = ArtifactMetadata {
            model_name: manifest.model_name.clone(),
            model_id: model_id.to_string(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            category: manifest.category.clone(),
            hash: manifest.whole_hash.clone(),
            download_date: OffsetDateTime::now_utc(),
        };
        let metadata_path = self.layout.metadata_path(model_id);
        metadata.save(&metadata_path)?;
        self.journals.delete(model_id)?;
        for index in 0..manifest.total_chunks() {
            remove_if_exists(self.layout.chunk_path(model_id, index))?;
        }

        info!(model_id, "download complete");
        emitter.phase(DownloadPhase::Complete, completed, downloaded, downloaded);
        Ok(DownloadOutcome {
            artifact_path,
            metadata_path,
        })
    }

    fn check_disk_guard(&self, coordinator: &Coordinator, total_chunks: u32) -> Result<()> {
        let downloaded: u64 = coordinator.snapshot_sizes().values().sum();
        let estimated = estimated_total(downloaded, total_chunks, coordinator.completed_chunks());
        let required = estimated.saturating_mul(2);
        match self.disk.available_space(self.layout.root()) {
            Some(available) if available < required => {
                Err(DownloadError::InsufficientDiskSpace {
                    required,
                    available,
                })
            }
            _ => Ok(()),
        }
    }

    fn partial_artifact_path(&self, model_id: &str) -> PathBuf {
        self.layout.root().join(format!(".{model_id}.partial"))
    }
}

/// Remove the journal, every chunk slot, and any in-flight chunk temp files
/// for a model. Completed artifacts and their metadata are untouched.
pub(crate) fn purge_partial(layout: &StorageLayout, journals: &JournalStore, model_id: &str) {
    if let Err(e) = journals.delete(model_id) {
        warn!(model_id, error = %e, "failed to delete journal during purge");
    }
    let prefix = layout.chunk_prefix(model_id);
    let Ok(entries) = std::fs::read_dir(layout.root()) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let bare = name.strip_prefix('.').unwrap_or(name);
        if bare.starts_with(&prefix) {
            if let Err(e) = remove_if_exists(entry.path()) {
                warn!(model_id, error = %e, "failed to remove chunk file during purge");
            }
        }
    }
}

fn validate_manifest(manifest: &Manifest) -> Result<()> {
    if manifest.chunks.is_empty() {
        return Err(DownloadError::InvalidManifest(
            "manifest contains no chunks".to_string(),
        ));
    }
    for (position, chunk) in manifest.chunks.iter().enumerate() {
        if chunk.index != position as u32 {
            return Err(DownloadError::InvalidManifest(format!(
                "chunk indices not contiguous at {position}"
            )));
        }
    }
    Ok(())
}

/// Reconcile the stored journal with the manifest and on-disk chunk files.
///
/// A manifest whose whole hash or chunk count differs from the journal
/// invalidates all prior progress. Chunks the journal claims are validated
/// are re-hashed; survivors are registered with the coordinator, the rest
/// are deleted and dropped from the journal.
fn plan(
    layout: &StorageLayout,
    journals: &JournalStore,
    model_id: &str,
    manifest: &Manifest,
    coordinator: &Coordinator,
    cancel: &CancellationToken,
) -> Result<Journal> {
    let mut journal = match journals.load(model_id) {
        Some(journal)
            if journal.whole_hash == manifest.whole_hash
                && journal.total_chunks == manifest.total_chunks() =>
        {
            journal
        }
        Some(_) => {
            info!(model_id, "manifest changed, discarding previous progress");
            purge_partial(layout, journals, model_id);
            fresh_journal(model_id, manifest)
        }
        None => fresh_journal(model_id, manifest),
    };

    let mut stale = Vec::new();
    for &index in &journal.validated_chunks {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let slot = layout.chunk_path(model_id, index);
        let verified = match journal.chunk_hashes.get(&index) {
            Some(expected) => verify_file(&slot, expected).is_ok(),
            None => false,
        };
        if verified {
            let size = std::fs::metadata(&slot).map(|m| m.len()).unwrap_or(0);
            coordinator.mark_validated(index, size);
        } else {
            let _ = remove_if_exists(&slot);
            stale.push(index);
        }
    }
    if !stale.is_empty() {
        warn!(
            model_id,
            count = stale.len(),
            "journal listed chunks that failed revalidation"
        );
        for index in stale {
            journal.validated_chunks.remove(&index);
        }
    }

    journal.last_updated = OffsetDateTime::now_utc();
    journals.save(&journal)?;
    Ok(journal)
}

fn fresh_journal(model_id: &str, manifest: &Manifest) -> Journal {
    Journal {
        model_id: model_id.to_string(),
        whole_hash: manifest.whole_hash.clone(),
        file_ext: manifest.file_ext.clone(),
        total_chunks: manifest.total_chunks(),
        chunk_hashes: manifest.chunk_hashes(),
        validated_chunks: BTreeSet::new(),
        model_name: manifest.model_name.clone(),
        version: manifest.version.clone(),
        description: manifest.description.clone(),
        category: manifest.category.clone(),
        last_updated: OffsetDateTime::now_utc(),
    }
}

/// Concatenate chunk files in strict index order into `dest`, re-hashing
/// each chunk against the journal while a tee writer accumulates the
/// composite digest.
fn merge_chunks(
    layout: &StorageLayout,
    model_id: &str,
    journal: &Journal,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<String> {
    let file = File::create(dest).map_err(|e| DownloadError::Disk(e.to_string()))?;
    let mut writer = HashingWriter::new(BufWriter::new(file));
    let mut buffer = vec![0u8; MERGE_BUF_SIZE];

    for index in 0..journal.total_chunks {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let slot = layout.chunk_path(model_id, index);
        let mut reader = File::open(&slot).map_err(|e| DownloadError::Disk(e.to_string()))?;
        let mut chunk_hasher = StreamingHasher::new();
        loop {
            let read = reader
                .read(&mut buffer)
                .map_err(|e| DownloadError::Disk(e.to_string()))?;
            if read == 0 {
                break;
            }
            chunk_hasher.update(&buffer[..read]);
            writer
                .write_all(&buffer[..read])
                .map_err(|e| DownloadError::Disk(e.to_string()))?;
        }
        let expected = journal
            .chunk_hashes
            .get(&index)
            .ok_or(DownloadError::ChunkCorrupted { index })?;
        if &chunk_hasher.finalize_hex() != expected {
            return Err(DownloadError::ChunkCorrupted { index });
        }
    }

    let (buffered, whole_hash) = writer
        .finalize()
        .map_err(|e| DownloadError::Disk(e.to_string()))?;
    buffered
        .into_inner()
        .map_err(|e| DownloadError::Disk(e.to_string()))?
        .sync_all()
        .map_err(|e| DownloadError::Disk(e.to_string()))?;
    Ok(whole_hash)
}

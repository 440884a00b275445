use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use modeldock_store::StorageLayout;
use modeldock_verify::StreamingHasher;

use crate::core::retry_delay;
use crate::data::ManifestChunk;
use crate::effects::coordinator::Coordinator;
use crate::effects::http::HttpClient;
use crate::error::{DownloadError, Result};

/// Downloads a single chunk: streams the pre-signed URL to a sibling temp
/// file while hashing, verifies the digest, and renames into the chunk slot.
///
/// Recoverable failures are retried with exponential backoff; the caller
/// observes only the final outcome. Cancellation is honored at every await.
pub struct ChunkFetcher<C> {
    http: Arc<C>,
    layout: StorageLayout,
    max_attempts: u32,
    backoff_base: Duration,
}

impl<C: HttpClient> ChunkFetcher<C> {
    pub fn new(
        http: Arc<C>,
        layout: StorageLayout,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            http,
            layout,
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Fetch one chunk, returning its byte length on success.
    pub async fn fetch(
        &self,
        model_id: &str,
        chunk: &ManifestChunk,
        coordinator: &Coordinator,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            coordinator.record_attempt();

            match self.fetch_once(model_id, chunk, coordinator, cancel).await {
                Ok(len) => return Ok(len),
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(e) => {
                    coordinator.record_failure();
                    // drop the partial byte count this attempt streamed
                    coordinator.set_size(chunk.index, 0);
                    attempt += 1;
                    if !e.is_recoverable() || attempt >= self.max_attempts {
                        return Err(e);
                    }
                    let delay = retry_delay(attempt, self.backoff_base);
                    warn!(
                        model_id,
                        index = chunk.index,
                        attempt,
                        error = %e,
                        "chunk fetch failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        model_id: &str,
        chunk: &ManifestChunk,
        coordinator: &Coordinator,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let slot = self.layout.chunk_path(model_id, chunk.index);
        let tmp = sibling_tmp(&slot);

        let result = self.stream_to_tmp(chunk, coordinator, &tmp, cancel).await;
        let (len, actual) = match result {
            Ok(ok) => ok,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
        };

        if actual != chunk.chunk_hash {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(DownloadError::HashMismatch {
                index: chunk.index,
                expected: chunk.chunk_hash.clone(),
                actual,
            });
        }

        // Replace any prior slot contents, then move into place.
        modeldock_fs::remove_if_exists(&slot)?;
        tokio::fs::rename(&tmp, &slot)
            .await
            .map_err(|e| DownloadError::Disk(e.to_string()))?;
        Ok(len)
    }

    async fn stream_to_tmp(
        &self,
        chunk: &ManifestChunk,
        coordinator: &Coordinator,
        tmp: &Path,
        cancel: &CancellationToken,
    ) -> Result<(u64, String)> {
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            result = self.http.get_stream(&chunk.signed_url) => result?,
        };

        let mut file = tokio::fs::File::create(tmp)
            .await
            .map_err(|e| DownloadError::Disk(e.to_string()))?;
        let mut hasher = StreamingHasher::new();
        let mut len = 0u64;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => next,
            };
            let Some(next) = next else { break };
            let bytes = next?;

            hasher.update(&bytes);
            file.write_all(&bytes)
                .await
                .map_err(|e| DownloadError::Disk(e.to_string()))?;
            len += bytes.len() as u64;
            coordinator.set_size(chunk.index, len);
        }

        file.sync_all()
            .await
            .map_err(|e| DownloadError::Disk(e.to_string()))?;
        Ok((len, hasher.finalize_hex()))
    }
}

fn sibling_tmp(slot: &Path) -> PathBuf {
    let name = slot.file_name().unwrap_or_default().to_string_lossy();
    slot.parent()
        .unwrap_or_else(|| Path::new(""))
        .join(format!(".{name}.tmp"))
}

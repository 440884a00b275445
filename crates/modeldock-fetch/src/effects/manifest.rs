use std::sync::Arc;

use tracing::debug;

use crate::data::manifest::ManifestResponse;
use crate::data::{Credentials, Manifest};
use crate::effects::http::HttpClient;
use crate::error::{DownloadError, Result};

/// Client for the coordination service's `initDownload` endpoint.
///
/// No retries at this layer; chunk-level retry policy is the fetcher's
/// concern, and a manifest failure surfaces directly to the caller with the
/// status code preserved.
pub struct ManifestClient<C> {
    http: Arc<C>,
    endpoint: String,
    credentials: Credentials,
}

impl<C: HttpClient> ManifestClient<C> {
    pub fn new(http: Arc<C>, endpoint: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            credentials,
        }
    }

    pub async fn fetch(&self, model_id: &str) -> Result<Manifest> {
        let url = format!("{}/initDownload", self.endpoint.trim_end_matches('/'));
        let body = serde_json::json!({ "modelId": model_id }).to_string();
        let headers = [("Authorization".to_string(), self.credentials.bearer())];

        let (status, bytes) = self
            .http
            .post_json(&url, &headers, body)
            .await
            .map_err(DownloadError::from)?;
        if status != 200 {
            return Err(DownloadError::ServerStatus { status });
        }

        let response: ManifestResponse = serde_json::from_slice(&bytes)
            .map_err(|e| DownloadError::InvalidManifest(format!("undecodable response: {e}")))?;
        let manifest = Manifest::from(response);
        debug!(model_id, chunks = manifest.chunks.len(), "manifest received");
        Ok(manifest)
    }
}

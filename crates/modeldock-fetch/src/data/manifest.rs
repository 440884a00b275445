use std::collections::BTreeMap;

use serde::Deserialize;

/// Decoded chunk manifest for one model, as issued by the coordination
/// service.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub model_id: String,
    pub model_name: String,
    pub version: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Artifact kind; the native-inference sentinel triggers the
    /// post-process hook.
    pub file_ext: String,
    /// Lowercase hex SHA-256 of the assembled artifact.
    pub whole_hash: String,
    /// Ordered by `index`, which is 0-based contiguous.
    pub chunks: Vec<ManifestChunk>,
}

/// One pre-signed chunk entry.
#[derive(Debug, Clone)]
pub struct ManifestChunk {
    pub index: u32,
    pub signed_url: String,
    pub expires_at: i64,
    /// Lowercase hex SHA-256 of this chunk's exact bytes.
    pub chunk_hash: String,
}

impl Manifest {
    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn chunk_hashes(&self) -> BTreeMap<u32, String> {
        self.chunks
            .iter()
            .map(|c| (c.index, c.chunk_hash.clone()))
            .collect()
    }
}

/// Wire shape of the `initDownload` response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ManifestResponse {
    url_info_list: Vec<UrlInfoEntry>,
    hash: String,
    model_name: String,
    model_id: String,
    version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    file_ext: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UrlInfoEntry {
    chunk_index: u32,
    url_info: UrlInfo,
    chunk_hash: String,
}

#[derive(Debug, Deserialize)]
struct UrlInfo {
    url: String,
    expiration: i64,
}

impl From<ManifestResponse> for Manifest {
    fn from(response: ManifestResponse) -> Self {
        let mut chunks: Vec<ManifestChunk> = response
            .url_info_list
            .into_iter()
            .map(|entry| ManifestChunk {
                index: entry.chunk_index,
                signed_url: entry.url_info.url,
                expires_at: entry.url_info.expiration,
                chunk_hash: entry.chunk_hash,
            })
            .collect();
        chunks.sort_by_key(|c| c.index);

        Manifest {
            model_id: response.model_id,
            model_name: response.model_name,
            version: response.version,
            description: response.description,
            category: response.category,
            file_ext: response.file_ext,
            whole_hash: response.hash,
            chunks,
        }
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

use modeldock_fs::{atomic_write, remove_if_exists, AtomicWriteOptions};

use crate::layout::StorageLayout;
use crate::{Result, StoreError};

/// Persistent per-model download state.
///
/// An index appears in `validated_chunks` only after its chunk file is on
/// disk and the digest matched; the journal is rewritten after every such
/// transition, so a crash leaves a consistent (possibly stale) record.
/// Unknown fields in stored journals are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Journal {
    pub model_id: String,
    pub whole_hash: String,
    pub file_ext: String,
    pub total_chunks: u32,
    pub chunk_hashes: BTreeMap<u32, String>,
    pub validated_chunks: BTreeSet<u32>,
    pub model_name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl Journal {
    /// Fraction of chunks validated, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.validated_chunks.len() as f64 / self.total_chunks as f64
    }

    pub fn is_complete(&self) -> bool {
        self.total_chunks > 0 && self.validated_chunks.len() as u32 == self.total_chunks
    }
}

/// Loads and persists journals under the storage layout.
#[derive(Debug, Clone)]
pub struct JournalStore {
    layout: StorageLayout,
}

impl JournalStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// The journal for `model_id`, or `None` when absent or unreadable. A
    /// corrupt journal is logged and treated as missing so a fresh download
    /// can proceed.
    pub fn load(&self, model_id: &str) -> Option<Journal> {
        let path = self.layout.journal_path(model_id);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(model_id, error = %e, "journal unreadable, treating as absent");
                return None;
            }
        };
        match serde_json::from_slice(&content) {
            Ok(journal) => Some(journal),
            Err(e) => {
                warn!(model_id, error = %e, "journal corrupt, treating as absent");
                None
            }
        }
    }

    /// Atomically persist the journal: sibling temp file, fsync, rename.
    pub fn save(&self, journal: &Journal) -> Result<()> {
        let path = self.layout.journal_path(&journal.model_id);
        let content =
            serde_json::to_vec_pretty(journal).map_err(|source| StoreError::Encode {
                path: path.clone(),
                source,
            })?;
        atomic_write(&path, &content, AtomicWriteOptions::new().sync(true))?;
        Ok(())
    }

    pub fn delete(&self, model_id: &str) -> Result<()> {
        remove_if_exists(self.layout.journal_path(model_id))?;
        Ok(())
    }
}

use std::fs;
use std::path::Path;

use sysinfo::Disks;

use crate::{FsError, Result};

/// Size of a file in bytes, or the recursive total for a directory.
pub fn dir_size(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path).map_err(|e| FsError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    if !metadata.is_dir() {
        return Ok(metadata.len());
    }

    let mut total = 0u64;
    let entries = fs::read_dir(path).map_err(|e| FsError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| FsError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        total += dir_size(&entry.path())?;
    }
    Ok(total)
}

/// Source of free-space information for the volume holding a path.
///
/// A trait so the download engine's disk guard can be exercised in tests
/// without depending on the machine it runs on.
pub trait DiskProbe: Send + Sync {
    /// Available bytes on the volume containing `path`, or `None` when the
    /// volume cannot be identified.
    fn available_space(&self, path: &Path) -> Option<u64>;
}

/// `sysinfo`-backed probe. Matches `path` against the disk with the longest
/// mount-point prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiskProbe;

impl DiskProbe for SystemDiskProbe {
    fn available_space(&self, path: &Path) -> Option<u64> {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }
}

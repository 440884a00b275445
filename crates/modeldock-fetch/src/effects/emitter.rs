use std::time::Instant;

use crate::core::{eta_seconds, fetch_percentage, phase_percentage};
use crate::data::{DetailedProgress, DownloadPhase, ProgressCallback};

/// Delivers progress snapshots to the caller: one per completed chunk plus
/// one per phase transition, with the byte rate and ETA derived from deltas
/// between emissions.
pub struct ProgressEmitter {
    callback: Option<ProgressCallback>,
    total_chunks: u32,
    with_post_process: bool,
    last_emit: Option<(Instant, u64)>,
    bytes_per_second: f64,
}

impl ProgressEmitter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            total_chunks: 0,
            with_post_process: false,
            last_emit: None,
            bytes_per_second: 0.0,
        }
    }

    /// Set totals once the manifest is known.
    pub fn configure(&mut self, total_chunks: u32, with_post_process: bool) {
        self.total_chunks = total_chunks;
        self.with_post_process = with_post_process;
    }

    /// Emit a phase-transition event. Non-fetch phases report their fixed
    /// percentage; entering `Downloading` reports the scaled position, which
    /// matters when a resumed run starts partway in.
    pub fn phase(&mut self, phase: DownloadPhase, completed: u32, downloaded: u64, total: u64) {
        let percentage = if phase == DownloadPhase::Downloading {
            fetch_percentage(completed, self.total_chunks, self.with_post_process)
        } else {
            phase_percentage(phase, self.with_post_process)
        };
        let remaining = total.saturating_sub(downloaded);
        self.send(DetailedProgress {
            percentage,
            downloaded_bytes: downloaded,
            total_bytes: total,
            bytes_per_second: self.bytes_per_second,
            eta_seconds: eta_seconds(remaining, self.bytes_per_second),
            current_chunk: completed,
            total_chunks: self.total_chunks,
            phase,
        });
    }

    /// Emit a chunk-completion event during fetching.
    pub fn chunk_completed(&mut self, completed: u32, downloaded: u64, estimated_total: u64) {
        let now = Instant::now();
        if let Some((at, bytes)) = self.last_emit {
            let elapsed = now.duration_since(at).as_secs_f64();
            if elapsed > 0.0 && downloaded >= bytes {
                self.bytes_per_second = (downloaded - bytes) as f64 / elapsed;
            }
        }
        self.last_emit = Some((now, downloaded));

        let percentage = fetch_percentage(completed, self.total_chunks, self.with_post_process);
        let remaining = estimated_total.saturating_sub(downloaded);
        self.send(DetailedProgress {
            percentage,
            downloaded_bytes: downloaded,
            total_bytes: estimated_total,
            bytes_per_second: self.bytes_per_second,
            eta_seconds: eta_seconds(remaining, self.bytes_per_second),
            current_chunk: completed,
            total_chunks: self.total_chunks,
            phase: DownloadPhase::Downloading,
        });
    }

    fn send(&self, progress: DetailedProgress) {
        if let Some(callback) = &self.callback {
            callback(&progress);
        }
    }
}

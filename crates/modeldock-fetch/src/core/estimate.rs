use crate::data::DownloadPhase;

/// Portion of the percentage scale occupied by the fetch phase. Later
/// phases (merge, validate, optional compile) take the rest.
fn fetch_span(with_post_process: bool) -> f64 {
    if with_post_process {
        90.0
    } else {
        95.0
    }
}

/// Percentage while fetching: completed chunks scaled into the fetch span.
pub fn fetch_percentage(completed: u32, total: u32, with_post_process: bool) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (completed as f64 / total as f64) * fetch_span(with_post_process)
}

/// Fixed percentage reported on entry to each non-fetch phase.
/// `Downloading` itself is computed per chunk via [`fetch_percentage`].
pub fn phase_percentage(phase: DownloadPhase, with_post_process: bool) -> f64 {
    match phase {
        DownloadPhase::Initializing | DownloadPhase::Downloading => 0.0,
        DownloadPhase::Merging => {
            if with_post_process {
                85.0
            } else {
                95.0
            }
        }
        DownloadPhase::Validating => {
            if with_post_process {
                88.0
            } else {
                98.0
            }
        }
        DownloadPhase::Compiling => 90.0,
        DownloadPhase::Complete => 100.0,
    }
}

/// Projected artifact size from the bytes of completed chunks.
pub fn estimated_total(downloaded: u64, total_chunks: u32, completed: u32) -> u64 {
    downloaded.saturating_mul(u64::from(total_chunks)) / u64::from(completed.max(1))
}

/// Seconds remaining at the current rate; `None` until a rate is known.
pub fn eta_seconds(remaining: u64, bytes_per_second: f64) -> Option<u64> {
    if bytes_per_second <= f64::EPSILON {
        return None;
    }
    Some((remaining as f64 / bytes_per_second).ceil() as u64)
}

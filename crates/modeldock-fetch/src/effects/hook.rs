use std::error::Error;
use std::path::{Path, PathBuf};

/// Post-download transformation of the assembled artifact into its
/// platform-native form, e.g. compiling a neural model for on-device
/// inference.
///
/// Invoked only when the manifest's `file_ext` matches the configured
/// native sentinel. The implementation consumes the generic artifact at
/// `source` and returns the canonical on-disk path; the engine removes the
/// source afterwards if the hook left it behind. Runs on a blocking thread,
/// so heavy CPU or file work is fine.
///
/// On failure the source artifact is left on disk for inspection and the
/// journal is kept.
pub trait PostProcess: Send + Sync {
    fn transform(
        &self,
        source: &Path,
        model_id: &str,
    ) -> std::result::Result<PathBuf, Box<dyn Error + Send + Sync>>;
}

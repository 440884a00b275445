use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::OnceCell;

/// Coordination-service credentials, sent as
/// `Authorization: Bearer <access>:<secret>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}:{}", self.access_key, self.secret_key)
    }
}

static REGISTRY: OnceCell<Credentials> = OnceCell::new();

/// Configure process-wide credentials.
///
/// May be called once, before the first download; later reads are
/// lock-free. Returns `false` when credentials were already set. Explicit
/// credentials on [`DownloadConfig`] take precedence over the registry.
pub fn init(access_key: impl Into<String>, secret_key: impl Into<String>) -> bool {
    REGISTRY.set(Credentials::new(access_key, secret_key)).is_ok()
}

pub(crate) fn registry_credentials() -> Option<Credentials> {
    REGISTRY.get().cloned()
}

/// Engine configuration.
///
/// Retry and concurrency defaults match the fetch policy: up to 3 attempts
/// per chunk with `base * 2^k` backoff, and at most 3 chunk fetches in
/// flight (lowered adaptively when failures accumulate).
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Base URL of the coordination service.
    pub endpoint: String,
    /// Directory holding artifacts, journals, chunks, and metadata.
    pub storage_root: PathBuf,
    /// Explicit credentials; falls back to [`init`] when `None`.
    pub credentials: Option<Credentials>,
    /// `file_ext` value that marks a native-inference artifact.
    pub native_ext: String,
    /// Directory suffix of the post-processed artifact.
    pub native_suffix: String,
    /// Total attempts per chunk, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff between chunk attempts.
    pub retry_backoff: Duration,
    /// Upper bound on concurrent chunk fetches.
    pub max_concurrency: usize,
}

impl DownloadConfig {
    pub fn new(endpoint: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            storage_root: storage_root.into(),
            credentials: None,
            native_ext: "mlmodel".to_string(),
            native_suffix: "mlmodelc".to_string(),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            max_concurrency: 3,
        }
    }

    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn native_ext(mut self, native_ext: impl Into<String>) -> Self {
        self.native_ext = native_ext.into();
        self
    }

    #[must_use]
    pub fn native_suffix(mut self, native_suffix: impl Into<String>) -> Self {
        self.native_suffix = native_suffix.into();
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    #[must_use]
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }
}

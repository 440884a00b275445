//! I/O operations behind trait seams.

pub(crate) mod chunk;
pub mod coordinator;
pub(crate) mod emitter;
pub(crate) mod engine;
pub(crate) mod hook;
pub(crate) mod http;
pub(crate) mod manifest;

pub use coordinator::Coordinator;
pub use engine::DownloadOutcome;
pub use hook::PostProcess;
pub use http::{BoxStream, HttpClient, HttpError, ReqwestClient, Timeouts};
pub use manifest::ManifestClient;

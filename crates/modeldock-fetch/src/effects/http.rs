use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use thiserror::Error;

/// Boxed byte stream for HTTP response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Transport-level errors reported by [`HttpClient`] implementations.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Per-connect and whole-request timeouts for chunk and manifest requests.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Budget to establish a connection.
    pub request: Duration,
    /// Budget for an entire request including the body.
    pub resource: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(60),
            resource: Duration::from_secs(300),
        }
    }
}

/// Minimal HTTP surface the downloader needs: a JSON POST for the manifest
/// and a streaming GET for chunk bodies.
///
/// Implementations own their timeout configuration and error mapping; tests
/// substitute scripted mocks.
pub trait HttpClient: Send + Sync + 'static {
    /// POST a JSON body, returning the status code with the full response
    /// body.
    fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> impl Future<Output = Result<(u16, Bytes), HttpError>> + Send;

    /// GET a pre-signed URL, returning the body as a stream. Non-2xx
    /// statuses surface as [`HttpError::Status`].
    fn get_stream(
        &self,
        url: &str,
    ) -> impl Future<
        Output = Result<BoxStream<'static, Result<Bytes, HttpError>>, HttpError>,
    > + Send;
}

fn map_reqwest(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout(e.to_string())
    } else {
        HttpError::Transport(e.to_string())
    }
}

/// Production HTTP client backed by `reqwest`.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeouts(Timeouts::default())
    }

    pub fn with_timeouts(timeouts: Timeouts) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.request)
            .timeout(timeouts.resource)
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Result<(u16, Bytes), HttpError> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(map_reqwest)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(map_reqwest)?;
        Ok((status, bytes))
    }

    async fn get_stream(
        &self,
        url: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, HttpError>>, HttpError> {
        let response = self.client.get(url).send().await.map_err(map_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status(status.as_u16()));
        }
        let stream = response.bytes_stream().map(|result| result.map_err(map_reqwest));
        Ok(Box::pin(stream))
    }
}

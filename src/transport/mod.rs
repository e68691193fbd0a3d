pub mod http;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use thiserror::Error;

pub use http::HttpTransport;

/// Errors from a single HTTP exchange
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { status: u16, url: String },

    #[error("invalid HTTP client configuration: {0}")]
    Config(String),
}

/// A single request as the transport understands it
#[derive(Debug, Clone, PartialEq)]
pub enum HttpRequest {
    Get {
        url: String,
        headers: HashMap<String, String>,
    },
    Post {
        url: String,
        headers: HashMap<String, String>,
    },
    PostJson {
        url: String,
        json: String,
        headers: HashMap<String, String>,
    },
}

impl HttpRequest {
    pub fn url(&self) -> &str {
        match self {
            HttpRequest::Get { url, .. } => url,
            HttpRequest::Post { url, .. } => url,
            HttpRequest::PostJson { url, .. } => url,
        }
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    pub status: u16,

    /// Header values flattened to one string per name
    pub headers: HashMap<String, String>,

    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body bytes as standard base64
    pub fn base64(&self) -> String {
        STANDARD.encode(&self.body)
    }
}

/// HTTP transport used to execute client tasks
///
/// Non-2xx statuses are reported as `TransportError::Status`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: &HashMap<String, String>) -> Result<HttpResponse, TransportError>;

    async fn post(&self, url: &str, headers: &HashMap<String, String>) -> Result<HttpResponse, TransportError>;

    async fn post_json(
        &self,
        url: &str,
        json: &str,
        headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, TransportError>;

    /// Dispatch one request to the matching method
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        match request {
            HttpRequest::Get { url, headers } => self.get(url, headers).await,
            HttpRequest::Post { url, headers } => self.post(url, headers).await,
            HttpRequest::PostJson { url, json, headers } => self.post_json(url, json, headers).await,
        }
    }

    /// Run requests with at most `concurrency` in flight
    ///
    /// Returns exactly one slot per input request, in input order.
    async fn execute_batch(
        &self,
        requests: Vec<HttpRequest>,
        concurrency: usize,
    ) -> Vec<Result<HttpResponse, TransportError>> {
        stream::iter(requests)
            .map(|request| async move { self.send(&request).await })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

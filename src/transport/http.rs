use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::cli::config::TransportSettings;
use crate::transport::{HttpResponse, Transport, TransportError};

/// reqwest-backed transport
///
/// The client keeps no cookie jar of its own; credentials travel only in the
/// headers each client task carries.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport from the configured timeout and user agent
    pub fn new(settings: &TransportSettings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn with_headers(mut builder: RequestBuilder, headers: &HashMap<String, String>) -> RequestBuilder {
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    async fn dispatch(&self, url: &str, builder: RequestBuilder) -> Result<HttpResponse, TransportError> {
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        // Flatten repeated headers into one comma separated value
        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let body = response.bytes().await?.to_vec();

        debug!("{} answered {} with {} bytes", url, status.as_u16(), body.len());

        Ok(HttpResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, headers: &HashMap<String, String>) -> Result<HttpResponse, TransportError> {
        let builder = Self::with_headers(self.client.get(url), headers);
        self.dispatch(url, builder).await
    }

    async fn post(&self, url: &str, headers: &HashMap<String, String>) -> Result<HttpResponse, TransportError> {
        let builder = Self::with_headers(self.client.post(url), headers);
        self.dispatch(url, builder).await
    }

    async fn post_json(
        &self,
        url: &str,
        json: &str,
        headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = Self::with_headers(self.client.post(url), headers).body(json.to_string());
        if !headers.keys().any(|name| name.eq_ignore_ascii_case("content-type")) {
            builder = builder.header(reqwest::header::CONTENT_TYPE, "application/json");
        }
        self.dispatch(url, builder).await
    }
}

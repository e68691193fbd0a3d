use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::cli::config::HandlerSettings;
use crate::job::error::JobError;
use crate::job::types::{JobRequest, JobResponse};
use crate::transport::TransportError;

/// The remote side of the job protocol
///
/// Decides what client tasks a job needs and produces its final result. The
/// driver treats it as opaque.
#[async_trait]
pub trait RemoteHandler: Send + Sync {
    async fn handle(&self, request: &JobRequest) -> Result<JobResponse, JobError>;
}

/// Handler reached over HTTP: each round is a JSON POST to one endpoint
pub struct HttpHandler {
    client: Client,
    endpoint: String,
}

impl HttpHandler {
    pub fn new(settings: &HandlerSettings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteHandler for HttpHandler {
    async fn handle(&self, request: &JobRequest) -> Result<JobResponse, JobError> {
        debug!("Sending {} round to handler at {}", request.job_type, self.endpoint);

        let response = self.client.post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            }.into());
        }

        let response = response.json::<JobResponse>()
            .await
            .map_err(TransportError::from)?;

        Ok(response)
    }
}

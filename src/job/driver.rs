use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use crate::job::error::JobError;
use crate::job::executor::{TaskExecutor, DEFAULT_CONCURRENCY};
use crate::job::handler::RemoteHandler;
use crate::job::types::*;
use crate::storage::{CredentialStore, ErrorLog, NewErrorLog, SessionCache};
use crate::transport::Transport;
use crate::utils::metrics::{JobOutcome, MetricsCollector};

/// URLs under this scheme are answered from the session cache alone
pub const CACHE_SCHEME: &str = "cache://";

/// Query parameter naming a session cache key to seed the first round
const CACHE_ID_PARAM: &str = "cacheId";

pub const DEFAULT_MAX_ROUNDS: u32 = 100;

/// Tunables for a job driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    /// Cap on in-flight client task requests per round
    pub concurrency: usize,

    /// Ceiling on handler rounds; `None` trusts the handler to terminate
    pub max_rounds: Option<u32>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_rounds: Some(DEFAULT_MAX_ROUNDS),
        }
    }
}

/// Drives a job through rounds with the remote handler until it completes or fails
///
/// Each round is sent only after the previous round's client tasks have all
/// finished. Session state from every response is persisted before the next
/// request is built. A FAILED status always produces an error log entry, and
/// its id is attached to the returned `FatalError`.
pub struct JobDriver {
    handler: Arc<dyn RemoteHandler>,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionCache>,
    error_log: Arc<dyn ErrorLog>,
    executor: TaskExecutor,
    metrics: MetricsCollector,
    settings: DriverSettings,
}

impl JobDriver {
    pub fn new(
        handler: Arc<dyn RemoteHandler>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionCache>,
        error_log: Arc<dyn ErrorLog>,
    ) -> Self {
        let metrics = MetricsCollector::new();
        let executor = TaskExecutor::new(transport.clone(), metrics.clone());

        Self {
            handler,
            transport,
            credentials,
            sessions,
            error_log,
            executor,
            metrics,
            settings: DriverSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: DriverSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Report into an existing collector instead of a private one
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.executor = TaskExecutor::new(self.transport.clone(), metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Run a job to completion
    ///
    /// Returns the handler's result on COMPLETE, and on FAILED the result with
    /// its logged `FatalError`. `Err` is reserved for a broken handler,
    /// unreachable collaborators and the round ceiling.
    pub async fn run(
        &self,
        job_type: JobType,
        url: Option<&str>,
        service_id: Option<&str>,
        payload: Option<&str>,
    ) -> Result<ExtractResult, JobError> {
        // Cache hits are counted on their own, not as jobs
        if let Some(key) = url.and_then(|u| u.strip_prefix(CACHE_SCHEME)) {
            return self.load_cached_extract(key).await;
        }

        self.metrics.record_job_started().await;

        // Refresh jobs are exempt from the check, so this recurses at most once
        if job_type != JobType::RefreshCookie {
            if let Some(service_id) = service_id {
                if self.credentials.is_expired(service_id).await? {
                    info!(service_id = %service_id, "Cookie expired, refreshing before {}", job_type);
                    self.metrics.record_cookie_refresh().await;

                    let refreshed = Box::pin(self.run(JobType::RefreshCookie, None, Some(service_id), None)).await?;
                    if refreshed.is_failed() {
                        warn!(service_id = %service_id, "Cookie refresh failed, {} was not sent", job_type);
                        self.metrics.record_job_outcome(JobOutcome::Failed).await;
                        return Ok(refreshed);
                    }

                    self.store_refreshed_cookie(service_id, &refreshed).await?;
                }
            }
        }

        let cookie = match service_id {
            Some(service_id) => self.credentials.get_cookie(service_id).await?,
            None => None,
        };

        let mut request = JobRequest {
            session_id: None,
            job_type,
            url: url.map(str::to_string),
            results: None,
            service_id: service_id.map(str::to_string),
            cookie: cookie.clone(),
            state: self.initial_state(url, payload).await?,
        };

        let mut rounds: u32 = 0;

        loop {
            rounds += 1;
            self.metrics.record_round().await;
            debug!(job_type = %job_type, round = rounds, "Sending job request");

            let response = self.handler.handle(&request).await?;

            match response.status {
                JobStatus::Complete => {
                    let result = response.result
                        .ok_or_else(|| JobError::contract("COMPLETE response carried no result"))?;
                    if result.is_failed() || !result.has_payload() {
                        return Err(JobError::contract("COMPLETE response carried no info or paged data"));
                    }

                    self.persist_state(response.session_id.as_deref(), response.state.as_ref()).await?;

                    self.metrics.record_job_outcome(JobOutcome::Completed).await;
                    info!(job_type = %job_type, rounds, "Job complete");

                    return Ok(result);
                },
                JobStatus::Continue => {
                    if let Some(max_rounds) = self.settings.max_rounds {
                        if rounds >= max_rounds {
                            error!(job_type = %job_type, rounds, "Handler kept asking to continue, giving up");
                            return Err(JobError::MaxRoundsExceeded { rounds });
                        }
                    }

                    let tasks = match response.tasks {
                        Some(tasks) if !tasks.is_empty() => tasks,
                        _ => return Err(JobError::contract("CONTINUE response carried no tasks")),
                    };
                    let session_id = response.session_id
                        .ok_or_else(|| JobError::contract("CONTINUE response carried no session id"))?;

                    debug!(job_type = %job_type, round = rounds, "Executing {} client tasks", tasks.len());
                    let results = self.executor.execute(&tasks, self.settings.concurrency).await;
                    if results.len() < tasks.len() {
                        warn!(
                            job_type = %job_type,
                            round = rounds,
                            "{} of {} client tasks failed",
                            tasks.len() - results.len(),
                            tasks.len()
                        );
                    }

                    self.persist_state(Some(&session_id), response.state.as_ref()).await?;

                    request = JobRequest {
                        session_id: Some(session_id),
                        job_type,
                        url: url.map(str::to_string),
                        results: Some(results),
                        service_id: service_id.map(str::to_string),
                        cookie: cookie.clone(),
                        state: response.state,
                    };
                },
                JobStatus::Failed => return self.fail(&request, response.result).await,
            }
        }
    }

    /// Run a job and resolve its result into the entity types the job type produces
    pub async fn run_typed<I, P>(
        &self,
        job_type: JobType,
        url: Option<&str>,
        service_id: Option<&str>,
        payload: Option<&str>,
    ) -> Result<TypedExtract<I, P>, JobError>
    where
        I: DeserializeOwned,
        P: DeserializeOwned,
    {
        let result = self.run(job_type, url, service_id, payload).await?;
        Ok(result.decode()?)
    }

    async fn load_cached_extract(&self, key: &str) -> Result<ExtractResult, JobError> {
        match self.sessions.load(key).await? {
            Some(SessionState::CachedExtract { data }) => {
                self.metrics.record_cache_hit().await;
                debug!("Served cached extract for {}", key);
                Ok(data)
            },
            Some(other) => Err(JobError::contract(format!(
                "cache entry {} holds {} state, expected cached_extract",
                key,
                other.kind()
            ))),
            None => Err(JobError::SessionNotFound(key.to_string())),
        }
    }

    async fn store_refreshed_cookie(&self, service_id: &str, refreshed: &ExtractResult) -> Result<(), JobError> {
        let cookie_info = refreshed.info_as::<CookieInfo>()
            .map_err(|e| JobError::contract(format!("refresh cookie job returned malformed cookie info: {}", e)))?
            .ok_or_else(|| JobError::contract("refresh cookie job returned no cookie info"))?;

        self.credentials.set_cookie_info(service_id, &cookie_info).await?;
        info!(service_id = %service_id, "Stored refreshed cookie");

        Ok(())
    }

    /// State for the first round: a cached session named by `cacheId`, else the caller's payload
    async fn initial_state(&self, url: Option<&str>, payload: Option<&str>) -> Result<Option<SessionState>, JobError> {
        if let Some(cache_id) = url.and_then(cache_id) {
            let state = self.sessions.load(&cache_id).await?;
            if state.is_none() {
                warn!("No session state cached under {}, starting without state", cache_id);
            }
            return Ok(state);
        }

        Ok(payload.map(|payload| SessionState::PreFetchPayload {
            payload: payload.to_string(),
        }))
    }

    async fn persist_state(&self, session_id: Option<&str>, state: Option<&SessionState>) -> Result<(), JobError> {
        match (session_id, state) {
            (Some(session_id), Some(state)) => {
                self.sessions.save(session_id, state).await?;
                debug!("Persisted {} state for session {}", state.kind(), session_id);
                Ok(())
            },
            (None, Some(_)) => Err(JobError::contract("response carried session state without a session id")),
            _ => Ok(()),
        }
    }

    /// Log the fatal error and hand the result back with the log id attached
    async fn fail(&self, request: &JobRequest, result: Option<ExtractResult>) -> Result<ExtractResult, JobError> {
        let mut result = result.ok_or_else(|| JobError::contract("FAILED response carried no result"))?;
        let fatal_error = result.fatal_error
            .as_mut()
            .ok_or_else(|| JobError::contract("FAILED response carried no fatal error"))?;

        let error_id = self.error_log.insert(NewErrorLog {
            stack_trace: fatal_error.stack_trace.clone(),
            task: request.job_type.name().to_string(),
            error_code: fatal_error.code.clone(),
            request: request.url.clone(),
        }).await?;
        fatal_error.error_id = Some(error_id);

        error!(
            job_type = %request.job_type,
            code = %fatal_error.code,
            error_id,
            "Job failed"
        );
        self.metrics.record_job_outcome(JobOutcome::Failed).await;

        Ok(result)
    }
}

/// Value of the `cacheId` query parameter, if the URL carries one
fn cache_id(url: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    let query = query.split('#').next().unwrap_or(query);

    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == CACHE_ID_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

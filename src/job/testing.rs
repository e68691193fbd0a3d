//! Scripted collaborators shared by the job unit tests

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::job::error::JobError;
use crate::job::handler::RemoteHandler;
use crate::job::types::*;
use crate::transport::{HttpResponse, Transport, TransportError};

enum Scripted {
    Body(Vec<u8>),
    Status(u16),
}

/// Transport answering from a url -> response table, tracking concurrency
pub struct FakeTransport {
    routes: Mutex<HashMap<String, Scripted>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    latency: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            latency: None,
        }
    }

    pub fn with_latency_ms(mut self, millis: u64) -> Self {
        self.latency = Some(Duration::from_millis(millis));
        self
    }

    pub fn respond(&self, url: &str, body: &str) {
        self.respond_bytes(url, body.as_bytes().to_vec());
    }

    pub fn respond_bytes(&self, url: &str, body: Vec<u8>) {
        self.routes.lock().unwrap().insert(url.to_string(), Scripted::Body(body));
    }

    pub fn fail(&self, url: &str, status: u16) {
        self.routes.lock().unwrap().insert(url.to_string(), Scripted::Status(status));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let outcome = match self.routes.lock().unwrap().get(url) {
            Some(Scripted::Body(body)) => {
                let mut headers = HashMap::new();
                headers.insert("content-type".to_string(), "text/plain".to_string());
                Ok(HttpResponse { status: 200, headers, body: body.clone() })
            },
            Some(Scripted::Status(status)) => Err(TransportError::Status { status: *status, url: url.to_string() }),
            None => Err(TransportError::Status { status: 404, url: url.to_string() }),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str, _headers: &HashMap<String, String>) -> Result<HttpResponse, TransportError> {
        self.answer(url).await
    }

    async fn post(&self, url: &str, _headers: &HashMap<String, String>) -> Result<HttpResponse, TransportError> {
        self.answer(url).await
    }

    async fn post_json(
        &self,
        url: &str,
        _json: &str,
        _headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, TransportError> {
        self.answer(url).await
    }
}

/// Handler replaying queued responses and recording every request it sees
pub struct ScriptedHandler {
    responses: Mutex<VecDeque<JobResponse>>,
    requests: Mutex<Vec<JobRequest>>,
    repeat_last: bool,
}

impl ScriptedHandler {
    pub fn new(responses: Vec<JobResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            repeat_last: false,
        }
    }

    /// Keep answering with the final response once the queue runs dry
    pub fn repeating(response: JobResponse) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![response])
        }
    }

    pub fn requests(&self) -> Vec<JobRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteHandler for ScriptedHandler {
    async fn handle(&self, request: &JobRequest) -> Result<JobResponse, JobError> {
        self.requests.lock().unwrap().push(request.clone());

        let response = {
            let mut responses = self.responses.lock().unwrap();
            if self.repeat_last && responses.len() == 1 {
                responses.front().cloned()
            } else {
                responses.pop_front()
            }
        };

        response.ok_or_else(|| JobError::contract("scripted handler ran out of responses"))
    }
}

pub fn get_task(task_id: &str, url: &str) -> ClientTask {
    ClientTask {
        task_id: task_id.to_string(),
        payload: RequestPayload {
            method: RequestMethod::Get,
            url: url.to_string(),
            headers: HashMap::new(),
            body: None,
            should_return_base64_bytes: false,
        },
    }
}

pub fn paged_result(count: usize) -> ExtractResult {
    ExtractResult {
        info: None,
        paged_data: Some(PagedData {
            item_list: (0..count).map(|i| json!({"name": format!("item {}", i)})).collect(),
            next_page_url: None,
        }),
        fatal_error: None,
    }
}

pub fn complete(session_id: &str, result: ExtractResult) -> JobResponse {
    JobResponse {
        status: JobStatus::Complete,
        session_id: Some(session_id.to_string()),
        tasks: None,
        state: None,
        result: Some(result),
    }
}

pub fn continue_with(session_id: &str, tasks: Vec<ClientTask>, state: Option<SessionState>) -> JobResponse {
    JobResponse {
        status: JobStatus::Continue,
        session_id: Some(session_id.to_string()),
        tasks: Some(tasks),
        state,
        result: None,
    }
}

pub fn failed(session_id: &str, code: &str, stack_trace: &str) -> JobResponse {
    JobResponse {
        status: JobStatus::Failed,
        session_id: Some(session_id.to_string()),
        tasks: None,
        state: None,
        result: Some(ExtractResult {
            fatal_error: Some(FatalError {
                code: code.to_string(),
                stack_trace: stack_trace.to_string(),
                error_id: None,
            }),
            ..Default::default()
        }),
    }
}

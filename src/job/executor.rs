use std::sync::Arc;
use tracing::{debug, warn};

use crate::job::types::{ClientTask, RequestMethod, RequestPayload, TaskResult};
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::utils::metrics::MetricsCollector;

/// Default cap on concurrently in-flight client task requests
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Runs the HTTP tasks a handler asks the client to perform
///
/// A failed task contributes no result. The returned list is a partial answer
/// to the requested set; the handler correlates by task id and decides what to
/// do about the missing ones.
#[derive(Clone)]
pub struct TaskExecutor {
    transport: Arc<dyn Transport>,
    metrics: MetricsCollector,
}

impl TaskExecutor {
    pub fn new(transport: Arc<dyn Transport>, metrics: MetricsCollector) -> Self {
        Self { transport, metrics }
    }

    /// Execute every task once, at most `concurrency` at a time
    pub async fn execute(&self, tasks: &[ClientTask], concurrency: usize) -> Vec<TaskResult> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let timer = self.metrics.start_timer();
        let requests = tasks.iter().map(|task| to_http_request(&task.payload)).collect();
        let responses = self.transport.execute_batch(requests, concurrency).await;

        let mut results = Vec::with_capacity(tasks.len());
        for (task, response) in tasks.iter().zip(responses) {
            match response {
                Ok(response) => {
                    self.metrics.record_task(true, Some(response.status), response.body.len()).await;
                    results.push(to_task_result(task, &response));
                },
                Err(e) => {
                    let status = match &e {
                        TransportError::Status { status, .. } => Some(*status),
                        _ => None,
                    };
                    self.metrics.record_task(false, status, 0).await;
                    warn!(
                        task_id = %task.task_id,
                        url = %task.payload.url,
                        "Client task failed, omitting its result: {}", e
                    );
                },
            }
        }

        let elapsed = timer.end();
        self.metrics.record_batch(elapsed).await;
        debug!("Executed {} client tasks in {}ms, {} succeeded", tasks.len(), elapsed, results.len());

        results
    }
}

/// Translate a task payload into exactly one transport call
fn to_http_request(payload: &RequestPayload) -> HttpRequest {
    let url = payload.url.clone();
    let headers = payload.headers.clone();

    match (payload.method, &payload.body) {
        (RequestMethod::Get, _) => HttpRequest::Get { url, headers },
        (RequestMethod::Post, Some(body)) => HttpRequest::PostJson {
            url,
            json: body.clone(),
            headers,
        },
        (RequestMethod::Post, None) => HttpRequest::Post { url, headers },
    }
}

fn to_task_result(task: &ClientTask, response: &HttpResponse) -> TaskResult {
    let result = if task.payload.should_return_base64_bytes {
        response.base64()
    } else {
        response.text()
    };

    TaskResult {
        task_id: task.task_id.clone(),
        result: Some(result),
        response_header: Some(response.headers.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::testing::{get_task, FakeTransport};
    use std::collections::{HashMap, HashSet};

    fn executor(transport: Arc<FakeTransport>) -> TaskExecutor {
        TaskExecutor::new(transport, MetricsCollector::new())
    }

    #[tokio::test]
    async fn test_empty_batch_skips_transport() {
        let transport = Arc::new(FakeTransport::new());
        let results = executor(transport.clone()).execute(&[], DEFAULT_CONCURRENCY).await;

        assert!(results.is_empty());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_tasks_are_omitted() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond("https://example.com/a", "alpha");
        transport.fail("https://example.com/b", 500);
        transport.respond("https://example.com/c", "gamma");

        let tasks = vec![
            get_task("a", "https://example.com/a"),
            get_task("b", "https://example.com/b"),
            get_task("c", "https://example.com/c"),
        ];

        let collector = MetricsCollector::new();
        let results = TaskExecutor::new(transport.clone(), collector.clone())
            .execute(&tasks, DEFAULT_CONCURRENCY)
            .await;

        let ids: HashSet<&str> = results.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["a", "c"]));
        assert_eq!(transport.call_count(), 3);

        let a = results.iter().find(|r| r.task_id == "a").unwrap();
        assert_eq!(a.result.as_deref(), Some("alpha"));
        assert!(a.response_header.as_ref().unwrap().contains_key("content-type"));

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.tasks_succeeded, 2);
        assert_eq!(metrics.tasks_failed, 1);
        assert_eq!(metrics.status_codes.get(&500), Some(&1));
    }

    #[tokio::test]
    async fn test_base64_results() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond_bytes("https://example.com/img", vec![0x89, b'P', b'N', b'G']);

        let mut task = get_task("img", "https://example.com/img");
        task.payload.should_return_base64_bytes = true;

        let results = executor(transport).execute(&[task], DEFAULT_CONCURRENCY).await;
        assert_eq!(results[0].result.as_deref(), Some("iVBORw=="));
    }

    #[test]
    fn test_post_payload_mapping() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer t".to_string());

        let with_body = RequestPayload {
            method: RequestMethod::Post,
            url: "https://example.com/api".to_string(),
            headers: headers.clone(),
            body: Some("{\"q\":1}".to_string()),
            should_return_base64_bytes: false,
        };
        assert_eq!(
            to_http_request(&with_body),
            HttpRequest::PostJson {
                url: "https://example.com/api".to_string(),
                json: "{\"q\":1}".to_string(),
                headers: headers.clone(),
            }
        );

        let without_body = RequestPayload { body: None, ..with_body };
        assert_eq!(
            to_http_request(&without_body),
            HttpRequest::Post {
                url: "https://example.com/api".to_string(),
                headers,
            }
        );
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let transport = Arc::new(FakeTransport::new().with_latency_ms(20));
        let tasks: Vec<ClientTask> = (0..25)
            .map(|i| {
                let url = format!("https://example.com/item/{}", i);
                transport.respond(&url, "ok");
                get_task(&i.to_string(), &url)
            })
            .collect();

        let results = executor(transport.clone()).execute(&tasks, 10).await;

        assert_eq!(results.len(), 25);
        assert_eq!(transport.call_count(), 25);
        assert!(transport.peak_in_flight() <= 10, "peak was {}", transport.peak_in_flight());
        assert!(transport.peak_in_flight() > 1);
    }
}

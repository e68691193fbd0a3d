use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Number of recent batch durations kept for inspection
pub const BATCH_WINDOW: usize = 256;

/// Job and task counters collector
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// In-memory metrics store
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Jobs sent to the handler, nested refresh jobs included
    pub jobs_started: usize,

    /// Jobs that ended COMPLETE
    pub jobs_completed: usize,

    /// Jobs that ended FAILED
    pub jobs_failed: usize,

    /// `cache://` lookups served without a round trip
    pub cache_hits: usize,

    /// Nested cookie refresh jobs triggered by the pre-flight check
    pub cookie_refreshes: usize,

    /// Requests sent to the remote handler
    pub rounds: usize,

    /// Client task batches executed
    pub task_batches: usize,

    /// Client tasks that produced a result
    pub tasks_succeeded: usize,

    /// Client tasks whose failure was absorbed
    pub tasks_failed: usize,

    /// Bytes downloaded by client tasks
    pub bytes_downloaded: usize,

    /// Durations of the most recent batches in milliseconds, oldest first
    pub batch_durations: VecDeque<u64>,

    /// Sum of all batch durations in milliseconds
    pub total_batch_ms: u64,

    /// HTTP status code counts for client tasks
    pub status_codes: HashMap<u16, usize>,
}

/// How a job run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let metrics = Metrics {
            start_time: Utc::now(),
            ..Default::default()
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    pub async fn record_job_started(&self) {
        self.metrics.lock().await.jobs_started += 1;
    }

    pub async fn record_job_outcome(&self, outcome: JobOutcome) {
        let mut metrics = self.metrics.lock().await;
        match outcome {
            JobOutcome::Completed => metrics.jobs_completed += 1,
            JobOutcome::Failed => metrics.jobs_failed += 1,
        }
    }

    pub async fn record_cache_hit(&self) {
        self.metrics.lock().await.cache_hits += 1;
    }

    pub async fn record_cookie_refresh(&self) {
        self.metrics.lock().await.cookie_refreshes += 1;
    }

    pub async fn record_round(&self) {
        self.metrics.lock().await.rounds += 1;
    }

    /// Record the outcome of a single client task
    pub async fn record_task(&self, success: bool, status_code: Option<u16>, bytes: usize) {
        let mut metrics = self.metrics.lock().await;

        if success {
            metrics.tasks_succeeded += 1;
        } else {
            metrics.tasks_failed += 1;
        }

        metrics.bytes_downloaded += bytes;

        if let Some(code) = status_code {
            *metrics.status_codes.entry(code).or_default() += 1;
        }
    }

    /// Record a finished batch of client tasks
    pub async fn record_batch(&self, duration_ms: u64) {
        let mut metrics = self.metrics.lock().await;
        metrics.task_batches += 1;
        metrics.total_batch_ms += duration_ms;

        if metrics.batch_durations.len() == BATCH_WINDOW {
            metrics.batch_durations.pop_front();
        }
        metrics.batch_durations.push_back(duration_ms);
    }

    /// Start timing a batch
    pub fn start_timer(&self) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
        }
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }

    /// Reset metrics
    pub async fn reset(&self) {
        let mut metrics = self.metrics.lock().await;
        *metrics = Metrics {
            start_time: Utc::now(),
            ..Default::default()
        };
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer for measuring batch durations
pub struct RequestTimer {
    /// Start time of the request
    start: Instant,
}

impl RequestTimer {
    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency samples kept for percentiles; older samples are discarded
const LATENCY_WINDOW: usize = 10_000;

/// Process-wide counters for the removal service.
///
/// Cheap to clone; every clone shares the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    removals_success: AtomicUsize,
    removals_failed: AtomicUsize,
    alpha_matte_requests: AtomicUsize,

    bytes_in: AtomicU64,
    bytes_out: AtomicU64,

    inferences: AtomicUsize,
    inference_ms: RwLock<VecDeque<u64>>,
    request_ms: RwLock<VecDeque<u64>>,

    endpoint_counters: DashMap<String, AtomicUsize>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                removals_success: AtomicUsize::new(0),
                removals_failed: AtomicUsize::new(0),
                alpha_matte_requests: AtomicUsize::new(0),
                bytes_in: AtomicU64::new(0),
                bytes_out: AtomicU64::new(0),
                inferences: AtomicUsize::new(0),
                inference_ms: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
                request_ms: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_removal(&self, alpha_matte: bool, bytes_in: usize, bytes_out: usize, duration: Duration) {
        self.inner.removals_success.fetch_add(1, Ordering::Relaxed);
        if alpha_matte {
            self.inner.alpha_matte_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.bytes_in.fetch_add(bytes_in as u64, Ordering::Relaxed);
        self.inner.bytes_out.fetch_add(bytes_out as u64, Ordering::Relaxed);
        push_sample(&self.inner.request_ms, duration);
    }

    pub fn record_failure(&self) {
        self.inner.removals_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference(&self, duration: Duration) {
        self.inner.inferences.fetch_add(1, Ordering::Relaxed);
        push_sample(&self.inner.inference_ms, duration);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut inference: Vec<u64> = self.inner.inference_ms.read().iter().copied().collect();
        inference.sort_unstable();
        let inference_avg_ms = avg(&inference);
        let inference_p50_ms = percentile(&inference, 0.5);
        let inference_p95_ms = percentile(&inference, 0.95);
        let inference_p99_ms = percentile(&inference, 0.99);

        let request: Vec<u64> = self.inner.request_ms.read().iter().copied().collect();
        let request_avg_ms = avg(&request);

        let mut endpoints: Vec<(String, usize)> = self
            .inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        endpoints.sort();

        MetricsSnapshot {
            removals_success: self.inner.removals_success.load(Ordering::Relaxed),
            removals_failed: self.inner.removals_failed.load(Ordering::Relaxed),
            alpha_matte_requests: self.inner.alpha_matte_requests.load(Ordering::Relaxed),
            bytes_in: self.inner.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.inner.bytes_out.load(Ordering::Relaxed),
            inferences: self.inner.inferences.load(Ordering::Relaxed),
            inference_avg_ms,
            inference_p50_ms,
            inference_p95_ms,
            inference_p99_ms,
            request_avg_ms,
            endpoints,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP removals_total Background removals by outcome
# TYPE removals_total counter
removals_total {{outcome="success"}} {}
removals_total {{outcome="failure"}} {}

# HELP alpha_matte_requests_total Removals that binarized the alpha channel
# TYPE alpha_matte_requests_total counter
alpha_matte_requests_total {{}} {}

# HELP bytes_received_total Uploaded image bytes
# TYPE bytes_received_total counter
bytes_received_total {{}} {}

# HELP bytes_sent_total PNG bytes returned
# TYPE bytes_sent_total counter
bytes_sent_total {{}} {}

# HELP inferences_total Model invocations
# TYPE inferences_total counter
inferences_total {{}} {}

# HELP inference_duration_ms Model inference latency in milliseconds
# TYPE inference_duration_ms gauge
inference_duration_ms {{stat="avg"}} {}
inference_duration_ms {{stat="p50"}} {}
inference_duration_ms {{stat="p95"}} {}
inference_duration_ms {{stat="p99"}} {}

# HELP request_duration_avg_ms Average end-to-end removal time in milliseconds
# TYPE request_duration_avg_ms gauge
request_duration_avg_ms {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.removals_success,
            snapshot.removals_failed,
            snapshot.alpha_matte_requests,
            snapshot.bytes_in,
            snapshot.bytes_out,
            snapshot.inferences,
            snapshot.inference_avg_ms,
            snapshot.inference_p50_ms,
            snapshot.inference_p95_ms,
            snapshot.inference_p99_ms,
            snapshot.request_avg_ms,
            snapshot.uptime_seconds,
        );

        if !snapshot.endpoints.is_empty() {
            out.push_str("\n# HELP http_requests_total Requests per endpoint\n");
            out.push_str("# TYPE http_requests_total counter\n");
            for (endpoint, count) in &snapshot.endpoints {
                out.push_str(&format!(
                    "http_requests_total {{endpoint=\"{}\"}} {}\n",
                    endpoint, count
                ));
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub removals_success: usize,
    pub removals_failed: usize,
    pub alpha_matte_requests: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub inferences: usize,
    pub inference_avg_ms: u64,
    pub inference_p50_ms: u64,
    pub inference_p95_ms: u64,
    pub inference_p99_ms: u64,
    pub request_avg_ms: u64,
    pub endpoints: Vec<(String, usize)>,
    pub uptime_seconds: u64,
}

fn push_sample(window: &RwLock<VecDeque<u64>>, duration: Duration) {
    let mut samples = window.write();
    if samples.len() == LATENCY_WINDOW {
        samples.pop_front();
    }
    samples.push_back(duration.as_millis() as u64);
}

/// `sorted` must be in ascending order
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

//! Prometheus metrics for the request queue and worker pool.
//!
//! Each [`QueueMetrics`] owns its own [`Registry`], so several managers (and
//! parallel tests) never collide on metric registration.

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};

use crate::llm::Usage;

/// Outcome label values for `insight_requests_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    UpstreamError,
    QueueFull,
    NotRunning,
    Cancelled,
}

impl RequestOutcome {
    /// Label value for this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Success => "success",
            RequestOutcome::UpstreamError => "upstream_error",
            RequestOutcome::QueueFull => "queue_full",
            RequestOutcome::NotRunning => "not_running",
            RequestOutcome::Cancelled => "cancelled",
        }
    }
}

/// Metrics recorded by the queue manager and its workers.
#[derive(Clone)]
pub struct QueueMetrics {
    registry: Registry,
    queue_depth: Gauge,
    requests_total: IntCounterVec,
    queue_wait: Histogram,
    llm_latency: HistogramVec,
    llm_tokens_total: IntCounterVec,
    active_workers: Gauge,
}

impl QueueMetrics {
    /// Creates and registers every metric in a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if a metric definition is invalid.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queue_depth = Gauge::new("insight_queue_depth", "Number of requests waiting in queue")?;

        let requests_total = IntCounterVec::new(
            Opts::new("insight_requests_total", "Submitted requests by final outcome"),
            &["outcome"],
        )?;

        let queue_wait = Histogram::with_opts(
            HistogramOpts::new(
                "insight_queue_wait_seconds",
                "Time requests spent queued before a worker picked them up",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        )?;

        let llm_latency = HistogramVec::new(
            HistogramOpts::new(
                "insight_llm_latency_seconds",
                "Upstream generation latency in seconds",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
            &["credential"],
        )?;

        let llm_tokens_total = IntCounterVec::new(
            Opts::new("insight_llm_tokens_total", "Total tokens used"),
            &["credential", "type"],
        )?;

        let active_workers = Gauge::new(
            "insight_active_workers",
            "Number of workers currently processing a request",
        )?;

        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(queue_wait.clone()))?;
        registry.register(Box::new(llm_latency.clone()))?;
        registry.register(Box::new(llm_tokens_total.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;

        Ok(Self {
            registry,
            queue_depth,
            requests_total,
            queue_wait,
            llm_latency,
            llm_tokens_total,
            active_workers,
        })
    }

    /// Sets the current queue depth.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    /// Counts one request with its final outcome.
    pub fn record_outcome(&self, outcome: RequestOutcome) {
        self.requests_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Returns how many requests ended with `outcome`.
    pub fn outcome_count(&self, outcome: RequestOutcome) -> u64 {
        self.requests_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    /// Records the time a request spent queued.
    pub fn observe_queue_wait(&self, seconds: f64) {
        self.queue_wait.observe(seconds);
    }

    /// Records one upstream call and its token usage.
    pub fn record_llm_call(&self, credential: &str, latency_secs: f64, usage: Usage) {
        self.llm_latency
            .with_label_values(&[credential])
            .observe(latency_secs);
        self.llm_tokens_total
            .with_label_values(&[credential, "input"])
            .inc_by(u64::from(usage.prompt_tokens));
        self.llm_tokens_total
            .with_label_values(&[credential, "output"])
            .inc_by(u64::from(usage.completion_tokens));
    }

    /// Marks a worker as busy.
    pub fn worker_busy(&self) {
        self.active_workers.inc();
    }

    /// Marks a worker as idle.
    pub fn worker_idle(&self) {
        self.active_workers.dec();
    }

    /// Underlying registry, for mounting on an existing exporter.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Export all metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}\n", e);
        }

        String::from_utf8(buffer)
            .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
    }
}

impl std::fmt::Debug for QueueMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueMetrics").finish_non_exhaustive()
    }
}

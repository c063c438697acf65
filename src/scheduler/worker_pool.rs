//! Credential-bound workers that drain the request queue.
//!
//! Each worker runs as an independent tokio task, owns exactly one verified
//! client, and performs at most one upstream call at a time. Throughput per
//! credential is therefore capped structurally by the number of workers
//! assigned to it.
//!
//! # Features
//!
//! - Round-robin credential assignment (`worker i -> credential i % K`)
//! - Drains already-queued requests after the running flag is cleared
//! - Per-request failures never stop a worker
//! - Pool statistics tracking

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::credentials::{Credential, VerifiedClient};
use crate::llm::{GenerationConfig, GenerationRequest, LlmProvider, Usage};
use crate::metrics::{QueueMetrics, RequestOutcome};

use super::queue::BoundedQueue;
use super::request::{QueuedRequest, RequestError};

/// Index of the credential worker `worker_index` uses, or `None` when there
/// are no credentials.
pub fn assign_credential(worker_index: usize, credential_count: usize) -> Option<usize> {
    worker_index.checked_rem(credential_count)
}

/// Which credential a worker was bound to at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAssignment {
    /// Worker name (`worker-{index}`).
    pub worker_name: String,
    /// Zero-based worker index.
    pub worker_index: usize,
    /// Index into the verified credential list.
    pub credential_index: usize,
    /// Identifier of the assigned credential.
    pub credential_id: String,
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub worker_count: usize,
    /// Number of workers currently inside an upstream call.
    pub active_workers: usize,
    /// Requests completed successfully.
    pub requests_completed: u64,
    /// Requests whose upstream call failed.
    pub requests_failed: u64,
    /// Average upstream call duration.
    pub average_call_duration: Duration,
    /// Average time requests waited in the queue.
    pub average_queue_wait: Duration,
    /// Prompt tokens reported by the upstream API.
    pub prompt_tokens: u64,
    /// Completion tokens reported by the upstream API.
    pub completion_tokens: u64,
}

impl PoolStats {
    /// Returns the total number of requests processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.requests_completed + self.requests_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.requests_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
#[derive(Debug, Default)]
pub(crate) struct SharedPoolStats {
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    total_call_ms: AtomicU64,
    total_wait_ms: AtomicU64,
    waits_recorded: AtomicU64,
    active_workers: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl SharedPoolStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn record_wait(&self, wait: Duration) {
        self.waits_recorded.fetch_add(1, Ordering::SeqCst);
        self.total_wait_ms
            .fetch_add(wait.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_success(&self, duration: Duration, usage: Usage) {
        self.requests_completed.fetch_add(1, Ordering::SeqCst);
        self.total_call_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        self.prompt_tokens
            .fetch_add(u64::from(usage.prompt_tokens), Ordering::SeqCst);
        self.completion_tokens
            .fetch_add(u64::from(usage.completion_tokens), Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
        self.total_call_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn to_pool_stats(&self, worker_count: usize) -> PoolStats {
        let completed = self.requests_completed.load(Ordering::SeqCst);
        let failed = self.requests_failed.load(Ordering::SeqCst);
        let total_call_ms = self.total_call_ms.load(Ordering::SeqCst);
        let waits = self.waits_recorded.load(Ordering::SeqCst);
        let total_wait_ms = self.total_wait_ms.load(Ordering::SeqCst);

        let total_calls = completed + failed;
        let average_call_duration = if total_calls > 0 {
            Duration::from_millis(total_call_ms / total_calls)
        } else {
            Duration::ZERO
        };
        let average_queue_wait = if waits > 0 {
            Duration::from_millis(total_wait_ms / waits)
        } else {
            Duration::ZERO
        };

        PoolStats {
            worker_count,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            requests_completed: completed,
            requests_failed: failed,
            average_call_duration,
            average_queue_wait,
            prompt_tokens: self.prompt_tokens.load(Ordering::SeqCst),
            completion_tokens: self.completion_tokens.load(Ordering::SeqCst),
        }
    }
}

/// Marks a worker busy for as long as it lives, including when the task is
/// aborted mid-call.
struct BusyGuard<'a> {
    stats: &'a SharedPoolStats,
    metrics: &'a QueueMetrics,
}

impl<'a> BusyGuard<'a> {
    fn new(stats: &'a SharedPoolStats, metrics: &'a QueueMetrics) -> Self {
        stats.increment_active();
        metrics.worker_busy();
        Self { stats, metrics }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.stats.decrement_active();
        self.metrics.worker_idle();
    }
}

/// State every worker shares with the manager.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) queue: Arc<BoundedQueue<QueuedRequest>>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) generation: Arc<GenerationConfig>,
    pub(crate) poll_interval: Duration,
    pub(crate) stats: Arc<SharedPoolStats>,
    pub(crate) metrics: QueueMetrics,
}

/// A single worker bound to one credential.
pub struct Worker {
    /// Unique name for this worker.
    name: String,
    /// Index of the assigned credential in the verified list.
    credential_index: usize,
    /// The assigned credential.
    credential: Credential,
    /// Client used for every call this worker makes.
    client: Arc<dyn LlmProvider>,
    /// Shared queue, flag, settings and statistics.
    context: WorkerContext,
}

impl Worker {
    pub(crate) fn new(
        index: usize,
        credential_index: usize,
        verified: &VerifiedClient,
        context: WorkerContext,
    ) -> Self {
        Self {
            name: format!("worker-{}", index),
            credential_index,
            credential: verified.credential.clone(),
            client: Arc::clone(&verified.client),
            context,
        }
    }

    /// Main worker loop.
    ///
    /// Keeps pulling requests while the manager is running or the queue
    /// still holds work.
    pub async fn run(self) {
        info!(
            worker_id = %self.name,
            credential_id = %self.credential.id,
            credential_index = self.credential_index,
            "Worker started"
        );

        while self.context.running.load(Ordering::SeqCst) || !self.context.queue.is_empty() {
            match self.context.queue.poll(self.context.poll_interval).await {
                Some(request) => self.process_request(request).await,
                None => {
                    debug!(worker_id = %self.name, "No requests available");
                }
            }
        }

        info!(worker_id = %self.name, "Worker stopped");
    }

    /// Processes a single request and completes its handle.
    async fn process_request(&self, request: QueuedRequest) {
        let wait = request.wait_time();
        self.context.stats.record_wait(wait);
        self.context.metrics.observe_queue_wait(wait.as_secs_f64());
        self.context
            .metrics
            .set_queue_depth(self.context.queue.len());

        let QueuedRequest {
            prompt,
            trace_id,
            slot,
            ..
        } = request;

        let model = self.credential.model_or(&self.context.generation.model);
        let call = GenerationRequest::from_config(model, prompt, &self.context.generation);

        debug!(
            worker_id = %self.name,
            trace_id = %trace_id,
            credential_id = %self.credential.id,
            model = %model,
            wait_ms = wait.as_millis() as u64,
            "Processing request"
        );

        let start_time = Instant::now();
        let outcome = {
            let _busy = BusyGuard::new(&self.context.stats, &self.context.metrics);
            AssertUnwindSafe(self.client.generate(call))
                .catch_unwind()
                .await
        };
        let duration = start_time.elapsed();

        match outcome {
            Ok(Ok(response)) => {
                let usage = response.usage;
                self.context.stats.record_success(duration, usage);
                self.context.metrics.record_llm_call(
                    &self.credential.id,
                    duration.as_secs_f64(),
                    usage,
                );
                self.context.metrics.record_outcome(RequestOutcome::Success);

                info!(
                    worker_id = %self.name,
                    trace_id = %trace_id,
                    duration_ms = duration.as_millis() as u64,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    total_tokens = usage.total_tokens,
                    "Request completed"
                );

                if !slot.complete(Ok(response)) {
                    debug!(
                        worker_id = %self.name,
                        trace_id = %trace_id,
                        "Caller stopped waiting, discarding response"
                    );
                }
            }
            Ok(Err(e)) => {
                self.context.stats.record_failure(duration);
                self.context
                    .metrics
                    .record_outcome(RequestOutcome::UpstreamError);

                warn!(
                    worker_id = %self.name,
                    trace_id = %trace_id,
                    credential_id = %self.credential.id,
                    duration_ms = duration.as_millis() as u64,
                    error = %e,
                    "Upstream call failed"
                );

                slot.fail(RequestError::Llm(e));
            }
            Err(_) => {
                self.context.stats.record_failure(duration);
                self.context
                    .metrics
                    .record_outcome(RequestOutcome::UpstreamError);

                error!(
                    worker_id = %self.name,
                    trace_id = %trace_id,
                    "Upstream client panicked while processing request"
                );

                slot.fail(RequestError::Abandoned);
            }
        }
    }

    /// Returns the worker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the index of the credential this worker uses.
    pub fn credential_index(&self) -> usize {
        self.credential_index
    }
}

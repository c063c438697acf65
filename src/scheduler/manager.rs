//! Queue manager facade.
//!
//! Owns the bounded queue, the running flag and the worker tasks, and exposes
//! the submission API callers use. The lifecycle is
//! `Uninitialized -> Running -> ShuttingDown -> Stopped`; a manager is never
//! restarted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, ConfigError};
use crate::credentials::{CredentialError, CredentialVerifier, VerifiedClient};
use crate::llm::{ClientFactory, GenerationConfig, GenerationResponse};
use crate::metrics::{QueueMetrics, RequestOutcome};

use super::config::QueueConfig;
use super::queue::{BoundedQueue, OfferError};
use super::request::{QueuedRequest, RequestError, ResponseHandle};
use super::worker_pool::{
    assign_credential, PoolStats, SharedPoolStats, Worker, WorkerAssignment, WorkerContext,
};

/// Errors raised by the manager lifecycle.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// `start` was called on a running manager.
    #[error("Queue manager is already running")]
    AlreadyRunning,

    /// `start` was called after shutdown.
    #[error("Queue manager has been shut down")]
    AlreadyStopped,

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The manager was given no verified clients.
    #[error("No verified clients available")]
    NoVerifiedClients,

    /// Credential verification failed.
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// Metric registration failed.
    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Errors from a blocking submission.
#[derive(Debug, Error)]
pub enum WaitError {
    /// No response arrived within the request timeout. The request itself
    /// may still complete.
    #[error("Timed out after {0:?} waiting for a response")]
    Timeout(Duration),

    /// The request failed.
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Lifecycle state of a [`QueueManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Built but not started; submissions are rejected.
    Uninitialized,
    /// Workers are serving the queue.
    Running,
    /// Shutdown has begun and workers are draining.
    ShuttingDown,
    /// Every worker has exited and every handle is resolved.
    Stopped,
}

/// What happened during shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers had to be aborted after the shutdown timeout.
    pub forced: bool,
    /// Queued requests failed with `RequestError::ShuttingDown`.
    pub drained: usize,
}

/// Bounded request queue served by credential-bound workers.
pub struct QueueManager {
    config: QueueConfig,
    generation: Arc<GenerationConfig>,
    clients: Vec<VerifiedClient>,
    queue: Arc<BoundedQueue<QueuedRequest>>,
    running: Arc<AtomicBool>,
    state: Mutex<ManagerState>,
    stopped: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<SharedPoolStats>,
    metrics: QueueMetrics,
}

impl QueueManager {
    /// Creates a stopped manager over already-verified clients.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError::InvalidConfig` if `config` fails validation and
    /// `ManagerError::NoVerifiedClients` if `clients` is empty.
    pub fn new(
        config: QueueConfig,
        generation: GenerationConfig,
        clients: Vec<VerifiedClient>,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        if clients.is_empty() {
            return Err(ManagerError::NoVerifiedClients);
        }

        Ok(Self {
            queue: Arc::new(BoundedQueue::new(config.queue_capacity)),
            config,
            generation: Arc::new(generation),
            clients,
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(ManagerState::Uninitialized),
            stopped: watch::Sender::new(false),
            workers: Mutex::new(Vec::new()),
            stats: Arc::new(SharedPoolStats::new()),
            metrics: QueueMetrics::new()?,
        })
    }

    /// Verifies the configured credentials, then builds and starts a manager.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError::Credentials` if no credential passes
    /// verification.
    pub async fn bootstrap(
        app: &AppConfig,
        factory: Arc<dyn ClientFactory>,
    ) -> Result<Self, ManagerError> {
        app.validate()?;

        let verifier = CredentialVerifier::new(factory);
        let clients = verifier.verify_all(&app.credentials).await?;

        let manager = Self::new(app.queue_config(), app.generation.clone(), clients)?;
        manager.start().await?;
        Ok(manager)
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().expect("state lock not poisoned")
    }

    /// Spawns the worker tasks and starts accepting submissions.
    ///
    /// Worker `i` is bound to verified client `i % K`.
    ///
    /// # Errors
    ///
    /// Returns `ManagerError::AlreadyRunning` if called twice and
    /// `ManagerError::AlreadyStopped` after shutdown.
    pub async fn start(&self) -> Result<(), ManagerError> {
        let mut state = self.lock_state();
        match *state {
            ManagerState::Uninitialized => {}
            ManagerState::Running => return Err(ManagerError::AlreadyRunning),
            ManagerState::ShuttingDown | ManagerState::Stopped => {
                return Err(ManagerError::AlreadyStopped)
            }
        }

        self.running.store(true, Ordering::SeqCst);

        let context = WorkerContext {
            queue: Arc::clone(&self.queue),
            running: Arc::clone(&self.running),
            generation: Arc::clone(&self.generation),
            poll_interval: self.config.poll_interval,
            stats: Arc::clone(&self.stats),
            metrics: self.metrics.clone(),
        };

        let mut workers = self.workers.lock().expect("workers lock not poisoned");
        for assignment in self.assignments() {
            let worker = Worker::new(
                assignment.worker_index,
                assignment.credential_index,
                &self.clients[assignment.credential_index],
                context.clone(),
            );

            workers.push(tokio::spawn(async move {
                worker.run().await;
            }));
        }

        *state = ManagerState::Running;

        info!(
            workers = self.config.worker_count,
            credentials = self.clients.len(),
            queue_capacity = self.config.queue_capacity,
            "Queue manager started"
        );

        Ok(())
    }

    /// Enqueues `prompt` without blocking.
    ///
    /// Never fails directly: rejections come back as an already-completed
    /// handle (`NotRunning` or `QueueFull`).
    pub fn submit(&self, prompt: impl Into<String>) -> ResponseHandle {
        if !self.running.load(Ordering::SeqCst) {
            self.metrics.record_outcome(RequestOutcome::NotRunning);
            debug!("Rejecting submission, queue manager not running");
            return ResponseHandle::failed(Uuid::new_v4(), RequestError::NotRunning);
        }

        let (request, handle) = QueuedRequest::new(prompt);
        let trace_id = request.trace_id;

        match self.queue.offer(request) {
            Ok(depth) => {
                self.metrics.set_queue_depth(depth);
                debug!(trace_id = %trace_id, queue_depth = depth, "Request queued");
            }
            Err(OfferError::Full(request)) => {
                self.metrics.record_outcome(RequestOutcome::QueueFull);
                warn!(
                    trace_id = %trace_id,
                    capacity = self.config.queue_capacity,
                    "Request queue full, rejecting submission"
                );
                request.slot.fail(RequestError::QueueFull {
                    capacity: self.config.queue_capacity,
                });
            }
            Err(OfferError::Closed(request)) => {
                self.metrics.record_outcome(RequestOutcome::NotRunning);
                debug!(trace_id = %trace_id, "Rejecting submission, queue closed");
                request.slot.fail(RequestError::NotRunning);
            }
        }

        handle
    }

    /// Submits `prompt` and waits up to the request timeout for the response.
    ///
    /// # Errors
    ///
    /// Returns `WaitError::Timeout` if no response arrives in time and
    /// `WaitError::Request` for every other failure.
    pub async fn submit_and_wait(
        &self,
        prompt: impl Into<String>,
    ) -> Result<GenerationResponse, WaitError> {
        let handle = self.submit(prompt);
        let trace_id = handle.trace_id();

        match tokio::time::timeout(self.config.request_timeout, handle).await {
            Ok(result) => result.map_err(WaitError::Request),
            Err(_) => {
                warn!(
                    trace_id = %trace_id,
                    timeout_ms = self.config.request_timeout.as_millis() as u64,
                    "Timed out waiting for response"
                );
                Err(WaitError::Timeout(self.config.request_timeout))
            }
        }
    }

    /// Stops accepting work, lets workers drain the queue, and fails
    /// whatever is left.
    ///
    /// Workers still running after the shutdown timeout are aborted; their
    /// in-flight requests resolve to `RequestError::Abandoned`. Requests still
    /// queued resolve to `RequestError::ShuttingDown`. A call made while
    /// another shutdown is in progress waits for it to finish and returns an
    /// empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let in_progress = {
            let mut state = self.lock_state();
            match *state {
                ManagerState::Running => {
                    *state = ManagerState::ShuttingDown;
                    None
                }
                ManagerState::Uninitialized => {
                    *state = ManagerState::Stopped;
                    self.queue.close();
                    self.stopped.send_replace(true);
                    return ShutdownReport::default();
                }
                ManagerState::ShuttingDown => Some(self.stopped.subscribe()),
                ManagerState::Stopped => return ShutdownReport::default(),
            }
        };

        if let Some(mut stopped) = in_progress {
            debug!("Shutdown already in progress, waiting for it to finish");
            // The sender lives in `self`, so this only returns once stopped.
            let _ = stopped.wait_for(|done| *done).await;
            return ShutdownReport::default();
        }

        info!(
            queue_depth = self.queue.len(),
            "Initiating queue manager shutdown"
        );
        let started = Instant::now();

        self.running.store(false, Ordering::SeqCst);
        self.queue.close();

        let mut handles = {
            let mut workers = self.workers.lock().expect("workers lock not poisoned");
            std::mem::take(&mut *workers)
        };

        let graceful = tokio::time::timeout(
            self.config.shutdown_timeout,
            join_all(handles.iter_mut()),
        )
        .await;

        let forced = match graceful {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Worker task panicked during shutdown");
                    }
                }
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "Workers did not stop in time, aborting"
                );
                for handle in &handles {
                    handle.abort();
                }
                // Await the aborted tasks so their in-flight slots are dropped
                // before we return.
                let pending = handles.into_iter().filter(|handle| !handle.is_finished());
                for handle in pending {
                    let _ = handle.await;
                }
                true
            }
        };

        let stragglers = self.queue.drain();
        let drained = stragglers.len();
        for request in stragglers {
            self.metrics.record_outcome(RequestOutcome::Cancelled);
            request.slot.fail(RequestError::ShuttingDown);
        }
        self.metrics.set_queue_depth(0);

        *self.lock_state() = ManagerState::Stopped;
        self.stopped.send_replace(true);

        info!(
            forced = forced,
            drained = drained,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Queue manager shutdown complete"
        );

        ShutdownReport { forced, drained }
    }

    /// Which credential each worker uses.
    pub fn assignments(&self) -> Vec<WorkerAssignment> {
        (0..self.config.worker_count)
            .filter_map(|worker_index| {
                let credential_index = assign_credential(worker_index, self.clients.len())?;
                Some(WorkerAssignment {
                    worker_name: format!("worker-{}", worker_index),
                    worker_index,
                    credential_index,
                    credential_id: self.clients[credential_index].credential.id.clone(),
                })
            })
            .collect()
    }

    /// Returns the number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Returns whether submissions are currently accepted.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ManagerState {
        *self.lock_state()
    }

    /// Number of requests waiting for a worker.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of requests the queue holds.
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Number of verified credentials in use.
    pub fn credential_count(&self) -> usize {
        self.clients.len()
    }

    /// Settings the manager was built with.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.worker_count)
    }

    /// Prometheus metrics owned by this manager.
    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        // Let detached workers drain and exit.
        self.running.store(false, Ordering::SeqCst);
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::error::LlmError;
    use crate::llm::{GenerationRequest, LlmProvider, Usage};
    use async_trait::async_trait;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            Ok(GenerationResponse {
                model: request.model,
                text: request.prompt.to_uppercase(),
                finish_reason: None,
                usage: Usage::default(),
            })
        }

        async fn verify(&self) -> Result<(), LlmError> {
            Ok(())
        }
    }

    fn clients(count: usize) -> Vec<VerifiedClient> {
        (0..count)
            .map(|i| {
                VerifiedClient::new(
                    Credential::new(format!("key-{}", i), format!("Key {}", i), "secret-value-123"),
                    Arc::new(EchoProvider),
                )
            })
            .collect()
    }

    fn test_config(workers: usize) -> QueueConfig {
        QueueConfig::new(workers)
            .with_queue_capacity(8)
            .with_request_timeout(Duration::from_secs(2))
            .with_shutdown_timeout(Duration::from_secs(2))
            .with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_new_requires_clients() {
        let result = QueueManager::new(test_config(2), GenerationConfig::default(), Vec::new());
        assert!(matches!(result, Err(ManagerError::NoVerifiedClients)));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = QueueManager::new(test_config(0), GenerationConfig::default(), clients(1));
        assert!(matches!(result, Err(ManagerError::InvalidConfig(_))));
    }

    #[test]
    fn test_assignments_round_robin() {
        let manager = QueueManager::new(test_config(5), GenerationConfig::default(), clients(2))
            .expect("manager");

        let ids: Vec<String> = manager
            .assignments()
            .into_iter()
            .map(|a| a.credential_id)
            .collect();
        assert_eq!(ids, vec!["key-0", "key-1", "key-0", "key-1", "key-0"]);
        assert_eq!(manager.credential_count(), 2);
        assert_eq!(manager.worker_count(), 5);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let manager = QueueManager::new(test_config(2), GenerationConfig::default(), clients(1))
            .expect("manager");
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        assert!(!manager.is_running());

        manager.start().await.expect("start");
        assert_eq!(manager.state(), ManagerState::Running);
        assert!(matches!(
            manager.start().await,
            Err(ManagerError::AlreadyRunning)
        ));

        let response = manager.submit_and_wait("hello").await.expect("response");
        assert_eq!(response.text, "HELLO");

        let report = manager.shutdown().await;
        assert!(!report.forced);
        assert_eq!(manager.state(), ManagerState::Stopped);
        assert!(!manager.is_running());

        assert_eq!(manager.shutdown().await, ShutdownReport::default());
        assert!(matches!(
            manager.start().await,
            Err(ManagerError::AlreadyStopped)
        ));
    }

    #[tokio::test]
    async fn test_submit_before_start_fails_fast() {
        let manager = QueueManager::new(test_config(1), GenerationConfig::default(), clients(1))
            .expect("manager");

        let result = manager.submit("too early").await;
        assert!(matches!(result, Err(RequestError::NotRunning)));
        assert_eq!(manager.metrics().outcome_count(RequestOutcome::NotRunning), 1);
        assert_eq!(manager.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let manager = QueueManager::new(test_config(1), GenerationConfig::default(), clients(1))
            .expect("manager");

        assert_eq!(manager.shutdown().await, ShutdownReport::default());
        assert_eq!(manager.state(), ManagerState::Stopped);
    }
}

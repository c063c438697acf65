//! Bounded request queue and credential-bound worker pool.
//!
//! This module provides the concurrency core of the service:
//!
//! - **BoundedQueue**: in-process FIFO with non-blocking, capacity-checked admission
//! - **Worker**: a tokio task bound to one verified credential
//! - **QueueManager**: facade owning the queue, the workers and the lifecycle
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  Submitters  │
//!                      │ (callers)    │
//!                      └──────┬───────┘
//!                             │ submit()
//!                      ┌──────▼───────┐
//!                      │ BoundedQueue │──► QUEUE_FULL when at capacity
//!                      │   (FIFO)     │
//!                      └──────┬───────┘
//!                             │ poll()
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 0│         │ Worker 1│         │ Worker N│
//!    │  key 0  │         │  key 1  │         │ key N%K │
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use insight_queue::config::AppConfig;
//! use insight_queue::scheduler::QueueManager;
//!
//! let app = AppConfig::from_file("insight.yaml")?;
//! let manager = QueueManager::bootstrap(&app, app.client_factory()).await?;
//!
//! let response = manager.submit_and_wait("Summarize Q3 revenue").await?;
//! println!("{}", response.text);
//!
//! // Drain queued work, then stop
//! manager.shutdown().await;
//! ```
//!
//! # Guarantees
//!
//! - **Backpressure**: the queue never holds more than its capacity
//! - **Per-key rate limiting**: each worker has at most one upstream call in flight
//! - **No silent drops**: every submitted request resolves, including at shutdown

pub mod config;
pub mod manager;
pub mod queue;
pub mod request;
pub mod worker_pool;

// Re-export main types for convenience
pub use config::QueueConfig;
pub use manager::{ManagerError, ManagerState, QueueManager, ShutdownReport, WaitError};
pub use queue::{BoundedQueue, OfferError};
pub use request::{QueuedRequest, RequestError, RequestResult, ResponseHandle, ResponseSlot};
pub use worker_pool::{assign_credential, PoolStats, Worker, WorkerAssignment};

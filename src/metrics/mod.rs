//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks queue depth, request outcomes, queue wait time, upstream latency,
//! token usage and worker activity for one queue manager.
//!
//! # Example
//!
//! ```ignore
//! use insight_queue::metrics::{QueueMetrics, RequestOutcome};
//!
//! let metrics = QueueMetrics::new()?;
//! metrics.record_outcome(RequestOutcome::Success);
//!
//! // Export metrics for Prometheus scraping
//! let metrics_text = metrics.export();
//! ```

pub mod prometheus;

pub use self::prometheus::{QueueMetrics, RequestOutcome};

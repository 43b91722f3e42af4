//! Core utilities and types shared across all qgate crates

pub mod context;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod types;

// Re-export commonly used types
pub use context::{ExecutionContext, Interrupted};
pub use error::{AppError, ErrorBody, ErrorCode};
pub use metrics::{MetricStatus, MetricsAggregator, MetricsSummary, QueryMetric};
pub use queue::{
    Acknowledger, Delivery, DeliveryHandler, Disposition, JobQueue, JobReceiver, QueueError,
};
pub use types::UtcDateTime;

// Re-export external dependencies
pub use async_trait;
pub use chrono;
pub use serde_json;
pub use tokio_util::sync::CancellationToken;

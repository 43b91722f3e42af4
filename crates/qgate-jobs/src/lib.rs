//! # qgate-jobs
//!
//! Deferred execution of table queries.
//!
//! A request is fingerprinted with [`payload_hash`], recorded as a `queued`
//! [`QueryJob`] through the [`JobLifecycleManager`], and published as a
//! [`QueryJobMessage`]. A worker feeds deliveries to the [`JobProcessor`], which
//! re-runs the query through the same compile path and owns the retry policy.

pub mod error;
pub mod hash;
pub mod manager;
pub mod postgres;
pub mod processor;
pub mod repository;
pub mod types;

pub use error::{JobError, Result};
pub use hash::payload_hash;
pub use manager::JobLifecycleManager;
pub use postgres::PostgresJobRepository;
pub use processor::{JobProcessor, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use repository::{InMemoryJobRepository, JobRepository};
pub use types::{JobStatus, JobUpdate, Patch, QueryJob, QueryJobMessage};

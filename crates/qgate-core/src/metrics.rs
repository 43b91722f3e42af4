//! Bounded in-memory query metrics
//!
//! The aggregator is constructed once at startup and shared as an
//! `Arc<MetricsAggregator>` with every component that records or reads metrics.

use std::collections::{BTreeMap, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::UtcDateTime;

pub const DEFAULT_METRICS_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Success,
    Error,
}

/// Outcome of one executed query
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetric {
    pub data_source: String,
    pub table: String,
    pub status: MetricStatus,
    pub latency_ms: i64,
    pub rows: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: UtcDateTime,
}

impl QueryMetric {
    pub fn success(
        data_source: impl Into<String>,
        table: impl Into<String>,
        latency_ms: i64,
        rows: i64,
    ) -> Self {
        Self::new(data_source, table, MetricStatus::Success, latency_ms, rows)
    }

    pub fn error(data_source: impl Into<String>, table: impl Into<String>, latency_ms: i64) -> Self {
        Self::new(data_source, table, MetricStatus::Error, latency_ms, 0)
    }

    fn new(
        data_source: impl Into<String>,
        table: impl Into<String>,
        status: MetricStatus,
        latency_ms: i64,
        rows: i64,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            table: table.into(),
            status,
            latency_ms,
            rows,
            job_id: None,
            payload_hash: None,
            api_key: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_job(mut self, job_id: impl Into<String>, payload_hash: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self.payload_hash = Some(payload_hash.into());
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.is_empty());
        self
    }
}

/// Per-data-source aggregate over the retained window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub data_source: String,
    pub total_queries: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: i64,
    pub p95_latency_ms: i64,
    pub total_rows: i64,
}

pub struct MetricsAggregator {
    capacity: usize,
    entries: RwLock<VecDeque<QueryMetric>>,
}

impl MetricsAggregator {
    /// Create an aggregator retaining the `capacity` newest entries (`0` selects the default)
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_METRICS_CAPACITY
        } else {
            capacity
        };
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a metric, stamping it with the current time and evicting the oldest entries
    pub fn record(&self, mut metric: QueryMetric) {
        metric.timestamp = Utc::now();

        let mut entries = self.entries.write();
        entries.push_back(metric);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy of the retained entries, oldest first
    pub fn snapshot(&self) -> Vec<QueryMetric> {
        self.entries.read().iter().cloned().collect()
    }

    /// Aggregate the retained window by data source, ordered by name
    pub fn summarize(&self) -> Vec<MetricsSummary> {
        let entries = self.entries.read();

        let mut groups: BTreeMap<&str, (MetricsSummary, Vec<i64>)> = BTreeMap::new();
        for metric in entries.iter() {
            let (summary, latencies) = groups
                .entry(metric.data_source.as_str())
                .or_insert_with(|| {
                    (
                        MetricsSummary {
                            data_source: metric.data_source.clone(),
                            ..Default::default()
                        },
                        Vec::new(),
                    )
                });

            summary.total_queries += 1;
            match metric.status {
                MetricStatus::Success => summary.success_count += 1,
                MetricStatus::Error => summary.error_count += 1,
            }
            summary.total_rows += metric.rows;
            latencies.push(metric.latency_ms);
        }

        groups
            .into_values()
            .map(|(mut summary, mut latencies)| {
                if !latencies.is_empty() {
                    let sum: i64 = latencies.iter().sum();
                    summary.avg_latency_ms = sum / latencies.len() as i64;
                    latencies.sort_unstable();
                    summary.p95_latency_ms = latencies[p95_index(latencies.len())];
                }
                summary
            })
            .collect()
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS_CAPACITY)
    }
}

fn p95_index(len: usize) -> usize {
    ((len * 95) / 100).min(len.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p95_index() {
        assert_eq!(p95_index(1), 0);
        assert_eq!(p95_index(11), 10);
        assert_eq!(p95_index(20), 19);
        assert_eq!(p95_index(100), 95);
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        assert_eq!(MetricsAggregator::new(0).capacity(), DEFAULT_METRICS_CAPACITY);
    }

    #[test]
    fn test_metric_serializes_camel_case() {
        let metric = QueryMetric::success("main", "users", 12, 3).with_job("job-1", "abc");
        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["dataSource"], "main");
        assert_eq!(json["latencyMs"], 12);
        assert_eq!(json["status"], "success");
        assert_eq!(json["jobId"], "job-1");
        assert!(json.get("apiKey").is_none());
    }
}

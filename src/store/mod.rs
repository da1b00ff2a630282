//! Metric store
//!
//! An append-only table of scalar observations written by the training
//! process and read by the query engine and the streaming channel. The
//! backend is behind a trait so the pipeline can run against SQLite in
//! production and an in-memory store in tests.

mod memory;
mod sqlite;

pub use memory::MemoryMetricStore;
pub use sqlite::SqliteMetricStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One scalar observation from a training job.
///
/// Rows are immutable once committed: a published (job, type, name, step)
/// cell is never updated in place, only superseded by an identical re-append
/// or removed by an explicit purge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub job_id: String,
    pub metric_type: String,
    pub metric_name: String,
    /// The training process's own monotonic progress counter. Ordering axis
    /// for all metric data; distinct from wall-clock time.
    pub step: i64,
    pub value: f64,
    /// Wall-clock write time, epoch milliseconds
    pub timestamp_ms: i64,
}

impl MetricRecord {
    /// Deterministic row id: re-appending the same observation replaces
    /// rather than duplicates.
    #[must_use]
    pub fn row_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.job_id,
            self.step,
            self.metric_type,
            sanitize_name(&self.metric_name)
        )
    }

    /// Current wall-clock time in the store's timestamp representation
    #[must_use]
    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Replace characters that would make a metric name unsafe inside a row id
fn sanitize_name(name: &str) -> String {
    name.replace(['/', ' ', '-'], "_")
}

/// Inclusive step window for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRange {
    pub start: i64,
    pub end: Option<i64>,
}

impl StepRange {
    /// Everything at or after `start`
    #[must_use]
    pub const fn from(start: i64) -> Self {
        Self { start, end: None }
    }

    /// Everything in `[start, end]`
    #[must_use]
    pub const fn bounded(start: i64, end: i64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Everything strictly after `watermark` (the streaming cursor shape)
    #[must_use]
    pub const fn after(watermark: i64) -> Self {
        Self {
            start: watermark + 1,
            end: None,
        }
    }

    #[must_use]
    pub fn contains(&self, step: i64) -> bool {
        step >= self.start && self.end.is_none_or(|end| step <= end)
    }
}

impl Default for StepRange {
    fn default() -> Self {
        Self::from(0)
    }
}

/// Backend contract for the append-only metrics table.
///
/// Failure policy: store unavailability surfaces as a typed error, never a
/// panic; "no matching rows" is an empty result or a zero count, not an
/// error.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Insert one observation; replaces an existing row with the same id
    async fn append(&self, record: &MetricRecord) -> Result<()>;

    /// Insert a batch atomically (all or nothing)
    async fn append_batch(&self, records: &[MetricRecord]) -> Result<()>;

    /// Rows for (job, metric type) inside the step window, ordered by step
    /// ascending with insertion order preserved among equal steps, truncated
    /// to `limit` rows
    async fn query(
        &self,
        job_id: &str,
        metric_type: &str,
        range: StepRange,
        limit: u32,
    ) -> Result<Vec<MetricRecord>>;

    /// Distinct metric names ever observed for (job, metric type),
    /// independent of any step window
    async fn distinct_names(&self, job_id: &str, metric_type: &str) -> Result<Vec<String>>;

    /// Delete rows for `job_id`: all of them, or only those written strictly
    /// before `older_than`. Returns the number of rows removed (zero is not
    /// an error).
    async fn delete_where(
        &self,
        job_id: &str,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_deterministic() {
        let record = MetricRecord {
            job_id: "job_a".to_string(),
            metric_type: "loss".to_string(),
            metric_name: "loss".to_string(),
            step: 42,
            value: 0.5,
            timestamp_ms: 1_700_000_000_000,
        };
        assert_eq!(record.row_id(), "job_a_42_loss_loss");
        // Same identity, different value: same id
        let replayed = MetricRecord {
            value: 0.25,
            ..record.clone()
        };
        assert_eq!(record.row_id(), replayed.row_id());
    }

    #[test]
    fn test_row_id_sanitizes_name() {
        let record = MetricRecord {
            job_id: "j".to_string(),
            metric_type: "loss".to_string(),
            metric_name: "train/loss-total avg".to_string(),
            step: 1,
            value: 1.0,
            timestamp_ms: 0,
        };
        assert_eq!(record.row_id(), "j_1_loss_train_loss_total_avg");
    }

    #[test]
    fn test_step_range_contains() {
        let open = StepRange::from(10);
        assert!(!open.contains(9));
        assert!(open.contains(10));
        assert!(open.contains(i64::MAX));

        let bounded = StepRange::bounded(10, 20);
        assert!(bounded.contains(10));
        assert!(bounded.contains(20));
        assert!(!bounded.contains(21));
    }

    #[test]
    fn test_step_range_after_excludes_watermark() {
        let range = StepRange::after(5);
        assert!(!range.contains(5));
        assert!(range.contains(6));
    }
}

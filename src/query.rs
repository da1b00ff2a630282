//! Metrics query engine
//!
//! Reads the store and reshapes raw rows into per-step chart records. All
//! reshaping is a pure, synchronous pass over the bounded row set; the only
//! I/O is the store read itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainwatchError};
use crate::store::{MetricRecord, MetricStore, StepRange};

/// One rendered point per distinct step.
///
/// `values` carries every metric name observed at that step; it serializes
/// flattened beside `step`/`timestamp_ms`, so a point with loss and lr reads
/// as `{"step":1,"timestamp_ms":...,"loss":0.5,"lr":0.001}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub step: i64,
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl ChartPoint {
    #[must_use]
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Result of a metrics query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsQueryResult {
    /// Per-step records, step strictly ascending
    pub series: Vec<ChartPoint>,
    /// Raw rows behind the series, before per-step grouping
    pub total_rows: usize,
    /// Every metric name ever observed for (job, type), ignoring the window.
    /// Populates the selectable series list even before those series reach
    /// the requested window.
    pub available_names: Vec<String>,
}

/// Group ordered rows into one record per distinct step.
///
/// First row seen at a step fixes the point's timestamp; later rows at the
/// same step only contribute name→value fields. Rows must arrive
/// step-ordered (the store contract) for the output to be ascending.
#[must_use]
pub fn reshape_rows(rows: &[MetricRecord]) -> Vec<ChartPoint> {
    let mut by_step: BTreeMap<i64, ChartPoint> = BTreeMap::new();
    for row in rows {
        let point = by_step.entry(row.step).or_insert_with(|| ChartPoint {
            step: row.step,
            timestamp_ms: row.timestamp_ms,
            values: BTreeMap::new(),
        });
        point.values.insert(row.metric_name.clone(), row.value);
    }
    by_step.into_values().collect()
}

/// Query the store for (job, metric type) inside the step window and reshape
/// the result for charting.
///
/// A missing job id is rejected before the store is touched. `limit` caps
/// raw rows, not steps.
pub async fn get_metrics(
    store: &dyn MetricStore,
    job_id: &str,
    metric_type: &str,
    range: StepRange,
    limit: u32,
) -> Result<MetricsQueryResult> {
    if job_id.trim().is_empty() {
        return Err(TrainwatchError::validation("job_id", "must not be empty"));
    }

    let rows = store.query(job_id, metric_type, range, limit).await?;
    let available_names = store.distinct_names(job_id, metric_type).await?;

    Ok(MetricsQueryResult {
        total_rows: rows.len(),
        series: reshape_rows(&rows),
        available_names,
    })
}

//! In-memory metric store
//!
//! Keeps the full trait contract (id replacement, window filtering, stable
//! ordering, scoped deletes) without touching disk. Used by tests and by
//! examples that exercise the pipeline end to end.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MetricRecord, MetricStore, StepRange};
use crate::error::Result;

/// Metric store held entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryMetricStore {
    // Insertion order is the rowid stand-in: stable sort by step preserves it
    rows: Mutex<Vec<MetricRecord>>,
}

impl MemoryMetricStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across all jobs (test introspection)
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().expect("store lock").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MetricStore for MemoryMetricStore {
    async fn append(&self, record: &MetricRecord) -> Result<()> {
        let mut rows = self.rows.lock().expect("store lock");
        let id = record.row_id();
        if let Some(existing) = rows.iter_mut().find(|r| r.row_id() == id) {
            *existing = record.clone();
        } else {
            rows.push(record.clone());
        }
        Ok(())
    }

    async fn append_batch(&self, records: &[MetricRecord]) -> Result<()> {
        for record in records {
            self.append(record).await?;
        }
        Ok(())
    }

    async fn query(
        &self,
        job_id: &str,
        metric_type: &str,
        range: StepRange,
        limit: u32,
    ) -> Result<Vec<MetricRecord>> {
        let rows = self.rows.lock().expect("store lock");
        let mut matched: Vec<MetricRecord> = rows
            .iter()
            .filter(|r| {
                r.job_id == job_id && r.metric_type == metric_type && range.contains(r.step)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.step);
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn distinct_names(&self, job_id: &str, metric_type: &str) -> Result<Vec<String>> {
        let rows = self.rows.lock().expect("store lock");
        let mut names: Vec<String> = Vec::new();
        for row in rows.iter() {
            if row.job_id == job_id
                && row.metric_type == metric_type
                && !names.contains(&row.metric_name)
            {
                names.push(row.metric_name.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_where(
        &self,
        job_id: &str,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let mut rows = self.rows.lock().expect("store lock");
        let before = rows.len();
        match older_than {
            Some(cutoff) => {
                let cutoff_ms = cutoff.timestamp_millis();
                rows.retain(|r| r.job_id != job_id || r.timestamp_ms >= cutoff_ms);
            }
            None => rows.retain(|r| r.job_id != job_id),
        }
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(job: &str, step: i64, name: &str, value: f64, ts: i64) -> MetricRecord {
        MetricRecord {
            job_id: job.to_string(),
            metric_type: "loss".to_string(),
            metric_name: name.to_string(),
            step,
            value,
            timestamp_ms: ts,
        }
    }

    #[tokio::test]
    async fn test_append_replaces_by_id() -> Result<()> {
        let store = MemoryMetricStore::new();
        store.append(&record("a", 1, "loss", 0.5, 100)).await?;
        store.append(&record("a", 1, "loss", 0.25, 150)).await?;
        assert_eq!(store.len(), 1);

        let rows = store.query("a", "loss", StepRange::default(), 10).await?;
        assert_eq!(rows[0].value, 0.25);
        Ok(())
    }

    #[tokio::test]
    async fn test_stable_order_among_equal_steps() -> Result<()> {
        let store = MemoryMetricStore::new();
        store.append(&record("a", 1, "loss", 0.5, 100)).await?;
        store.append(&record("a", 1, "lr", 0.001, 100)).await?;
        store.append(&record("a", 0, "loss", 0.6, 90)).await?;

        let rows = store.query("a", "loss", StepRange::default(), 10).await?;
        assert_eq!(rows[0].step, 0);
        // Step 1 rows keep their insertion order
        assert_eq!(rows[1].metric_name, "loss");
        assert_eq!(rows[2].metric_name, "lr");
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_age_cutoff_is_strict() -> Result<()> {
        let store = MemoryMetricStore::new();
        store.append(&record("a", 1, "loss", 0.5, 1_000)).await?;
        store.append(&record("a", 2, "loss", 0.4, 2_000)).await?;

        let cutoff = DateTime::from_timestamp_millis(2_000).unwrap();
        assert_eq!(store.delete_where("a", Some(cutoff)).await?, 1);
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_other_jobs_untouched() -> Result<()> {
        let store = MemoryMetricStore::new();
        store.append(&record("a", 1, "loss", 0.5, 100)).await?;
        store.append(&record("b", 1, "loss", 0.9, 100)).await?;

        assert_eq!(store.delete_where("a", None).await?, 1);
        let rows = store.query("b", "loss", StepRange::default(), 10).await?;
        assert_eq!(rows.len(), 1);
        Ok(())
    }
}

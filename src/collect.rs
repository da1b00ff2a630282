//! Producer-side metric collection
//!
//! The training loop hands observations to a collector, which stamps a
//! shared wall-clock time per step, drops non-finite values, and batches
//! appends so the store sees one write per handful of steps instead of one
//! per scalar. A failed flush warns and keeps the buffer for the next
//! attempt; metric logging must never take the training loop down.

use std::sync::Arc;

use tracing::warn;

use crate::constants::collect::BUFFER_SIZE;
use crate::store::{MetricRecord, MetricStore};

/// Metric types the collector emits
const TYPE_LOSS: &str = "loss";
const TYPE_LEARNING_RATE: &str = "learning_rate";
const TYPE_SYSTEM: &str = "system";

/// Buffered writer for one training job's metrics
pub struct MetricCollector {
    job_id: String,
    store: Arc<dyn MetricStore>,
    buffer: Vec<MetricRecord>,
    buffer_size: usize,
}

impl MetricCollector {
    pub fn new(job_id: impl Into<String>, store: Arc<dyn MetricStore>) -> Self {
        Self::with_buffer_size(job_id, store, BUFFER_SIZE)
    }

    pub fn with_buffer_size(
        job_id: impl Into<String>,
        store: Arc<dyn MetricStore>,
        buffer_size: usize,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            store,
            buffer: Vec::with_capacity(buffer_size.max(1)),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Record one training step's observations.
    ///
    /// All rows from one call share a timestamp. Non-finite values are
    /// skipped rather than stored as zero. Flushes automatically once the
    /// buffer reaches its threshold.
    pub async fn log_step(
        &mut self,
        step: i64,
        losses: &[(&str, f64)],
        learning_rate: Option<f64>,
        extras: &[(&str, f64)],
    ) {
        let timestamp_ms = MetricRecord::now_ms();

        for &(name, value) in losses {
            self.push(step, TYPE_LOSS, name, value, timestamp_ms);
        }
        if let Some(lr) = learning_rate {
            self.push(step, TYPE_LEARNING_RATE, "lr", lr, timestamp_ms);
        }
        for &(name, value) in extras {
            self.push(step, TYPE_SYSTEM, name, value, timestamp_ms);
        }

        if self.buffer.len() >= self.buffer_size {
            self.flush().await;
        }
    }

    fn push(&mut self, step: i64, metric_type: &str, name: &str, value: f64, timestamp_ms: i64) {
        if !value.is_finite() {
            warn!(
                job = %self.job_id,
                step,
                metric = name,
                "Skipping non-finite metric value"
            );
            return;
        }
        self.buffer.push(MetricRecord {
            job_id: self.job_id.clone(),
            metric_type: metric_type.to_string(),
            metric_name: name.to_string(),
            step,
            value,
            timestamp_ms,
        });
    }

    /// Write all buffered rows as one batch.
    ///
    /// On failure the rows stay buffered; the next flush retries them.
    pub async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        match self.store.append_batch(&self.buffer).await {
            Ok(()) => self.buffer.clear(),
            Err(e) => {
                warn!(
                    job = %self.job_id,
                    pending = self.buffer.len(),
                    "Failed to flush metrics, will retry: {}",
                    e
                );
            }
        }
    }

    /// Rows waiting for the next flush
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

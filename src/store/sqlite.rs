//! SQLite-backed metric store
//!
//! The production backend. The schema is created on open so the store works
//! against a fresh database file; the training process and any number of UI
//! readers share the same file and only agree through it.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::{MetricRecord, MetricStore, StepRange};
use crate::error::Result;

/// Metric store backed by a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteMetricStore {
    pool: SqlitePool,
}

impl SqliteMetricStore {
    /// Open (creating if missing) the database at `path` and ensure the
    /// metrics table and its indexes exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!("Opened metric store at {}", path.as_ref().display());
        Ok(store)
    }

    /// In-memory database, serialized on a single connection.
    ///
    /// Each pooled connection would otherwise get its own private memory
    /// database, so the pool is pinned to one.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS training_metrics (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                step INTEGER NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                metric_type TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                value REAL NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_metrics_job_step
             ON training_metrics (job_id, step)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_metrics_job_type_name
             ON training_metrics (job_id, metric_type, metric_name)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn bind_insert<'q>(
        record: &'q MetricRecord,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        sqlx::query(
            "INSERT OR REPLACE INTO training_metrics
             (id, job_id, step, timestamp_ms, metric_type, metric_name, value)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.row_id())
        .bind(&record.job_id)
        .bind(record.step)
        .bind(record.timestamp_ms)
        .bind(&record.metric_type)
        .bind(&record.metric_name)
        .bind(record.value)
    }

    fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MetricRecord> {
        Ok(MetricRecord {
            job_id: row.try_get("job_id")?,
            metric_type: row.try_get("metric_type")?,
            metric_name: row.try_get("metric_name")?,
            step: row.try_get("step")?,
            value: row.try_get("value")?,
            timestamp_ms: row.try_get("timestamp_ms")?,
        })
    }
}

#[async_trait]
impl MetricStore for SqliteMetricStore {
    async fn append(&self, record: &MetricRecord) -> Result<()> {
        Self::bind_insert(record).execute(&self.pool).await?;
        Ok(())
    }

    async fn append_batch(&self, records: &[MetricRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for record in records {
            Self::bind_insert(record).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!("Flushed {} metric rows", records.len());
        Ok(())
    }

    async fn query(
        &self,
        job_id: &str,
        metric_type: &str,
        range: StepRange,
        limit: u32,
    ) -> Result<Vec<MetricRecord>> {
        // rowid as tiebreaker keeps insertion order stable among equal steps,
        // which the reshaper's first-seen-wins timestamp depends on
        let rows = match range.end {
            Some(end) => {
                sqlx::query(
                    "SELECT job_id, step, timestamp_ms, metric_type, metric_name, value
                     FROM training_metrics
                     WHERE job_id = ? AND metric_type = ? AND step >= ? AND step <= ?
                     ORDER BY step ASC, rowid ASC
                     LIMIT ?",
                )
                .bind(job_id)
                .bind(metric_type)
                .bind(range.start)
                .bind(end)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT job_id, step, timestamp_ms, metric_type, metric_name, value
                     FROM training_metrics
                     WHERE job_id = ? AND metric_type = ? AND step >= ?
                     ORDER BY step ASC, rowid ASC
                     LIMIT ?",
                )
                .bind(job_id)
                .bind(metric_type)
                .bind(range.start)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn distinct_names(&self, job_id: &str, metric_type: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT metric_name
             FROM training_metrics
             WHERE job_id = ? AND metric_type = ?
             ORDER BY metric_name ASC",
        )
        .bind(job_id)
        .bind(metric_type)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("metric_name").map_err(Into::into))
            .collect()
    }

    async fn delete_where(
        &self,
        job_id: &str,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let result = match older_than {
            Some(cutoff) => {
                sqlx::query(
                    "DELETE FROM training_metrics
                     WHERE job_id = ? AND timestamp_ms < ?",
                )
                .bind(job_id)
                .bind(cutoff.timestamp_millis())
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("DELETE FROM training_metrics WHERE job_id = ?")
                    .bind(job_id)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }
}

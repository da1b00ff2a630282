//! Metrics streaming channel
//!
//! A per-request long-lived task that re-polls the store and forwards only
//! new steps, plus liveness signals so a quiet channel is distinguishable
//! from a dead one. Eventually consistent with bounded staleness of one poll
//! interval; store errors are events, not channel death.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::constants::{query::DEFAULT_LIMIT, stream};
use crate::error::{Result, TrainwatchError};
use crate::query::{ChartPoint, reshape_rows};
use crate::store::{MetricStore, StepRange};

/// Parameters for opening a stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    pub job_id: String,
    /// Metric type to follow (default "loss")
    #[serde(default = "default_metric_type")]
    pub metric_type: String,
    /// Starting cursor: the highest step the client already holds. Never
    /// persisted server-side; reconnects resupply it.
    #[serde(default)]
    pub last_step: i64,
}

fn default_metric_type() -> String {
    crate::constants::query::DEFAULT_METRIC_TYPE.to_string()
}

/// Events emitted on an open channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// New per-step records past the client's watermark
    MetricsUpdate {
        data: Vec<ChartPoint>,
        timestamp_ms: i64,
    },
    /// A poll found nothing new; the channel is alive
    Heartbeat { timestamp_ms: i64 },
    /// A poll failed; the channel keeps polling
    Error { message: String },
}

/// Open a streaming channel.
///
/// Emits immediately on open, then once per poll interval. The background
/// task ends the instant the returned receiver is dropped; no timer outlives
/// the transport.
pub fn open_stream(
    store: Arc<dyn MetricStore>,
    request: StreamRequest,
) -> Result<mpsc::Receiver<StreamEvent>> {
    if request.job_id.trim().is_empty() {
        return Err(TrainwatchError::validation("job_id", "must not be empty"));
    }

    let (tx, rx) = mpsc::channel(stream::EVENT_CHANNEL_CAPACITY);
    tokio::spawn(run_poll_loop(store, request, tx));
    Ok(rx)
}

async fn run_poll_loop(
    store: Arc<dyn MetricStore>,
    request: StreamRequest,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut watermark = request.last_step;
    let mut interval = time::interval(stream::POLL_INTERVAL);
    // A slow consumer should not trigger a burst of catch-up polls
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately, giving the on-open push
        tokio::select! {
            _ = tx.closed() => break,
            _ = interval.tick() => {}
        }

        let event = poll_once(store.as_ref(), &request, &mut watermark).await;
        if tx.send(event).await.is_err() {
            break;
        }
    }

    debug!(
        job_id = %request.job_id,
        watermark,
        "Streaming channel closed, polling stopped"
    );
}

/// One poll tick: query past the watermark, classify the outcome
async fn poll_once(
    store: &dyn MetricStore,
    request: &StreamRequest,
    watermark: &mut i64,
) -> StreamEvent {
    let result = store
        .query(
            &request.job_id,
            &request.metric_type,
            StepRange::after(*watermark),
            DEFAULT_LIMIT,
        )
        .await;

    match result {
        Ok(rows) if rows.is_empty() => StreamEvent::Heartbeat {
            timestamp_ms: Utc::now().timestamp_millis(),
        },
        Ok(rows) => {
            // Rows are step-ordered; the last one is the new watermark
            if let Some(last) = rows.last() {
                *watermark = last.step;
            }
            StreamEvent::MetricsUpdate {
                data: reshape_rows(&rows),
                timestamp_ms: Utc::now().timestamp_millis(),
            }
        }
        Err(e) => {
            warn!(job_id = %request.job_id, "Stream poll failed: {}", e);
            StreamEvent::Error {
                message: e.to_string(),
            }
        }
    }
}

//! API surface
//!
//! Transport-agnostic request/response contracts for the five external
//! interfaces. This is the only layer allowed to turn a typed internal error
//! into a failure response; whatever routes requests (HTTP handlers, a CLI,
//! a test harness) works purely in these shapes.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::constants::query as query_defaults;
use crate::dynconfig::{ConfigFileState, ConfigPatch, DynConfigStore, DynamicConfig};
use crate::error::{Result, TrainwatchError};
use crate::query::{self, ChartPoint};
use crate::store::{MetricStore, StepRange};
use crate::stream::{self, StreamEvent, StreamRequest};

/// Parameters for a point-in-time metrics query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub job_id: String,
    #[serde(default = "default_metric_type")]
    pub metric_type: String,
    /// Row cap, not step cap
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub step_start: i64,
    #[serde(default)]
    pub step_end: Option<i64>,
}

fn default_metric_type() -> String {
    query_defaults::DEFAULT_METRIC_TYPE.to_string()
}

fn default_limit() -> u32 {
    query_defaults::DEFAULT_LIMIT
}

/// Reshaped series plus the context the viewer needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub job_id: String,
    pub metric_type: String,
    pub series: Vec<ChartPoint>,
    pub total_rows: usize,
    pub available_names: Vec<String>,
}

/// Parameters for a bulk metric purge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeRequest {
    pub job_id: String,
    /// Delete rows strictly older than this many days (default 30).
    /// Ignored when `all` is set.
    #[serde(default)]
    pub older_than_days: Option<u32>,
    /// Delete every row for the job
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub success: bool,
    pub deleted: u64,
    pub message: String,
}

/// Result of reading a job's dynamic config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigReadResponse {
    pub success: bool,
    pub config: DynamicConfig,
    /// Whether a usable file was present
    pub exists: bool,
    /// Present / missing / unreadable, so corruption is observable
    pub state: ConfigFileState,
    pub path: String,
}

/// A merge-write request for a job's dynamic config
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigWriteRequest {
    pub job_name: String,
    #[serde(flatten)]
    pub patch: ConfigPatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWriteResponse {
    pub success: bool,
    pub config: DynamicConfig,
    pub path: String,
    pub message: String,
}

/// Failure classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad request parameter; fix the request, do not retry as-is
    Validation,
    /// Store or filesystem trouble; safe to retry
    Unavailable,
    /// Anything else
    Internal,
}

/// The structured failure response every interface shares
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub kind: ErrorKind,
    /// Set for validation errors: which request field was rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub error: String,
    pub retryable: bool,
}

impl From<&TrainwatchError> for ErrorResponse {
    fn from(err: &TrainwatchError) -> Self {
        let (kind, field) = match err {
            TrainwatchError::Validation { field, .. } => {
                (ErrorKind::Validation, Some((*field).to_string()))
            }
            TrainwatchError::Store(_) | TrainwatchError::ConfigIo { .. } => {
                (ErrorKind::Unavailable, None)
            }
            _ => (ErrorKind::Internal, None),
        };
        Self {
            success: false,
            kind,
            field,
            error: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Run a metrics query
pub async fn handle_query(store: &dyn MetricStore, request: &QueryRequest) -> Result<QueryResponse> {
    let range = match request.step_end {
        Some(end) => StepRange::bounded(request.step_start, end),
        None => StepRange::from(request.step_start),
    };
    let result = query::get_metrics(
        store,
        &request.job_id,
        &request.metric_type,
        range,
        request.limit,
    )
    .await?;

    Ok(QueryResponse {
        success: true,
        job_id: request.job_id.clone(),
        metric_type: request.metric_type.clone(),
        series: result.series,
        total_rows: result.total_rows,
        available_names: result.available_names,
    })
}

/// Purge metric rows for a job, by age or entirely
pub async fn handle_purge(store: &dyn MetricStore, request: &PurgeRequest) -> Result<PurgeResponse> {
    if request.job_id.trim().is_empty() {
        return Err(TrainwatchError::validation("job_id", "must not be empty"));
    }

    let (cutoff, description) = if request.all {
        (None, "all rows".to_string())
    } else {
        let days = request
            .older_than_days
            .unwrap_or(query_defaults::DEFAULT_PURGE_DAYS);
        if days == 0 {
            return Err(TrainwatchError::validation(
                "older_than_days",
                "must be at least 1",
            ));
        }
        (
            Some(Utc::now() - Duration::days(i64::from(days))),
            format!("rows older than {days} days"),
        )
    };

    let deleted = store.delete_where(&request.job_id, cutoff).await?;
    Ok(PurgeResponse {
        success: true,
        deleted,
        message: format!(
            "Deleted {} {} for job '{}'",
            deleted, description, request.job_id
        ),
    })
}

/// Open a streaming channel; the receiver is the transport's event feed
pub fn handle_stream(
    store: Arc<dyn MetricStore>,
    request: StreamRequest,
) -> Result<mpsc::Receiver<StreamEvent>> {
    stream::open_stream(store, request)
}

/// Read a job's dynamic config
pub fn handle_config_read(config_store: &DynConfigStore, job_name: &str) -> Result<ConfigReadResponse> {
    let result = config_store.read(job_name)?;
    Ok(ConfigReadResponse {
        success: true,
        exists: result.state == ConfigFileState::Present,
        state: result.state,
        config: result.config,
        path: result.path.display().to_string(),
    })
}

/// Merge-write a job's dynamic config
pub async fn handle_config_write(
    config_store: &DynConfigStore,
    request: &ConfigWriteRequest,
) -> Result<ConfigWriteResponse> {
    let merged = config_store.write(&request.job_name, &request.patch).await?;
    Ok(ConfigWriteResponse {
        success: true,
        path: config_store.path_for(&request.job_name).display().to_string(),
        message: format!("Dynamic config updated for job '{}'", request.job_name),
        config: merged,
    })
}

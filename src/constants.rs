//! Constants used throughout trainwatch
//!
//! This module centralizes magic numbers and default values
//! to improve maintainability and reduce duplication.

use std::time::Duration;

/// Streaming channel configuration
pub mod stream {
    use super::Duration;

    /// Interval between store polls on an open streaming channel.
    ///
    /// Data visible to a streaming client lags the store by at most one
    /// interval; this is the bounded-staleness window of the channel.
    pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

    /// Capacity of the per-connection event channel.
    ///
    /// Small on purpose: a reader that stops draining exerts backpressure on
    /// the poll loop instead of buffering unbounded history.
    pub const EVENT_CHANNEL_CAPACITY: usize = 16;
}

/// Client-side chart cache configuration
pub mod chart {
    use super::Duration;

    /// Pull-mode refresh cadence, independent of the streaming channel
    pub const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

    /// Default smoothing factor (1.0 = pass-through)
    pub const DEFAULT_SMOOTHING: f64 = 1.0;
}

/// Metrics query defaults
pub mod query {
    /// Default metric type when the caller does not scope the query
    pub const DEFAULT_METRIC_TYPE: &str = "loss";

    /// Default row cap for point queries.
    ///
    /// Bounds memory and latency regardless of series length. Rows, not
    /// steps: callers requesting several metric names per step must size
    /// their own limit accordingly.
    pub const DEFAULT_LIMIT: u32 = 1000;

    /// Default age cutoff for purges, in days
    pub const DEFAULT_PURGE_DAYS: u32 = 30;
}

/// Producer-side collector configuration
pub mod collect {
    /// Rows buffered before an automatic flush to the store
    pub const BUFFER_SIZE: usize = 10;
}

/// Dynamic per-job config file
pub mod dynconfig {
    /// File name inside each job's output directory
    pub const FILE_NAME: &str = "dynamic_config.toml";

    /// Default sampling cadence in training steps
    pub const DEFAULT_SAMPLE_EVERY: u32 = 100;
}

//! trainwatch: metrics and dynamic-config synchronization for training jobs
//!
//! A long-running training process and its UI never share memory; they agree
//! through two persisted channels, both owned here:
//!
//! - an append-only metrics table ([`store`]), read by the [`query`] engine
//!   and followed live by the polling [`stream`] channel;
//! - a per-job dynamic-config file ([`dynconfig`]), merge-written by the UI
//!   and polled by the training process.
//!
//! Both are instances of the same problem: reconciling state across a
//! polling boundary with no shared clock. Delivery is eventually consistent
//! with bounded staleness of one poll interval.

pub mod api;
pub mod args;
pub mod chart;
pub mod collect;
pub mod constants;
pub mod dynconfig;
pub mod error;
pub mod logging;
pub mod query;
pub mod store;
pub mod stream;

pub use chart::{Ema, SeriesCache, ViewState};
pub use collect::MetricCollector;
pub use dynconfig::{ConfigPatch, ConfigWatcher, DynConfigStore, DynamicConfig};
pub use error::{Result, TrainwatchError};
pub use query::{ChartPoint, MetricsQueryResult, get_metrics};
pub use store::{MemoryMetricStore, MetricRecord, MetricStore, SqliteMetricStore, StepRange};
pub use stream::{StreamEvent, StreamRequest, open_stream};

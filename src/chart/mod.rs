//! Client-held series cache
//!
//! Accumulates chart points from either delivery mode (streamed updates or
//! periodic refetch), tracks which series the viewer has selected, and
//! produces raw and smoothed views for rendering. Everything here is pure,
//! synchronous, in-memory state; it never blocks on I/O.

pub mod smoothing;

pub use smoothing::{Ema, smooth_series};

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use crate::constants::chart::DEFAULT_SMOOTHING;
use crate::error::Result;
use crate::query::ChartPoint;

/// What the viewer should render right now.
///
/// "No data yet", "fetch failed", and "nothing selected" are distinct,
/// actionable states; a failed fetch keeps the accumulated points so a retry
/// does not restart the view from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    /// Nothing accumulated and nothing failed: the job has not logged yet
    NoDataYet,
    /// Data exists but no series is selected for display
    NothingSelected,
    /// Points and a selection are present
    Ready,
    /// The most recent fetch failed; retry without discarding the cache
    FetchFailed { message: String },
}

/// Accumulated chart state for one (job, metric type) view
#[derive(Debug, Clone)]
pub struct SeriesCache {
    points: BTreeMap<i64, ChartPoint>,
    selected: BTreeSet<String>,
    smoothing: f64,
    last_error: Option<String>,
}

impl SeriesCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            points: BTreeMap::new(),
            selected: BTreeSet::new(),
            smoothing: DEFAULT_SMOOTHING,
            last_error: None,
        }
    }

    /// Merge incoming points.
    ///
    /// A step already held keeps its timestamp; incoming values are folded
    /// in per name. Redelivery of identical data is a no-op, so pull and
    /// push feeds can overlap safely.
    pub fn ingest(&mut self, incoming: impl IntoIterator<Item = ChartPoint>) {
        for point in incoming {
            match self.points.entry(point.step) {
                Entry::Occupied(mut held) => {
                    for (name, value) in point.values {
                        held.get_mut().values.insert(name, value);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(point);
                }
            }
        }
        self.last_error = None;
    }

    /// Record a failed fetch; accumulated points stay usable
    pub fn record_fetch_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Highest step held, the cursor for incremental refetch
    #[must_use]
    pub fn last_step(&self) -> Option<i64> {
        self.points.keys().next_back().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Replace the selection with names the viewer picked
    pub fn select<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected = names.into_iter().map(Into::into).collect();
    }

    #[must_use]
    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    /// Set the smoothing factor for displayed series
    pub fn set_smoothing(&mut self, factor: f64) -> Result<()> {
        // Validate through the same gate the transform uses
        Ema::new(factor)?;
        self.smoothing = factor;
        Ok(())
    }

    #[must_use]
    pub fn smoothing(&self) -> f64 {
        self.smoothing
    }

    /// Raw ordered series for one metric name.
    ///
    /// Steps where the name is missing or the value is non-finite are
    /// excluded, not treated as zero.
    #[must_use]
    pub fn raw_series(&self, name: &str) -> Vec<(i64, f64)> {
        self.points
            .values()
            .filter_map(|point| {
                point
                    .value(name)
                    .filter(|v| v.is_finite())
                    .map(|v| (point.step, v))
            })
            .collect()
    }

    /// Smoothed series for one metric name under the current factor
    pub fn smoothed_series(&self, name: &str) -> Result<Vec<(i64, f64)>> {
        smooth_series(self.smoothing, &self.raw_series(name))
    }

    /// Current render state, per the error-display contract
    #[must_use]
    pub fn view_state(&self) -> ViewState {
        if let Some(message) = &self.last_error {
            return ViewState::FetchFailed {
                message: message.clone(),
            };
        }
        if self.points.is_empty() {
            ViewState::NoDataYet
        } else if self.selected.is_empty() {
            ViewState::NothingSelected
        } else {
            ViewState::Ready
        }
    }
}

impl Default for SeriesCache {
    fn default() -> Self {
        Self::new()
    }
}

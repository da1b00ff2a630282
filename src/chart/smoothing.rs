//! Exponential moving average for displayed series
//!
//! The factor runs opposite to responsiveness: `1.0` is pass-through, values
//! toward `0.0` smooth harder. The transform is a pure function of the
//! ordered input sequence and the factor; reordering or truncating the input
//! changes the output, so step order from the query engine must be
//! preserved.

use crate::error::{Result, TrainwatchError};

/// Stateful EMA over a sequence of values.
///
/// First value passes through unchanged; each later value becomes
/// `factor * raw + (1 - factor) * previous`.
#[derive(Debug, Clone)]
pub struct Ema {
    factor: f64,
    value: Option<f64>,
}

impl Ema {
    /// Create an EMA with `factor` in `[0, 1]`.
    pub fn new(factor: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&factor) {
            return Err(TrainwatchError::validation(
                "smoothing",
                format!("factor must be in [0, 1], got {factor}"),
            ));
        }
        Ok(Self {
            factor,
            value: None,
        })
    }

    /// Feed one raw value, returning the smoothed value
    pub fn update(&mut self, raw: f64) -> f64 {
        let next = match self.value {
            None => raw,
            Some(prev) => self.factor * raw + (1.0 - self.factor) * prev,
        };
        self.value = Some(next);
        next
    }

    /// The most recent smoothed value, if any input has been seen
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Forget all state, keeping the factor
    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Smooth an ordered `(step, value)` series.
///
/// Non-finite values must already be excluded; this function assumes clean
/// input and is deterministic over it.
pub fn smooth_series(factor: f64, series: &[(i64, f64)]) -> Result<Vec<(i64, f64)>> {
    let mut ema = Ema::new(factor)?;
    Ok(series
        .iter()
        .map(|&(step, raw)| (step, ema.update(raw)))
        .collect())
}

use crate::error::{LagError, LagResult};
use serde::{Deserialize, Serialize};

/// Paired dilation / activity recording sharing one time axis.
///
/// Missing samples are stored as `NaN` and are ignored by peak searches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesPair {
    /// Sample times, strictly increasing
    pub time: Vec<f64>,
    /// Slow channel, range-normalised to [0, 1]
    pub dilation: Vec<f64>,
    /// Fast channel, roughly zero-centred
    pub activity: Vec<f64>,
}

impl SeriesPair {
    /// Build a pair and check the shape invariants.
    pub fn new(time: Vec<f64>, dilation: Vec<f64>, activity: Vec<f64>) -> LagResult<Self> {
        let pair = Self {
            time,
            dilation,
            activity,
        };
        pair.validate()?;
        Ok(pair)
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn duration(&self) -> f64 {
        match (self.time.first(), self.time.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Median sample spacing, used to convert sample lags to time.
    pub fn sample_period(&self) -> f64 {
        let mut steps: Vec<f64> = self.time.windows(2).map(|w| w[1] - w[0]).collect();
        if steps.is_empty() {
            return 0.0;
        }
        steps.sort_by(|a, b| a.total_cmp(b));
        steps[steps.len() / 2]
    }

    /// Equal lengths, at least two samples, finite and strictly increasing time.
    pub fn validate(&self) -> LagResult<()> {
        if self.dilation.len() != self.time.len() || self.activity.len() != self.time.len() {
            return Err(LagError::MalformedInput(format!(
                "series lengths differ (time {}, dilation {}, activity {})",
                self.time.len(),
                self.dilation.len(),
                self.activity.len()
            )));
        }
        if self.time.len() < 2 {
            return Err(LagError::MalformedInput(format!(
                "need at least 2 samples, got {}",
                self.time.len()
            )));
        }
        if let Some(idx) = self.time.iter().position(|t| !t.is_finite()) {
            return Err(LagError::MalformedInput(format!(
                "time is not finite at sample {}",
                idx
            )));
        }
        if let Some(idx) = self.time.windows(2).position(|w| w[1] <= w[0]) {
            return Err(LagError::MalformedInput(format!(
                "time is not strictly increasing at sample {} ({} -> {})",
                idx + 1,
                self.time[idx],
                self.time[idx + 1]
            )));
        }
        Ok(())
    }

    /// Derivative of the dilation channel with respect to time.
    pub fn dilation_gradient(&self) -> LagResult<Vec<f64>> {
        gradient(&self.dilation, &self.time)
    }
}

/// Discrete derivative over a possibly non-uniform time axis.
///
/// Interior points use the centred difference across both neighbours,
/// the two ends use one-sided differences.
pub fn gradient(values: &[f64], time: &[f64]) -> LagResult<Vec<f64>> {
    let n = values.len();
    if n != time.len() {
        return Err(LagError::MalformedInput(format!(
            "gradient needs equal lengths (values {}, time {})",
            n,
            time.len()
        )));
    }
    if n < 2 {
        return Err(LagError::MalformedInput(format!(
            "gradient needs at least 2 samples, got {}",
            n
        )));
    }
    let mut out = vec![0.0; n];
    out[0] = (values[1] - values[0]) / (time[1] - time[0]);
    for i in 1..n - 1 {
        out[i] = (values[i + 1] - values[i - 1]) / (time[i + 1] - time[i - 1]);
    }
    out[n - 1] = (values[n - 1] - values[n - 2]) / (time[n - 1] - time[n - 2]);
    Ok(out)
}

/// Index of the largest finite value, first occurrence wins.
pub fn nan_argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Evenly spaced time axis starting at `start`.
pub fn uniform_time(n: usize, start: f64, step: f64) -> Vec<f64> {
    (0..n).map(|i| start + i as f64 * step).collect()
}

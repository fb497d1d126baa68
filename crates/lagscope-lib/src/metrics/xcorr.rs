//! Segment-wise cross-correlation between the dilation and activity channels.
//!
//! Complements the per-event peak lag with a whole-segment estimate: the lag
//! (in samples) maximising the mean-removed cross-correlation.

use crate::{
    error::{LagError, LagResult},
    signal::SeriesPair,
};
use realfft::{num_complex::Complex, RealFftPlanner};
use serde::{Deserialize, Serialize};

/// Full cross-correlation, `values[i]` belongs to `lags[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossCorrelation {
    pub lags: Vec<isize>,
    pub values: Vec<f64>,
}

impl CrossCorrelation {
    /// Lag and value of the maximum; first occurrence wins.
    pub fn peak(&self) -> Option<(isize, f64)> {
        let mut best: Option<(isize, f64)> = None;
        for (&lag, &value) in self.lags.iter().zip(&self.values) {
            if value.is_nan() {
                continue;
            }
            match best {
                Some((_, current)) if value <= current => {}
                _ => best = Some((lag, value)),
            }
        }
        best
    }
}

/// Mean-removed full cross-correlation `c[k] = sum_n a[n + k] * b[n]`
/// for `k` in `-(N-1)..=N-1`.
///
/// A positive peak lag means `a` trails `b`. Missing samples contribute zero
/// after mean removal.
pub fn cross_correlate(a: &[f64], b: &[f64]) -> LagResult<CrossCorrelation> {
    if a.len() != b.len() {
        return Err(LagError::MalformedInput(format!(
            "cross-correlation needs equal lengths ({} vs {})",
            a.len(),
            b.len()
        )));
    }
    let n = a.len();
    if n == 0 {
        return Err(LagError::NoData("empty segment".into()));
    }
    let size = (2 * n - 1).next_power_of_two();

    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);

    let mut spec_a = forward.make_output_vec();
    let mut spec_b = forward.make_output_vec();
    let mut buf = centered_padded(a, size);
    forward
        .process(&mut buf, &mut spec_a)
        .map_err(|err| LagError::Transform(err.to_string()))?;
    let mut buf = centered_padded(b, size);
    forward
        .process(&mut buf, &mut spec_b)
        .map_err(|err| LagError::Transform(err.to_string()))?;

    let mut product: Vec<Complex<f64>> = spec_a
        .iter()
        .zip(&spec_b)
        .map(|(x, y)| x * y.conj())
        .collect();
    // DC and Nyquist bins of a real signal's spectrum are purely real
    if let Some(first) = product.first_mut() {
        first.im = 0.0;
    }
    if let Some(last) = product.last_mut() {
        last.im = 0.0;
    }
    let mut circular = inverse.make_output_vec();
    inverse
        .process(&mut product, &mut circular)
        .map_err(|err| LagError::Transform(err.to_string()))?;

    let scale = 1.0 / size as f64;
    let max_lag = n as isize - 1;
    let lags: Vec<isize> = (-max_lag..=max_lag).collect();
    let values = lags
        .iter()
        .map(|&k| {
            let idx = (if k < 0 { size as isize + k } else { k }) as usize;
            circular[idx] * scale
        })
        .collect();
    Ok(CrossCorrelation { lags, values })
}

fn centered_padded(values: &[f64], size: usize) -> Vec<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let mean = if finite.is_empty() {
        0.0
    } else {
        finite.iter().sum::<f64>() / finite.len() as f64
    };
    let mut out = vec![0.0; size];
    for (slot, &v) in out.iter_mut().zip(values) {
        *slot = if v.is_finite() { v - mean } else { 0.0 };
    }
    out
}

/// Named inclusive sample range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationSegment {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

impl CorrelationSegment {
    pub fn new(name: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    /// Pre, stim, two post-stimulus blocks and the whole recording.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("pre", 0, 299),
            Self::new("stim", 299, 598),
            Self::new("post-stim", 598, 898),
            Self::new("post", 898, 1198),
            Self::new("overall", 0, 1198),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCorrelation {
    pub segment: CorrelationSegment,
    pub peak_lag: isize,
    pub peak_value: f64,
    /// Peak lag converted with the median sample period.
    pub peak_lag_time: f64,
    pub correlation: CrossCorrelation,
}

/// Correlate dilation against activity in each segment that fits the series.
pub fn segment_correlations(
    pair: &SeriesPair,
    segments: &[CorrelationSegment],
) -> LagResult<Vec<SegmentCorrelation>> {
    let period = pair.sample_period();
    let mut out = Vec::new();
    for segment in segments {
        if segment.end >= pair.len() || segment.start > segment.end {
            continue;
        }
        let range = segment.start..segment.end + 1;
        let correlation = cross_correlate(&pair.dilation[range.clone()], &pair.activity[range])?;
        let (peak_lag, peak_value) = correlation.peak().ok_or_else(|| {
            LagError::InsufficientData(format!("segment {} has no finite correlation", segment.name))
        })?;
        out.push(SegmentCorrelation {
            segment: segment.clone(),
            peak_lag,
            peak_value,
            peak_lag_time: peak_lag as f64 * period,
            correlation,
        });
    }
    Ok(out)
}

/// Element-wise mean of equally sized correlations.
pub fn average_correlations(items: &[&CrossCorrelation]) -> LagResult<CrossCorrelation> {
    let first = items
        .first()
        .ok_or_else(|| LagError::NoData("no correlations to average".into()))?;
    if items.iter().any(|c| c.lags != first.lags) {
        return Err(LagError::MalformedInput(
            "correlations cover different lag ranges".into(),
        ));
    }
    let count = items.len() as f64;
    let values = (0..first.values.len())
        .map(|i| items.iter().map(|c| c.values[i]).sum::<f64>() / count)
        .collect();
    Ok(CrossCorrelation {
        lags: first.lags.clone(),
        values,
    })
}

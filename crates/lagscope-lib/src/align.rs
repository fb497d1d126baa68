use crate::{
    detectors::Onset,
    error::{LagError, LagResult},
    record::{EventRecord, SnippetRow, UnitId, WindowBounds},
    signal::{nan_argmax, SeriesPair},
};
use log::debug;
use serde::{Deserialize, Serialize};

/// Window geometry and convergence parameters for lag alignment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Samples kept before the onset.
    pub before: usize,
    /// Samples kept from the onset onwards.
    pub after: usize,
    /// Largest acceptable |lag|, in time units.
    pub lag_tolerance: f64,
    /// The window is never shrunk below this many samples.
    pub min_length: usize,
    /// Explicit bound on shrink iterations; derived from the lengths when unset.
    pub max_iterations: Option<usize>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            before: 50,
            after: 150,
            lag_tolerance: 5.0,
            min_length: 50,
            max_iterations: None,
        }
    }
}

impl WindowConfig {
    pub fn target_length(&self) -> usize {
        self.before + self.after
    }

    /// Number of halvings that take the target length down to the minimum.
    pub fn iteration_cap(&self) -> usize {
        if let Some(cap) = self.max_iterations {
            return cap;
        }
        let mut length = self.target_length();
        let mut halvings = 0;
        while length > self.min_length && length > 1 {
            length /= 2;
            halvings += 1;
        }
        halvings
    }

    /// Clip `[onset - before, onset + after)` to the series.
    pub fn initial_bounds(&self, n: usize, onset: usize) -> WindowBounds {
        WindowBounds {
            start: onset.saturating_sub(self.before),
            end: (onset + self.after).min(n),
        }
    }
}

/// Outcome of the shrink loop for a single onset.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub lag: f64,
    pub shrink_steps: usize,
    pub converged: bool,
    pub initial: WindowBounds,
    pub last: WindowBounds,
}

/// Time of the activity peak minus time of the dilation peak inside `bounds`.
pub fn peak_lag(pair: &SeriesPair, bounds: WindowBounds) -> LagResult<f64> {
    let range = bounds.start..bounds.end.min(pair.len());
    let activity_peak = nan_argmax(&pair.activity[range.clone()]).ok_or_else(|| {
        LagError::InsufficientData(format!(
            "no valid activity samples in [{}, {})",
            bounds.start, bounds.end
        ))
    })?;
    let dilation_peak = nan_argmax(&pair.dilation[range]).ok_or_else(|| {
        LagError::InsufficientData(format!(
            "no valid dilation samples in [{}, {})",
            bounds.start, bounds.end
        ))
    })?;
    Ok(pair.time[bounds.start + activity_peak] - pair.time[bounds.start + dilation_peak])
}

/// Measure the lag around `onset`, halving and recentring the window while
/// |lag| exceeds the tolerance.
///
/// Stops when the lag is within tolerance, the window reaches the minimum
/// length, or the iteration cap is hit. Running out of shrink steps is not an
/// error: the last measured lag is returned with `converged == false`.
pub fn align_window(pair: &SeriesPair, onset: usize, cfg: &WindowConfig) -> LagResult<Alignment> {
    let n = pair.len();
    if onset >= n {
        return Err(LagError::MalformedInput(format!(
            "onset {} outside series of length {}",
            onset, n
        )));
    }
    let initial = cfg.initial_bounds(n, onset);
    let cap = cfg.iteration_cap();

    let mut bounds = initial;
    // the first pass is judged on the padded length
    let mut span = cfg.target_length();
    let mut lag = peak_lag(pair, bounds)?;
    let mut steps = 0;
    while lag.abs() > cfg.lag_tolerance && span > cfg.min_length && steps < cap {
        span /= 2;
        let half = (span / 2).max(1);
        let center = (bounds.start + bounds.end) / 2;
        bounds = WindowBounds {
            start: center.saturating_sub(half),
            end: (center + half).min(n),
        };
        lag = peak_lag(pair, bounds)?;
        span = bounds.len();
        steps += 1;
        debug!(
            "onset {}: shrink {} -> [{}, {}) lag {:.4}",
            onset, steps, bounds.start, bounds.end, lag
        );
    }

    Ok(Alignment {
        lag,
        shrink_steps: steps,
        converged: lag.abs() <= cfg.lag_tolerance,
        initial,
        last: bounds,
    })
}

/// Cut the unshrunk window and pad it to the target length.
///
/// Padding goes where the series ran out, so the onset always sits at row
/// `before`: leading rows when clipped at the start, trailing rows when
/// clipped at the end, both when the series is shorter than the window.
pub fn padded_snippet(pair: &SeriesPair, onset: usize, cfg: &WindowConfig) -> Vec<SnippetRow> {
    let bounds = cfg.initial_bounds(pair.len(), onset);
    let target = cfg.target_length();
    let leading = cfg.before.saturating_sub(onset - bounds.start);
    let trailing = target.saturating_sub(leading + bounds.len());

    let mut rows = Vec::with_capacity(target);
    rows.extend(std::iter::repeat(SnippetRow::padding()).take(leading));
    rows.extend((bounds.start..bounds.end).map(|i| {
        SnippetRow::sample(pair.time[i], pair.dilation[i], pair.activity[i])
    }));
    rows.extend(std::iter::repeat(SnippetRow::padding()).take(trailing));
    rows
}

/// Align one onset of a unit into an [`EventRecord`].
///
/// The reported lag comes from the converged (possibly shrunk) window while the
/// stored snippet is always the full, padded, unshrunk window.
pub fn align(
    pair: &SeriesPair,
    unit: &UnitId,
    onset: &Onset,
    cfg: &WindowConfig,
) -> LagResult<EventRecord> {
    let alignment = align_window(pair, onset.index, cfg)?;
    let snippet = padded_snippet(pair, onset.index, cfg);
    Ok(EventRecord {
        key: unit.event(onset.index),
        phase: onset.phase,
        lag: alignment.lag,
        shrink_steps: alignment.shrink_steps,
        converged: alignment.converged,
        window: alignment.initial,
        final_window: alignment.last,
        snippet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::Phase;
    use crate::signal::uniform_time;

    fn bump(n: usize, center: usize, width: f64, amp: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let x = (i as f64 - center as f64) / width;
                amp * (-0.5 * x * x).exp()
            })
            .collect()
    }

    fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
        a.iter().zip(b).map(|(x, y)| x + y).collect()
    }

    #[test]
    fn iteration_cap_follows_halvings() {
        assert_eq!(WindowConfig::default().iteration_cap(), 2);
        let cfg = WindowConfig {
            max_iterations: Some(7),
            ..WindowConfig::default()
        };
        assert_eq!(cfg.iteration_cap(), 7);
    }

    #[test]
    fn coincident_peaks_need_no_shrink() {
        let n = 1200;
        let pair = SeriesPair::new(
            uniform_time(n, 0.0, 0.1),
            bump(n, 520, 8.0, 1.0),
            bump(n, 520, 3.0, 2.0),
        )
        .unwrap();
        let result = align_window(&pair, 500, &WindowConfig::default()).unwrap();
        assert!(result.lag.abs() < 1e-9);
        assert_eq!(result.shrink_steps, 0);
        assert!(result.converged);
        assert_eq!(result.initial, WindowBounds { start: 450, end: 650 });
    }

    #[test]
    fn offset_peak_converges_after_one_halving() {
        let n = 1200;
        let onset = 500;
        // activity's global peak is 11 s after the dilation peak, a smaller
        // local response sits 1 s after it
        let activity = add(
            &bump(n, onset + 120, 2.0, 3.0),
            &bump(n, onset + 20, 2.0, 1.0),
        );
        let pair = SeriesPair::new(
            uniform_time(n, 0.0, 0.1),
            bump(n, onset + 10, 6.0, 1.0),
            activity,
        )
        .unwrap();
        let cfg = WindowConfig::default();
        let result = align_window(&pair, onset, &cfg).unwrap();
        assert_eq!(result.shrink_steps, 1);
        assert!(result.converged);
        assert!(result.lag.abs() <= cfg.lag_tolerance);
        assert!((result.lag - 1.0).abs() < 1e-6);
        assert_eq!(result.last, WindowBounds { start: 500, end: 600 });
    }

    #[test]
    fn exhausting_minimum_window_returns_best_lag() {
        let n = 1200;
        let onset = 500;
        let time = uniform_time(n, 0.0, 0.2);
        let dilation = bump(n, onset + 26, 1.0, 1.0);
        let activity = bump(n, onset + 74, 1.0, 1.0);
        let pair = SeriesPair::new(time, dilation, activity).unwrap();
        let cfg = WindowConfig::default();
        let result = align_window(&pair, onset, &cfg).unwrap();
        assert_eq!(result.shrink_steps, 2);
        assert!(!result.converged);
        assert!((result.lag - 48.0 * 0.2).abs() < 1e-6);
        assert_eq!(result.last.len(), 50);
    }

    #[test]
    fn end_clipped_window_widens_on_first_halving() {
        let n = 600;
        let onset = 590;
        // clipped start window [540, 600) sees peaks 50 s apart; the halved
        // window reaches back to the coincident pair near 530
        let dilation = add(&bump(n, 545, 1.0, 1.0), &bump(n, 528, 1.0, 2.0));
        let activity = add(&bump(n, 595, 1.0, 1.0), &bump(n, 530, 1.0, 2.0));
        let pair = SeriesPair::new(uniform_time(n, 0.0, 1.0), dilation, activity).unwrap();
        let result = align_window(&pair, onset, &WindowConfig::default()).unwrap();
        assert_eq!(result.initial, WindowBounds { start: 540, end: 600 });
        assert_eq!(result.shrink_steps, 1);
        assert_eq!(result.last, WindowBounds { start: 520, end: 600 });
        assert!(result.last.len() > result.initial.len());
        assert!(result.converged);
        assert!((result.lag - 2.0).abs() < 1e-9);
    }

    #[test]
    fn start_clipped_snippet_is_padded_in_front() {
        let n = 600;
        let pair = SeriesPair::new(
            uniform_time(n, 0.0, 0.1),
            bump(n, 40, 5.0, 1.0),
            bump(n, 45, 5.0, 1.0),
        )
        .unwrap();
        let cfg = WindowConfig::default();
        let onset = 20;
        let rows = padded_snippet(&pair, onset, &cfg);
        assert_eq!(rows.len(), 200);
        assert!(rows[..30].iter().all(|r| r.padding && r.time.is_none()));
        for (offset, row) in rows[30..].iter().enumerate() {
            assert!(!row.padding);
            assert_eq!(row.time, Some(pair.time[offset]));
            assert_eq!(row.dilation, Some(pair.dilation[offset]));
        }
    }

    #[test]
    fn end_clipped_snippet_is_padded_behind() {
        let n = 600;
        let pair = SeriesPair::new(
            uniform_time(n, 0.0, 0.1),
            vec![0.5; n],
            vec![0.0; n],
        )
        .unwrap();
        let rows = padded_snippet(&pair, 550, &WindowConfig::default());
        assert_eq!(rows.len(), 200);
        assert!(rows[..100].iter().all(|r| !r.padding));
        assert!(rows[100..].iter().all(|r| r.padding));
        assert_eq!(rows[50].time, Some(pair.time[550]));
    }

    #[test]
    fn short_series_pads_both_sides() {
        let n = 120;
        let pair = SeriesPair::new(
            uniform_time(n, 0.0, 0.1),
            vec![0.5; n],
            vec![0.0; n],
        )
        .unwrap();
        let rows = padded_snippet(&pair, 30, &WindowConfig::default());
        assert_eq!(rows.len(), 200);
        assert_eq!(rows.iter().take_while(|r| r.padding).count(), 20);
        assert_eq!(rows.iter().rev().take_while(|r| r.padding).count(), 60);
    }

    #[test]
    fn missing_signal_is_insufficient_data() {
        let n = 400;
        let mut activity = vec![0.0; n];
        for value in &mut activity[150..350] {
            *value = f64::NAN;
        }
        let pair = SeriesPair::new(uniform_time(n, 0.0, 0.1), vec![0.5; n], activity).unwrap();
        let onset = Onset {
            index: 200,
            phase: Phase::Pre,
        };
        let err = align(&pair, &UnitId::new("d001", 1, 1), &onset, &WindowConfig::default())
            .unwrap_err();
        assert!(matches!(err, LagError::InsufficientData(_)));
    }

    #[test]
    fn record_keeps_unshrunk_window() {
        let n = 1200;
        let onset = 500;
        let activity = add(
            &bump(n, onset + 120, 2.0, 3.0),
            &bump(n, onset + 20, 2.0, 1.0),
        );
        let pair = SeriesPair::new(
            uniform_time(n, 0.0, 0.1),
            bump(n, onset + 10, 6.0, 1.0),
            activity,
        )
        .unwrap();
        let record = align(
            &pair,
            &UnitId::new("d084", 1, 2),
            &Onset {
                index: onset,
                phase: Phase::During,
            },
            &WindowConfig::default(),
        )
        .unwrap();
        assert_eq!(record.window, WindowBounds { start: 450, end: 650 });
        assert_eq!(record.snippet.len(), 200);
        assert!(record.snippet.iter().all(|r| !r.padding));
        assert_eq!(record.snippet_file_name(), "d084_trial_1_stimcondition_2_stim_index_500.csv");
    }
}

use anyhow::{Context, Result};
use csv::WriterBuilder;
use lagscope_lib::{io::ColumnLayout, uniform_time, SeriesPair};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Shape of a synthetic unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSpec {
    pub samples: usize,
    /// Sample period in seconds.
    pub period: f64,
    /// Sample indices where a dilation starts rising.
    pub onsets: Vec<usize>,
    /// Height of each dilation event above the resting level.
    pub amplitude: f64,
    /// Seconds from each dilation peak to its activity peak.
    pub lag: f64,
    pub activity_amplitude: f64,
    pub dilation_noise: f64,
    pub activity_noise: f64,
}

impl Default for SimulationSpec {
    fn default() -> Self {
        Self {
            samples: 1200,
            period: 0.1,
            onsets: vec![150, 420, 750],
            amplitude: 0.3,
            lag: 1.0,
            activity_amplitude: 1.0,
            dilation_noise: 0.0005,
            activity_noise: 0.02,
        }
    }
}

// logistic rise with half-width 2 samples, peak 10 samples in, then decay
const RISE_SCALE: f64 = 2.0;
const PEAK_OFFSET: usize = 10;
const DECAY_SAMPLES: f64 = 40.0;
const ACTIVITY_WIDTH: f64 = 5.0;
const RESTING_LEVEL: f64 = 0.2;

/// Deterministic dilation / activity pair for a seed.
///
/// Fails when a noise level is negative or not finite.
pub fn simulate_unit(spec: &SimulationSpec, seed: u64) -> Result<SeriesPair> {
    let dilation_noise = Normal::new(0.0, spec.dilation_noise)
        .with_context(|| format!("invalid dilation noise {}", spec.dilation_noise))?;
    let activity_noise = Normal::new(0.0, spec.activity_noise)
        .with_context(|| format!("invalid activity noise {}", spec.activity_noise))?;
    let mut rng = StdRng::seed_from_u64(seed);
    let n = spec.samples.max(2);
    let period = if spec.period > 0.0 { spec.period } else { 0.1 };
    let lag_samples = spec.lag / period;

    let mut dilation = vec![RESTING_LEVEL; n];
    let mut activity = vec![0.0; n];
    for &onset in &spec.onsets {
        let peak = (onset + PEAK_OFFSET) as f64;
        let response = peak + lag_samples;
        for i in 0..n {
            let x = i as f64;
            let rise = 1.0 / (1.0 + (-(x - onset as f64) / RISE_SCALE).exp());
            let decay = (-(x - peak).max(0.0) / DECAY_SAMPLES).exp();
            dilation[i] += spec.amplitude * rise * decay;
            let z = (x - response) / ACTIVITY_WIDTH;
            activity[i] += spec.activity_amplitude * (-0.5 * z * z).exp();
        }
    }
    for value in &mut dilation {
        *value += dilation_noise.sample(&mut rng);
    }
    for value in &mut activity {
        *value += activity_noise.sample(&mut rng);
    }

    Ok(SeriesPair {
        time: uniform_time(n, 0.0, period),
        dilation,
        activity,
    })
}

/// Write a unit table with the given column names; `NaN` becomes an empty cell.
pub fn write_unit_csv(path: &Path, pair: &SeriesPair, layout: &ColumnLayout) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    writer.write_record([&layout.time, &layout.dilation, &layout.activity])?;
    for i in 0..pair.len() {
        writer.write_record([
            pair.time[i].to_string(),
            cell(pair.dilation[i]),
            cell(pair.activity[i]),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn cell(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        String::new()
    }
}

use crate::{
    error::{LagError, LagResult},
    signal::SeriesPair,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Derivative bands for one stimulation condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdProfile {
    pub primary_upper: f64,
    pub primary_lower: f64,
    pub secondary_upper: f64,
    pub secondary_lower: f64,
}

impl ThresholdProfile {
    pub fn new(
        primary_upper: f64,
        primary_lower: f64,
        secondary_upper: f64,
        secondary_lower: f64,
    ) -> LagResult<Self> {
        let profile = Self {
            primary_upper,
            primary_lower,
            secondary_upper,
            secondary_lower,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// primary_upper > secondary_upper > 0 > secondary_lower > primary_lower
    pub fn validate(&self) -> LagResult<()> {
        let ordered = self.primary_upper > self.secondary_upper
            && self.secondary_upper > 0.0
            && 0.0 > self.secondary_lower
            && self.secondary_lower > self.primary_lower;
        if ordered {
            Ok(())
        } else {
            Err(LagError::Configuration(format!(
                "threshold bands out of order: primary ({}, {}), secondary ({}, {})",
                self.primary_upper, self.primary_lower, self.secondary_upper, self.secondary_lower
            )))
        }
    }
}

/// Threshold profiles keyed by condition identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSet {
    profiles: BTreeMap<u32, ThresholdProfile>,
}

impl ProfileSet {
    pub fn empty() -> Self {
        Self {
            profiles: BTreeMap::new(),
        }
    }

    /// Insert after validating the band ordering.
    pub fn insert(&mut self, condition: u32, profile: ThresholdProfile) -> LagResult<()> {
        profile.validate().map_err(|err| {
            LagError::Configuration(format!("condition {}: {}", condition, err))
        })?;
        self.profiles.insert(condition, profile);
        Ok(())
    }

    pub fn get(&self, condition: u32) -> LagResult<&ThresholdProfile> {
        self.profiles.get(&condition).ok_or_else(|| {
            LagError::Configuration(format!(
                "no threshold profile for condition {}",
                condition
            ))
        })
    }

    pub fn conditions(&self) -> impl Iterator<Item = u32> + '_ {
        self.profiles.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for ProfileSet {
    /// Bands tuned on the reference cohort for stimulation conditions 1-5.
    fn default() -> Self {
        let table = [
            (1, 0.3155, -0.3174, 0.1571, -0.1591),
            (2, 0.3174, -0.3192, 0.1569, -0.1602),
            (3, 0.3377, -0.3426, 0.1674, -0.1708),
            (4, 0.3250, -0.3317, 0.1618, -0.1644),
            (5, 0.3257, -0.3298, 0.1617, -0.1660),
        ];
        let profiles = table
            .iter()
            .map(|&(condition, pu, pl, su, sl)| {
                (
                    condition,
                    ThresholdProfile {
                        primary_upper: pu,
                        primary_lower: pl,
                        secondary_upper: su,
                        secondary_lower: sl,
                    },
                )
            })
            .collect();
        Self { profiles }
    }
}

/// Parameters for flagging and spacing event samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Consecutive samples above the secondary band needed to flag the run.
    pub min_run: usize,
    /// Onsets must be strictly more than this many samples apart.
    pub min_spacing: usize,
    /// Apply the bands to positive derivatives (dilation).
    pub dilation: bool,
    /// Apply the mirrored lower bands to negative derivatives (constriction).
    pub constriction: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_run: 5,
            min_spacing: 50,
            dilation: true,
            constriction: false,
        }
    }
}

/// Boolean event mask aligned with the input samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags {
    pub flags: Vec<bool>,
}

impl EventFlags {
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Number of flagged samples.
    pub fn count(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }

    pub fn flagged_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.flags
            .iter()
            .enumerate()
            .filter_map(|(idx, &flag)| flag.then_some(idx))
    }
}

/// Flag event samples of the dilation channel.
pub fn classify(
    pair: &SeriesPair,
    profile: &ThresholdProfile,
    cfg: &DetectionConfig,
) -> LagResult<EventFlags> {
    let derivative = pair.dilation_gradient()?;
    Ok(classify_derivative(&derivative, profile, cfg))
}

/// Flag samples from a precomputed derivative.
pub fn classify_derivative(
    derivative: &[f64],
    profile: &ThresholdProfile,
    cfg: &DetectionConfig,
) -> EventFlags {
    let mut flags = vec![false; derivative.len()];
    if cfg.dilation {
        apply_bands(
            derivative,
            &mut flags,
            cfg.min_run,
            |d| d > profile.primary_upper,
            |d| d > profile.secondary_upper,
        );
    }
    if cfg.constriction {
        apply_bands(
            derivative,
            &mut flags,
            cfg.min_run,
            |d| d < profile.primary_lower,
            |d| d < profile.secondary_lower,
        );
    }
    EventFlags { flags }
}

fn apply_bands(
    derivative: &[f64],
    flags: &mut [bool],
    min_run: usize,
    primary: impl Fn(f64) -> bool,
    secondary: impl Fn(f64) -> bool,
) {
    let min_run = min_run.max(1);
    let mut run_start = 0usize;
    let mut run_len = 0usize;
    for (i, &d) in derivative.iter().enumerate() {
        if primary(d) {
            flags[i] = true;
        }
        if secondary(d) {
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
            if run_len == min_run {
                // the run is confirmed, so its build-up samples count too
                for flag in &mut flags[run_start..=i] {
                    *flag = true;
                }
            } else if run_len > min_run {
                flags[i] = true;
            }
        } else {
            run_len = 0;
        }
    }
}

/// Outlier statistics of a pooled derivative distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCalibration {
    pub sigma: f64,
    pub mean: f64,
    pub std: f64,
    /// Samples with |d - mean| >= sigma * std
    pub outliers: usize,
    pub total: usize,
    pub lowest_positive: Option<f64>,
    pub largest_negative: Option<f64>,
}

/// Summarise derivatives lying `sigma` standard deviations from the mean.
pub fn calibrate(derivatives: &[f64], sigma: f64) -> LagResult<ThresholdCalibration> {
    let finite: Vec<f64> = derivatives.iter().copied().filter(|d| d.is_finite()).collect();
    if finite.is_empty() {
        return Err(LagError::NoData(
            "no finite derivatives to calibrate from".into(),
        ));
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let std = (finite.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n).sqrt();
    let threshold = sigma * std;

    let mut outliers = 0;
    let mut lowest_positive: Option<f64> = None;
    let mut largest_negative: Option<f64> = None;
    for &d in finite.iter().filter(|&&d| (d - mean).abs() >= threshold) {
        outliers += 1;
        if d > 0.0 {
            lowest_positive = Some(lowest_positive.map_or(d, |cur| cur.min(d)));
        } else if d < 0.0 {
            largest_negative = Some(largest_negative.map_or(d, |cur| cur.max(d)));
        }
    }

    Ok(ThresholdCalibration {
        sigma,
        mean,
        std,
        outliers,
        total: finite.len(),
        lowest_positive,
        largest_negative,
    })
}

/// Derive a full profile from a wide (primary) and a narrow (secondary) band.
pub fn calibrate_profile(
    derivatives: &[f64],
    primary_sigma: f64,
    secondary_sigma: f64,
) -> LagResult<ThresholdProfile> {
    let primary = calibrate(derivatives, primary_sigma)?;
    let secondary = calibrate(derivatives, secondary_sigma)?;
    let pick = |value: Option<f64>, label: &str| {
        value.ok_or_else(|| LagError::NoData(format!("no {} derivative beyond the band", label)))
    };
    ThresholdProfile::new(
        pick(primary.lowest_positive, "positive primary")?,
        pick(primary.largest_negative, "negative primary")?,
        pick(secondary.lowest_positive, "positive secondary")?,
        pick(secondary.largest_negative, "negative secondary")?,
    )
}

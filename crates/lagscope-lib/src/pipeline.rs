use crate::{
    align::{align, WindowConfig},
    detectors::{
        classify, locate, processing_order, DetectionConfig, EventFlags, Onset, Phase,
        PhaseBoundaries, ProfileSet, ThresholdProfile,
    },
    error::LagResult,
    record::{EventKey, EventRecord, UnitId},
    signal::SeriesPair,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// All tunables of the per-unit pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection: DetectionConfig,
    pub phases: PhaseBoundaries,
    pub window: WindowConfig,
}

/// An onset that produced no record, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedOnset {
    pub key: EventKey,
    pub phase: Phase,
    pub kind: String,
    pub reason: String,
}

/// Everything derived from one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit: UnitId,
    pub flagged_samples: usize,
    pub onsets: Vec<Onset>,
    /// In processing order: stimulation-phase onsets first.
    pub records: Vec<EventRecord>,
    pub skipped: Vec<SkippedOnset>,
}

/// Threshold the dilation derivative and pick spaced onsets.
pub fn detect_onsets(
    pair: &SeriesPair,
    profile: &ThresholdProfile,
    cfg: &PipelineConfig,
) -> LagResult<(EventFlags, Vec<Onset>)> {
    pair.validate()?;
    let flags = classify(pair, profile, &cfg.detection)?;
    let onsets = locate(&flags, &cfg.detection, &cfg.phases);
    Ok((flags, onsets))
}

/// Run classification, onset selection and alignment over one unit.
///
/// A missing profile or malformed series fails the whole unit. Onsets whose
/// window cannot be aligned are recorded in `skipped` and processing goes on.
pub fn process_unit(
    unit: &UnitId,
    pair: &SeriesPair,
    profiles: &ProfileSet,
    cfg: &PipelineConfig,
) -> LagResult<UnitOutcome> {
    let profile = profiles.get(unit.condition)?;
    let (flags, onsets) = detect_onsets(pair, profile, cfg)?;
    debug!(
        "{}: {} flagged samples, {} onsets",
        unit,
        flags.count(),
        onsets.len()
    );

    let mut records = Vec::with_capacity(onsets.len());
    let mut skipped = Vec::new();
    for onset in processing_order(&onsets) {
        match align(pair, unit, &onset, &cfg.window) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(
                    "skipping onset {} ({}) of {}: {}",
                    onset.index, onset.phase, unit, err
                );
                skipped.push(SkippedOnset {
                    key: unit.event(onset.index),
                    phase: onset.phase,
                    kind: err.kind().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    info!(
        "processed {}: {} onsets, {} records, {} skipped",
        unit,
        onsets.len(),
        records.len(),
        skipped.len()
    );
    Ok(UnitOutcome {
        unit: unit.clone(),
        flagged_samples: flags.count(),
        onsets,
        records,
        skipped,
    })
}

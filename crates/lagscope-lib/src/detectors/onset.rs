use crate::detectors::threshold::{DetectionConfig, EventFlags};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an onset relative to the stimulation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pre,
    During,
    Post,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pre => "pre",
            Phase::During => "during",
            Phase::Post => "post",
        }
    }

    /// Pre and post onsets are pooled as baseline events.
    pub fn is_baseline(&self) -> bool {
        !matches!(self, Phase::During)
    }

    /// Label used in snippet file names ("stim" or "baseline").
    pub fn file_label(&self) -> &'static str {
        if self.is_baseline() {
            "baseline"
        } else {
            "stim"
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pre" => Some(Phase::Pre),
            "during" | "stim" => Some(Phase::During),
            "post" => Some(Phase::Post),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sample indices delimiting the stimulation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseBoundaries {
    pub stim_start: usize,
    pub stim_end: usize,
}

impl Default for PhaseBoundaries {
    fn default() -> Self {
        Self {
            stim_start: 299,
            stim_end: 598,
        }
    }
}

impl PhaseBoundaries {
    /// Strictly inside the window is `During`; indices sitting exactly on a
    /// boundary are reported as `Post`.
    pub fn phase_of(&self, index: usize) -> Phase {
        if index < self.stim_start {
            Phase::Pre
        } else if index > self.stim_start && index < self.stim_end {
            Phase::During
        } else {
            Phase::Post
        }
    }
}

/// A selected event onset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Onset {
    pub index: usize,
    pub phase: Phase,
}

/// Greedy single pass: keep a flagged index when it lies more than
/// `min_spacing` samples after the previously kept one.
pub fn locate(flags: &EventFlags, cfg: &DetectionConfig, bounds: &PhaseBoundaries) -> Vec<Onset> {
    let mut onsets = Vec::new();
    let mut last: Option<usize> = None;
    for idx in flags.flagged_indices() {
        let spaced = match last {
            Some(prev) => idx - prev > cfg.min_spacing,
            None => true,
        };
        if spaced {
            onsets.push(Onset {
                index: idx,
                phase: bounds.phase_of(idx),
            });
            last = Some(idx);
        }
    }
    onsets
}

/// Stimulation-phase onsets first, then baseline onsets, each in index order.
pub fn processing_order(onsets: &[Onset]) -> Vec<Onset> {
    let (mut during, baseline): (Vec<Onset>, Vec<Onset>) =
        onsets.iter().partition(|onset| onset.phase == Phase::During);
    during.extend(baseline);
    during
}

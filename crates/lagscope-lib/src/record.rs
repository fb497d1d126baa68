use crate::detectors::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one recorded unit (a day / trial / condition triple).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub day: String,
    pub trial: u32,
    pub condition: u32,
}

impl UnitId {
    pub fn new(day: impl Into<String>, trial: u32, condition: u32) -> Self {
        Self {
            day: day.into(),
            trial,
            condition,
        }
    }

    pub fn event(&self, index: usize) -> EventKey {
        EventKey {
            day: self.day.clone(),
            trial: self.trial,
            condition: self.condition,
            index,
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_trial_{}_stimcondition_{}",
            self.day, self.trial, self.condition
        )
    }
}

/// Identifier tuple of a single event: unit plus onset index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub day: String,
    pub trial: u32,
    pub condition: u32,
    pub index: usize,
}

impl EventKey {
    pub fn unit(&self) -> UnitId {
        UnitId::new(self.day.clone(), self.trial, self.condition)
    }

    /// Parse `<day>_trial_<n>_stimcondition_<n>[_<label>]_index_<n>[.<ext>]`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = match name.rfind('.') {
            Some(dot) if dot > 0 => &name[..dot],
            _ => name,
        };
        let tokens: Vec<&str> = stem.split('_').collect();
        let trial_at = tokens.iter().position(|t| *t == "trial")?;
        if trial_at == 0 {
            return None;
        }
        let day = tokens[trial_at - 1];
        let trial = tokens.get(trial_at + 1)?.parse().ok()?;
        if *tokens.get(trial_at + 2)? != "stimcondition" {
            return None;
        }
        let condition = tokens.get(trial_at + 3)?.parse().ok()?;
        let rest = &tokens[trial_at + 4..];
        let index_at = rest.iter().position(|t| *t == "index")?;
        // at most one label (e.g. "stim", "baseline") between condition and index
        if index_at > 1 {
            return None;
        }
        let index = rest.get(index_at + 1)?.parse().ok()?;
        Some(Self {
            day: day.to_string(),
            trial,
            condition,
            index,
        })
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_index_{}", self.unit(), self.index)
    }
}

/// Half-open sample range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub start: usize,
    pub end: usize,
}

impl WindowBounds {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One row of a padded window snippet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnippetRow {
    pub time: Option<f64>,
    pub dilation: Option<f64>,
    pub activity: Option<f64>,
    /// Row was inserted to reach the target length, not read from the series.
    pub padding: bool,
}

impl SnippetRow {
    pub fn padding() -> Self {
        Self {
            time: None,
            dilation: None,
            activity: None,
            padding: true,
        }
    }

    pub fn sample(time: f64, dilation: f64, activity: f64) -> Self {
        let finite = |v: f64| v.is_finite().then_some(v);
        Self {
            time: finite(time),
            dilation: finite(dilation),
            activity: finite(activity),
            padding: false,
        }
    }
}

/// Result of aligning one onset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub key: EventKey,
    pub phase: Phase,
    /// Activity peak time minus dilation peak time, at convergence.
    pub lag: f64,
    pub shrink_steps: usize,
    pub converged: bool,
    /// Unshrunk window the snippet was cut from.
    pub window: WindowBounds,
    /// Window the reported lag was measured in.
    pub final_window: WindowBounds,
    pub snippet: Vec<SnippetRow>,
}

impl EventRecord {
    pub fn to_row(&self) -> EventRow {
        EventRow {
            day: self.key.day.clone(),
            trial: self.key.trial,
            condition: self.key.condition,
            index: self.key.index,
            phase: self.phase,
            lag: Some(self.lag),
            shrink_steps: self.shrink_steps,
            converged: self.converged,
        }
    }

    /// File name for the persisted snippet.
    pub fn snippet_file_name(&self) -> String {
        format!(
            "{}_{}_index_{}.csv",
            self.key.unit(),
            self.phase.file_label(),
            self.key.index
        )
    }
}

/// Flat, persisted form of an [`EventRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub day: String,
    pub trial: u32,
    pub condition: u32,
    pub index: usize,
    pub phase: Phase,
    /// `None` when the stored value was missing or not numeric.
    pub lag: Option<f64>,
    pub shrink_steps: usize,
    pub converged: bool,
}

impl EventRow {
    pub fn key(&self) -> EventKey {
        EventKey {
            day: self.day.clone(),
            trial: self.trial,
            condition: self.condition,
            index: self.index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plot_and_snippet_names() {
        let plot = EventKey::from_file_name("d084_trial_2_stimcondition_3_index_412.png").unwrap();
        assert_eq!(plot, UnitId::new("d084", 2, 3).event(412));
        let snippet =
            EventKey::from_file_name("d001_trial_1_stimcondition_5_baseline_index_77.csv").unwrap();
        assert_eq!(snippet, UnitId::new("d001", 1, 5).event(77));
    }

    #[test]
    fn rejects_unrelated_names() {
        assert!(EventKey::from_file_name("time_differences.csv").is_none());
        assert!(EventKey::from_file_name("d084_trial_x_stimcondition_3_index_4").is_none());
        assert!(EventKey::from_file_name("d084_trial_1_stimcondition_3_a_b_index_4").is_none());
    }

    #[test]
    fn key_display_round_trips_through_parser() {
        let key = UnitId::new("d014", 3, 1).event(905);
        assert_eq!(key.to_string(), "d014_trial_3_stimcondition_1_index_905");
        assert_eq!(EventKey::from_file_name(&key.to_string()), Some(key));
    }

    #[test]
    fn row_serialises_phase_in_lowercase() {
        let row = EventRow {
            day: "d007".into(),
            trial: 2,
            condition: 4,
            index: 310,
            phase: Phase::During,
            lag: None,
            shrink_steps: 2,
            converged: false,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["phase"], "during");
        assert!(json["lag"].is_null());
        assert_eq!(row.key().to_string(), "d007_trial_2_stimcondition_4_index_310");
    }
}

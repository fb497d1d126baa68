use crate::{
    detectors::Phase,
    record::{EventRecord, SnippetRow},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Pooling of event snippets for response averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResponseGroup {
    Baseline,
    Stim(u32),
}

impl fmt::Display for ResponseGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseGroup::Baseline => f.write_str("baseline"),
            ResponseGroup::Stim(condition) => write!(f, "stimcondition_{}", condition),
        }
    }
}

/// Which records count as baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    /// Condition without stimulation; all of its events pool into baseline.
    pub control_condition: Option<u32>,
}

impl Default for Grouping {
    fn default() -> Self {
        Self {
            control_condition: Some(5),
        }
    }
}

impl Grouping {
    pub fn group(&self, phase: Phase, condition: u32) -> ResponseGroup {
        if phase.is_baseline() || self.control_condition == Some(condition) {
            ResponseGroup::Baseline
        } else {
            ResponseGroup::Stim(condition)
        }
    }

    pub fn group_of(&self, record: &EventRecord) -> ResponseGroup {
        self.group(record.phase, record.key.condition)
    }
}

/// Per-row statistics across the snippets of one group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseRow {
    pub dilation_mean: Option<f64>,
    pub dilation_std: Option<f64>,
    pub activity_mean: Option<f64>,
    pub activity_std: Option<f64>,
    /// Snippets with a dilation value on this row.
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedResponse {
    pub group: ResponseGroup,
    pub events: usize,
    pub rows: Vec<ResponseRow>,
}

/// Average event snippets row by row within each group, ignoring missing values.
pub fn average_responses(records: &[EventRecord], grouping: &Grouping) -> Vec<AveragedResponse> {
    average_snippets(
        records
            .iter()
            .map(|record| (grouping.group_of(record), record.snippet.as_slice())),
    )
}

/// Average already grouped snippets, e.g. ones read back from disk.
pub fn average_snippets<'a, I>(snippets: I) -> Vec<AveragedResponse>
where
    I: IntoIterator<Item = (ResponseGroup, &'a [SnippetRow])>,
{
    let mut groups: BTreeMap<ResponseGroup, Vec<&[SnippetRow]>> = BTreeMap::new();
    for (group, rows) in snippets {
        groups.entry(group).or_default().push(rows);
    }
    groups
        .into_iter()
        .map(|(group, snippets)| AveragedResponse {
            group,
            events: snippets.len(),
            rows: average_rows(&snippets),
        })
        .collect()
}

fn average_rows(snippets: &[&[SnippetRow]]) -> Vec<ResponseRow> {
    let length = snippets.iter().map(|s| s.len()).max().unwrap_or(0);
    (0..length)
        .map(|row| {
            let dilation: Vec<f64> = snippets
                .iter()
                .filter_map(|s| s.get(row).and_then(|r| r.dilation))
                .collect();
            let activity: Vec<f64> = snippets
                .iter()
                .filter_map(|s| s.get(row).and_then(|r| r.activity))
                .collect();
            let (dilation_mean, dilation_std) = mean_std(&dilation);
            let (activity_mean, activity_std) = mean_std(&activity);
            ResponseRow {
                dilation_mean,
                dilation_std,
                activity_mean,
                activity_std,
                count: dilation.len(),
            }
        })
        .collect()
}

fn mean_std(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (Some(mean), Some(var.sqrt()))
}

use crate::{
    error::{LagError, LagResult},
    record::{EventKey, EventRecord, EventRow},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Mean and population standard deviation of approved lags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LagSummary {
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

impl LagSummary {
    pub fn from_values(values: &[f64]) -> LagResult<Self> {
        if values.is_empty() {
            return Err(LagError::NoData(
                "no numeric lag values left after filtering".into(),
            ));
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        Ok(Self {
            mean,
            std,
            count: values.len(),
        })
    }
}

/// Externally curated set of approved events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalList {
    keys: HashSet<EventKey>,
}

impl ApprovalList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: EventKey) -> bool {
        self.keys.insert(key)
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Build from file names or identifiers, ignoring anything unrecognised.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|name| EventKey::from_file_name(name.as_ref().trim()))
            .collect()
    }
}

impl FromIterator<EventKey> for ApprovalList {
    fn from_iter<T: IntoIterator<Item = EventKey>>(iter: T) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Lenient numeric coercion of a stored lag value.
pub fn coerce_lag(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Summarise the lags of approved rows; missing or non-finite lags are dropped.
pub fn aggregate<F>(rows: &[EventRow], is_approved: F) -> LagResult<LagSummary>
where
    F: Fn(&EventKey) -> bool,
{
    let values = approved_lags(rows.iter(), &is_approved);
    LagSummary::from_values(&values)
}

/// Same as [`aggregate`] over in-memory records.
pub fn aggregate_records<F>(records: &[EventRecord], is_approved: F) -> LagResult<LagSummary>
where
    F: Fn(&EventKey) -> bool,
{
    let rows: Vec<EventRow> = records.iter().map(EventRecord::to_row).collect();
    aggregate(&rows, is_approved)
}

/// Per-condition summaries; conditions with nothing approved are left out.
pub fn aggregate_by_condition<F>(rows: &[EventRow], is_approved: F) -> BTreeMap<u32, LagSummary>
where
    F: Fn(&EventKey) -> bool,
{
    let mut grouped: BTreeMap<u32, Vec<&EventRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.condition).or_default().push(row);
    }
    grouped
        .into_iter()
        .filter_map(|(condition, group)| {
            let values = approved_lags(group.into_iter(), &is_approved);
            LagSummary::from_values(&values)
                .ok()
                .map(|summary| (condition, summary))
        })
        .collect()
}

fn approved_lags<'a, F>(rows: impl Iterator<Item = &'a EventRow>, is_approved: &F) -> Vec<f64>
where
    F: Fn(&EventKey) -> bool,
{
    rows.filter(|row| is_approved(&row.key()))
        .filter_map(|row| row.lag.filter(|v| v.is_finite()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::Phase;
    use crate::record::UnitId;

    fn row(day: &str, condition: u32, index: usize, lag: Option<f64>) -> EventRow {
        EventRow {
            day: day.into(),
            trial: 1,
            condition,
            index,
            phase: Phase::During,
            lag,
            shrink_steps: 0,
            converged: true,
        }
    }

    #[test]
    fn approved_lags_mean_and_population_std() {
        let rows = vec![
            row("d001", 1, 10, Some(2.0)),
            row("d001", 1, 80, Some(4.0)),
            row("d001", 1, 150, Some(6.0)),
            row("d001", 1, 220, Some(100.0)),
        ];
        let approved: ApprovalList = [10, 80, 150]
            .iter()
            .map(|&i| UnitId::new("d001", 1, 1).event(i))
            .collect();
        let summary = aggregate(&rows, |key| approved.contains(key)).unwrap();
        assert_eq!(summary.count, 3);
        assert!((summary.mean - 4.0).abs() < 1e-12);
        assert!((summary.std - 1.632_993_161_855_452).abs() < 1e-9);
    }

    #[test]
    fn non_numeric_lags_are_dropped() {
        let rows = vec![
            row("d001", 1, 10, Some(2.0)),
            row("d001", 1, 80, None),
            row("d001", 1, 150, Some(f64::NAN)),
        ];
        let summary = aggregate(&rows, |_| true).unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(coerce_lag(" 1.5 "), Some(1.5));
        assert_eq!(coerce_lag("n/a"), None);
        assert_eq!(coerce_lag("NaN"), None);
    }

    #[test]
    fn empty_selection_is_no_data() {
        let rows = vec![row("d001", 1, 10, Some(2.0))];
        let err = aggregate(&rows, |_| false).unwrap_err();
        assert!(matches!(err, LagError::NoData(_)));
        assert!(matches!(aggregate(&[], |_| true).unwrap_err(), LagError::NoData(_)));
    }

    #[test]
    fn approval_list_from_names_skips_noise() {
        let list = ApprovalList::from_names([
            "d070_trial_2_stimcondition_4_index_333.png",
            "notes.txt",
            "d070_trial_2_stimcondition_4_stim_index_333.csv",
        ]);
        assert_eq!(list.len(), 1);
        assert!(list.contains(&UnitId::new("d070", 2, 4).event(333)));
    }

    #[test]
    fn per_condition_summaries_skip_empty_groups() {
        let rows = vec![
            row("d001", 1, 10, Some(1.0)),
            row("d001", 1, 80, Some(3.0)),
            row("d001", 2, 10, None),
        ];
        let by_condition = aggregate_by_condition(&rows, |_| true);
        assert_eq!(by_condition.len(), 1);
        assert!((by_condition[&1].mean - 2.0).abs() < 1e-12);
    }
}

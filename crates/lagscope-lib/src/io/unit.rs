use crate::error::LagError;
use crate::signal::SeriesPair;
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Column names of a unit table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub time: String,
    pub dilation: String,
    pub activity: String,
}

impl ColumnLayout {
    /// `time`, `dilation_value`, `activity_value`
    pub fn standard() -> Self {
        Self {
            time: "time".into(),
            dilation: "dilation_value".into(),
            activity: "activity_value".into(),
        }
    }

    /// Layout of the pupil / calcium imaging exports.
    pub fn pupil_calcium() -> Self {
        Self {
            time: "time".into(),
            dilation: "Pupil Diameter Ratio".into(),
            activity: "calcium".into(),
        }
    }
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self::standard()
    }
}

impl FromStr for ColumnLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::standard()),
            "pupil-calcium" | "pupil_calcium" => Ok(Self::pupil_calcium()),
            other => anyhow::bail!(
                "unknown column layout '{}' (expected standard or pupil-calcium)",
                other
            ),
        }
    }
}

/// Read a unit table from disk.
///
/// Time must parse on every row; dilation or activity cells that are empty or
/// not numeric become `NaN`.
pub fn read_unit_csv(path: &Path, layout: &ColumnLayout) -> Result<SeriesPair> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_unit_from(file, layout).with_context(|| format!("reading unit {}", path.display()))
}

/// Same as [`read_unit_csv`] over any reader.
pub fn read_unit_from<R: Read>(source: R, layout: &ColumnLayout) -> Result<SeriesPair> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(source);
    let headers = reader.headers().context("reading header")?.clone();

    let time_idx = locate_column(&headers, &layout.time, "time")?;
    let dilation_idx = locate_column(&headers, &layout.dilation, "dilation")?;
    let activity_idx = locate_column(&headers, &layout.activity, "activity")?;

    let mut time = Vec::new();
    let mut dilation = Vec::new();
    let mut activity = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("reading row {}", row + 1))?;
        let cell = record.get(time_idx).unwrap_or_default();
        let t = cell.parse::<f64>().map_err(|_| {
            LagError::MalformedInput(format!("row {}: time '{}' is not a number", row + 1, cell))
        })?;
        time.push(t);
        dilation.push(lenient(record.get(dilation_idx)));
        activity.push(lenient(record.get(activity_idx)));
    }
    Ok(SeriesPair::new(time, dilation, activity)?)
}

fn lenient(cell: Option<&str>) -> f64 {
    cell.and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

fn locate_column(
    headers: &csv::StringRecord,
    requested: &str,
    hint: &str,
) -> Result<usize, LagError> {
    headers
        .iter()
        .position(|name| name.eq_ignore_ascii_case(requested))
        .ok_or_else(|| LagError::MalformedInput(format!("missing {} column ({})", hint, requested)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn reads_standard_layout_with_gaps() {
        let text = "time,dilation_value,activity_value\n0.0,0.1,1.0\n0.1,,2.0\n0.2,0.3,n/a\n";
        let pair = read_unit_from(text.as_bytes(), &ColumnLayout::standard()).unwrap();
        assert_eq!(pair.len(), 3);
        assert!(pair.dilation[1].is_nan());
        assert!(pair.activity[2].is_nan());
        assert_eq!(pair.time[2], 0.2);
    }

    #[test]
    fn column_lookup_ignores_case_and_order() {
        let text = "Calcium,Pupil Diameter Ratio,Time\n1.0,0.5,0.0\n2.0,0.6,0.5\n";
        let pair = read_unit_from(text.as_bytes(), &ColumnLayout::pupil_calcium()).unwrap();
        assert_eq!(pair.activity, vec![1.0, 2.0]);
        assert_eq!(pair.dilation, vec![0.5, 0.6]);
    }

    #[test]
    fn missing_column_and_bad_time_fail() {
        let text = "time,dilation_value\n0.0,0.1\n0.1,0.2\n";
        let err = read_unit_from(text.as_bytes(), &ColumnLayout::standard()).unwrap_err();
        assert!(err.to_string().contains("activity"));
        assert!(matches!(
            err.downcast_ref::<LagError>(),
            Some(LagError::MalformedInput(_))
        ));

        let text = "time,dilation_value,activity_value\n0.0,0.1,1.0\nlater,0.2,1.0\n";
        let err = read_unit_from(text.as_bytes(), &ColumnLayout::standard()).unwrap_err();
        assert!(err.to_string().contains("row 2"));
        assert!(matches!(
            err.downcast_ref::<LagError>(),
            Some(LagError::MalformedInput(_))
        ));
    }

    #[test]
    fn non_increasing_time_is_malformed() {
        let text = "time,dilation_value,activity_value\n0.0,0.1,1.0\n0.0,0.2,1.0\n";
        let err = read_unit_from(text.as_bytes(), &ColumnLayout::standard()).unwrap_err();
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn layout_names_parse() {
        assert_eq!("standard".parse::<ColumnLayout>().unwrap(), ColumnLayout::standard());
        assert_eq!(
            "Pupil-Calcium".parse::<ColumnLayout>().unwrap(),
            ColumnLayout::pupil_calcium()
        );
        assert!("wide".parse::<ColumnLayout>().is_err());
    }

    #[test]
    fn reads_fixture_unit() {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let path = manifest_dir
            .parent()
            .and_then(|p| p.parent())
            .expect("workspace")
            .join("test_data/d001_trial_1_stimcondition_1.csv");
        let pair = read_unit_csv(&path, &ColumnLayout::standard()).unwrap();
        assert_eq!(pair.len(), 1200);
    }
}

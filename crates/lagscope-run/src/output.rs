use crate::{BatchReport, UnitFailure};
use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use lagscope_lib::{
    aggregate_by_condition, aggregate_records, coerce_lag, EventKey, EventRecord, EventRow,
    Grouping, LagSummary, Phase, ResponseGroup, SkippedOnset, SnippetRow,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub fn write_events_csv(path: &Path, rows: &[EventRow]) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RawEventRow {
    day: String,
    trial: u32,
    condition: u32,
    index: usize,
    phase: String,
    #[serde(default)]
    lag: String,
    #[serde(default)]
    shrink_steps: usize,
    #[serde(default)]
    converged: Option<bool>,
}

/// Read an events table back; lag cells that are not numbers become `None`.
pub fn read_events_csv(path: &Path) -> Result<Vec<EventRow>> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening events {}", path.display()))?;
    let mut rows = Vec::new();
    for (idx, raw) in reader.deserialize::<RawEventRow>().enumerate() {
        let raw = raw.with_context(|| format!("parsing events row {} in {}", idx + 1, path.display()))?;
        let phase = Phase::parse(&raw.phase).ok_or_else(|| {
            anyhow::anyhow!("row {}: unknown phase '{}'", idx + 1, raw.phase)
        })?;
        let lag = coerce_lag(&raw.lag);
        if lag.is_none() {
            debug!("row {}: lag '{}' is not numeric", idx + 1, raw.lag);
        }
        rows.push(EventRow {
            day: raw.day,
            trial: raw.trial,
            condition: raw.condition,
            index: raw.index,
            phase,
            lag,
            shrink_steps: raw.shrink_steps,
            converged: raw.converged.unwrap_or(false),
        });
    }
    Ok(rows)
}

/// `time,dilation,activity`, padding rows left empty.
pub fn write_snippet_csv(path: &Path, rows: &[SnippetRow]) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    writer.write_record(["time", "dilation", "activity"])?;
    for row in rows {
        writer.write_record([cell(row.time), cell(row.dilation), cell(row.activity)])?;
    }
    writer.flush()?;
    Ok(())
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write every record's snippet into `dir`, returning the paths in order.
pub fn write_snippets(dir: &Path, records: &[EventRecord]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut paths = Vec::with_capacity(records.len());
    for record in records {
        let path = dir.join(record.snippet_file_name());
        write_snippet_csv(&path, &record.snippet)?;
        paths.push(path);
    }
    Ok(paths)
}

pub fn read_snippet_csv(path: &Path) -> Result<Vec<SnippetRow>> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening snippet {}", path.display()))?;
    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("reading row {} of {}", idx + 1, path.display()))?;
        let value = |col: usize| record.get(col).and_then(|v| v.parse::<f64>().ok());
        let (time, dilation, activity) = (value(0), value(1), value(2));
        rows.push(SnippetRow {
            time,
            dilation,
            activity,
            padding: time.is_none() && dilation.is_none() && activity.is_none(),
        });
    }
    Ok(rows)
}

/// A snippet read back from disk, identified by its file name.
#[derive(Debug, Clone, PartialEq)]
pub struct SnippetFile {
    pub key: EventKey,
    /// Name carried the `baseline` label.
    pub baseline: bool,
    pub rows: Vec<SnippetRow>,
}

impl SnippetFile {
    pub fn group(&self, grouping: &Grouping) -> ResponseGroup {
        let phase = if self.baseline { Phase::Pre } else { Phase::During };
        grouping.group(phase, self.key.condition)
    }
}

/// Load every recognisable snippet CSV in `dir`, sorted by file name.
pub fn read_snippet_dir(dir: &Path) -> Result<Vec<SnippetFile>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map(|ext| ext == "csv").unwrap_or(false))
        .collect();
    paths.sort();

    let mut snippets = Vec::new();
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(key) = EventKey::from_file_name(&name) else {
            warn!("ignoring {}: not an event snippet name", path.display());
            continue;
        };
        snippets.push(SnippetFile {
            key,
            baseline: name.contains("_baseline_index_"),
            rows: read_snippet_csv(&path)?,
        });
    }
    Ok(snippets)
}

/// Contents of `report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub units: usize,
    pub failed_units: usize,
    pub onsets: usize,
    pub records: usize,
    pub converged: usize,
    pub skipped_onsets: usize,
    /// Over all records, before any approval filtering.
    pub lag: Option<LagSummary>,
    pub lag_by_condition: BTreeMap<u32, LagSummary>,
    pub skipped: Vec<SkippedOnset>,
    pub failed: Vec<UnitFailure>,
}

impl BatchSummary {
    pub fn from_report(report: &BatchReport) -> Self {
        let rows: Vec<EventRow> = report.records.iter().map(EventRecord::to_row).collect();
        Self {
            units: report.units,
            failed_units: report.failed.len(),
            onsets: report.onsets,
            records: report.records.len(),
            converged: report.records.iter().filter(|r| r.converged).count(),
            skipped_onsets: report.skipped.len(),
            lag: aggregate_records(&report.records, |_| true).ok(),
            lag_by_condition: aggregate_by_condition(&rows, |_| true),
            skipped: report.skipped.clone(),
            failed: report.failed.clone(),
        }
    }
}

pub fn write_report(path: &Path, summary: &BatchSummary) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}

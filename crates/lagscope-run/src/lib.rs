use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use lagscope_lib::{
    io::{read_unit_csv, ColumnLayout},
    process_unit, DetectionConfig, EventRecord, LagError, PhaseBoundaries, PipelineConfig,
    ProfileSet, SkippedOnset, ThresholdProfile, UnitId, UnitOutcome, WindowConfig,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub mod output;
pub mod simulate;

pub use output::{
    read_events_csv, read_snippet_csv, read_snippet_dir, write_events_csv, write_report,
    write_snippet_csv, write_snippets, BatchSummary, SnippetFile,
};
pub use simulate::{simulate_unit, write_unit_csv, SimulationSpec};

/// One `[[profiles]]` table of a batch file.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ProfileEntry {
    pub condition: u32,
    pub primary_upper: f64,
    pub primary_lower: f64,
    pub secondary_upper: f64,
    pub secondary_lower: f64,
}

impl ProfileEntry {
    fn profile(&self) -> ThresholdProfile {
        ThresholdProfile {
            primary_upper: self.primary_upper,
            primary_lower: self.primary_lower,
            secondary_upper: self.secondary_upper,
            secondary_lower: self.secondary_lower,
        }
    }
}

/// Batch settings; every section is optional and falls back to the defaults.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct BatchConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub phases: PhaseBoundaries,
    #[serde(default)]
    pub window: WindowConfig,
    /// Named column layout (`standard` or `pupil-calcium`).
    #[serde(default)]
    pub layout: Option<String>,
    /// Explicit column names, taking precedence over `layout`.
    #[serde(default)]
    pub columns: Option<ColumnLayout>,
    /// Per-condition overrides on top of the built-in profiles.
    #[serde(default)]
    pub profiles: Vec<ProfileEntry>,
}

impl BatchConfig {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            detection: self.detection,
            phases: self.phases,
            window: self.window,
        }
    }

    pub fn profile_set(&self) -> Result<ProfileSet, LagError> {
        let mut profiles = ProfileSet::default();
        for entry in &self.profiles {
            profiles.insert(entry.condition, entry.profile())?;
        }
        Ok(profiles)
    }

    pub fn column_layout(&self) -> Result<ColumnLayout> {
        if let Some(columns) = &self.columns {
            return Ok(columns.clone());
        }
        match &self.layout {
            Some(name) => name.parse(),
            None => Ok(ColumnLayout::standard()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.profile_set()?;
        self.column_layout()?;
        if self.phases.stim_start >= self.phases.stim_end {
            return Err(LagError::Configuration(format!(
                "stimulation window [{}, {}] is empty",
                self.phases.stim_start, self.phases.stim_end
            ))
            .into());
        }
        if self.window.after == 0 || self.window.lag_tolerance < 0.0 {
            return Err(LagError::Configuration(
                "window needs after > 0 and a non-negative lag tolerance".into(),
            )
            .into());
        }
        Ok(())
    }
}

pub fn read_config(path: &Path) -> Result<BatchConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: BatchConfig =
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(config)
}

/// A unit to process and where its table lives.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UnitSpec {
    pub day: String,
    pub trial: u32,
    pub condition: u32,
    pub path: PathBuf,
}

impl UnitSpec {
    pub fn id(&self) -> UnitId {
        UnitId::new(self.day.clone(), self.trial, self.condition)
    }
}

/// Read a `day,trial,condition,path` manifest; relative paths resolve against
/// the manifest's directory.
pub fn read_units(path: &Path) -> Result<Vec<UnitSpec>> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening manifest {}", path.display()))?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut units = Vec::new();
    for (idx, row) in reader.deserialize::<UnitSpec>().enumerate() {
        let mut unit = row.with_context(|| format!("parsing manifest row {}", idx + 1))?;
        if unit.path.is_relative() {
            unit.path = base.join(&unit.path);
        }
        units.push(unit);
    }
    Ok(units)
}

/// Find `<root>/<day>/trial_<t>/stimcondition_<c>/<file_name>` tables.
pub fn discover_units(root: &Path, file_name: &str) -> Result<Vec<UnitSpec>> {
    let mut units = Vec::new();
    for day in sorted_dirs(root)? {
        let day_name = dir_name(&day);
        for trial_dir in sorted_dirs(&day)? {
            let Some(trial) = numbered(&dir_name(&trial_dir), "trial_") else {
                continue;
            };
            for condition_dir in sorted_dirs(&trial_dir)? {
                let Some(condition) = numbered(&dir_name(&condition_dir), "stimcondition_")
                else {
                    continue;
                };
                let path = condition_dir.join(file_name);
                if path.is_file() {
                    units.push(UnitSpec {
                        day: day_name.clone(),
                        trial,
                        condition,
                        path,
                    });
                }
            }
        }
    }
    Ok(units)
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("listing {}", dir.display()))?
            .path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn numbered(name: &str, prefix: &str) -> Option<u32> {
    name.strip_prefix(prefix)?.parse().ok()
}

/// A unit that produced no records at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitFailure {
    pub unit: UnitId,
    pub path: PathBuf,
    pub kind: String,
    pub reason: String,
}

/// Accumulated outcome of a batch, in manifest order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    pub units: usize,
    pub onsets: usize,
    pub records: Vec<EventRecord>,
    pub skipped: Vec<SkippedOnset>,
    pub failed: Vec<UnitFailure>,
}

impl BatchReport {
    fn absorb(&mut self, result: std::result::Result<UnitOutcome, UnitFailure>) {
        self.units += 1;
        match result {
            Ok(outcome) => {
                self.onsets += outcome.onsets.len();
                self.records.extend(outcome.records);
                self.skipped.extend(outcome.skipped);
            }
            Err(failure) => self.failed.push(failure),
        }
    }
}

/// Load and process a single unit, turning any error into a [`UnitFailure`].
pub fn run_unit(
    spec: &UnitSpec,
    profiles: &ProfileSet,
    pipeline: &PipelineConfig,
    layout: &ColumnLayout,
) -> std::result::Result<UnitOutcome, UnitFailure> {
    let unit = spec.id();
    let result = read_unit_csv(&spec.path, layout)
        .and_then(|pair| Ok(process_unit(&unit, &pair, profiles, pipeline)?));
    result.map_err(|err| {
        let kind = err
            .downcast_ref::<LagError>()
            .map(LagError::kind)
            .unwrap_or("io");
        warn!("unit {} ({}) failed: {:#}", unit, spec.path.display(), err);
        UnitFailure {
            unit,
            path: spec.path.clone(),
            kind: kind.to_string(),
            reason: format!("{:#}", err),
        }
    })
}

/// Process every unit; a failing unit is reported and the batch continues.
///
/// Only an invalid configuration aborts the whole batch.
pub fn run_batch(units: &[UnitSpec], config: &BatchConfig) -> Result<BatchReport> {
    let profiles = config.profile_set()?;
    let layout = config.column_layout()?;
    let pipeline = config.pipeline();

    #[cfg(feature = "parallel")]
    let results: Vec<_> = {
        use rayon::prelude::*;
        units
            .par_iter()
            .map(|spec| run_unit(spec, &profiles, &pipeline, &layout))
            .collect()
    };
    #[cfg(not(feature = "parallel"))]
    let results: Vec<_> = units
        .iter()
        .map(|spec| run_unit(spec, &profiles, &pipeline, &layout))
        .collect();

    let mut report = BatchReport::default();
    for result in results {
        report.absorb(result);
    }
    info!(
        "batch done: {} units ({} failed), {} records, {} skipped onsets",
        report.units,
        report.failed.len(),
        report.records.len(),
        report.skipped.len()
    );
    Ok(report)
}

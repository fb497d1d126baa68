use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lagscope_lib::{
    average_correlations, average_snippets, calibrate, calibrate_profile, detect_onsets,
    io::{read_unit_csv, ColumnLayout},
    metrics::{aggregate, aggregate_by_condition, ApprovalList, Grouping},
    process_unit, segment_correlations, CorrelationSegment, EventRow, SeriesPair,
    ThresholdCalibration, UnitId,
};
use lagscope_run::{
    discover_units, read_config, read_events_csv, read_snippet_dir, read_units, run_batch,
    simulate_unit, write_events_csv, write_report, write_snippets, write_unit_csv,
    BatchConfig, BatchSummary, ProfileEntry, SimulationSpec, UnitSpec,
};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "lagscope",
    version,
    about = "Lag between pupil dilation events and neural activity peaks"
)]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flag dilation events in one unit and print the onsets
    Detect {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 1)]
        condition: u32,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        layout: Option<String>,
    },
    /// Detect and align every onset of one unit
    Align {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "d000")]
        day: String,
        #[arg(long, default_value_t = 1)]
        trial: u32,
        #[arg(long, default_value_t = 1)]
        condition: u32,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        layout: Option<String>,
        /// Also write the padded snippets here
        #[arg(long)]
        snippets: Option<PathBuf>,
    },
    /// Process a batch of units into events.csv, snippets/ and report.json
    Run {
        /// CSV with day,trial,condition,path columns
        #[arg(long, conflicts_with = "root")]
        manifest: Option<PathBuf>,
        /// Directory laid out as <day>/trial_<t>/stimcondition_<c>/<file-name>
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long, default_value = "bindist_2000.csv")]
        file_name: String,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Mean and population std of approved lags from an events table
    Summarize {
        #[arg(long)]
        events: PathBuf,
        /// Approval directory or list file; every row counts when omitted
        #[arg(long)]
        approved: Option<PathBuf>,
        #[arg(long)]
        by_condition: bool,
    },
    /// Derive threshold bands from pooled dilation derivatives
    Calibrate {
        #[arg(long, required_unless_present = "manifest")]
        input: Vec<PathBuf>,
        /// Calibrate one profile per condition of the manifest
        #[arg(long)]
        manifest: Option<PathBuf>,
        #[arg(long, default_value_t = 4.0)]
        primary_sigma: f64,
        #[arg(long, default_value_t = 2.0)]
        secondary_sigma: f64,
        #[arg(long)]
        layout: Option<String>,
        /// Print `[[profiles]]` tables instead of JSON
        #[arg(long)]
        toml: bool,
    },
    /// Average snippet traces per baseline / stimulation group
    Average {
        #[arg(long)]
        snippets: PathBuf,
        #[arg(long, default_value_t = 5, conflicts_with = "no_control")]
        control_condition: u32,
        /// Do not pool any condition into baseline
        #[arg(long)]
        no_control: bool,
    },
    /// Segment-wise cross-correlation lag between dilation and activity
    Xcorr {
        #[arg(long, required = true)]
        input: Vec<PathBuf>,
        #[arg(long)]
        layout: Option<String>,
        /// Include the full correlation arrays
        #[arg(long)]
        full: bool,
    },
    /// Write a synthetic unit table
    Simulate {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, value_delimiter = ',', default_values_t = [150usize, 420, 750])]
        onsets: Vec<usize>,
        #[arg(long, default_value_t = 1.0)]
        lag: f64,
        #[arg(long, default_value_t = 1200)]
        samples: usize,
        #[arg(long)]
        layout: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();
    match cli.command {
        Commands::Detect {
            input,
            condition,
            config,
            layout,
        } => cmd_detect(&input, condition, config.as_deref(), layout.as_deref())?,
        Commands::Align {
            input,
            day,
            trial,
            condition,
            config,
            layout,
            snippets,
        } => cmd_align(
            &input,
            UnitId::new(day, trial, condition),
            config.as_deref(),
            layout.as_deref(),
            snippets.as_deref(),
        )?,
        Commands::Run {
            manifest,
            root,
            file_name,
            config,
            out,
        } => cmd_run(
            manifest.as_deref(),
            root.as_deref(),
            &file_name,
            config.as_deref(),
            &out,
        )?,
        Commands::Summarize {
            events,
            approved,
            by_condition,
        } => cmd_summarize(&events, approved.as_deref(), by_condition)?,
        Commands::Calibrate {
            input,
            manifest,
            primary_sigma,
            secondary_sigma,
            layout,
            toml,
        } => cmd_calibrate(
            &input,
            manifest.as_deref(),
            primary_sigma,
            secondary_sigma,
            layout.as_deref(),
            toml,
        )?,
        Commands::Average {
            snippets,
            control_condition,
            no_control,
        } => {
            let grouping = Grouping {
                control_condition: (!no_control).then_some(control_condition),
            };
            cmd_average(&snippets, &grouping)?
        }
        Commands::Xcorr {
            input,
            layout,
            full,
        } => cmd_xcorr(&input, layout.as_deref(), full)?,
        Commands::Simulate {
            out,
            seed,
            onsets,
            lag,
            samples,
            layout,
        } => {
            let spec = SimulationSpec {
                onsets,
                lag,
                samples,
                ..SimulationSpec::default()
            };
            cmd_simulate(&out, &spec, seed, layout.as_deref())?
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<BatchConfig> {
    match path {
        Some(path) => read_config(path),
        None => Ok(BatchConfig::default()),
    }
}

/// `--layout` wins over the config file's layout.
fn resolve_layout(config: &BatchConfig, layout: Option<&str>) -> Result<ColumnLayout> {
    match layout {
        Some(name) => name.parse(),
        None => config.column_layout(),
    }
}

fn load_unit(path: &Path, layout: &ColumnLayout) -> Result<SeriesPair> {
    #[cfg(feature = "polars")]
    {
        lagscope_lib::io::csv::polars_io::load_unit(path, layout)
    }
    #[cfg(not(feature = "polars"))]
    {
        read_unit_csv(path, layout)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn cmd_detect(
    input: &Path,
    condition: u32,
    config: Option<&Path>,
    layout: Option<&str>,
) -> Result<()> {
    let config = load_config(config)?;
    let layout = resolve_layout(&config, layout)?;
    let pair = load_unit(input, &layout)?;
    let profiles = config.profile_set()?;
    let (flags, onsets) = detect_onsets(&pair, profiles.get(condition)?, &config.pipeline())?;
    print_json(&serde_json::json!({
        "samples": flags.len(),
        "flagged": flags.count(),
        "onsets": onsets,
    }))
}

fn cmd_align(
    input: &Path,
    unit: UnitId,
    config: Option<&Path>,
    layout: Option<&str>,
    snippets: Option<&Path>,
) -> Result<()> {
    let config = load_config(config)?;
    let layout = resolve_layout(&config, layout)?;
    let pair = load_unit(input, &layout)?;
    let outcome = process_unit(&unit, &pair, &config.profile_set()?, &config.pipeline())?;
    if let Some(dir) = snippets {
        let written = write_snippets(dir, &outcome.records)?;
        info!("wrote {} snippets to {}", written.len(), dir.display());
    }
    let rows: Vec<EventRow> = outcome.records.iter().map(|r| r.to_row()).collect();
    print_json(&serde_json::json!({
        "unit": unit.to_string(),
        "onsets": outcome.onsets.len(),
        "events": rows,
        "skipped": outcome.skipped,
    }))
}

fn cmd_run(
    manifest: Option<&Path>,
    root: Option<&Path>,
    file_name: &str,
    config: Option<&Path>,
    out: &Path,
) -> Result<()> {
    let config = load_config(config)?;
    let units: Vec<UnitSpec> = match (manifest, root) {
        (Some(manifest), _) => read_units(manifest)?,
        (None, Some(root)) => discover_units(root, file_name)?,
        (None, None) => bail!("either --manifest or --root is required"),
    };
    if units.is_empty() {
        warn!("no units to process");
    }
    let report = run_batch(&units, &config)?;

    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let rows: Vec<EventRow> = report.records.iter().map(|r| r.to_row()).collect();
    write_events_csv(&out.join("events.csv"), &rows)?;
    write_snippets(&out.join("snippets"), &report.records)?;
    let summary = BatchSummary::from_report(&report);
    write_report(&out.join("report.json"), &summary)?;
    print_json(&serde_json::json!({
        "units": summary.units,
        "failed_units": summary.failed_units,
        "records": summary.records,
        "skipped_onsets": summary.skipped_onsets,
        "out": out.display().to_string(),
    }))
}

fn cmd_summarize(events: &Path, approved: Option<&Path>, by_condition: bool) -> Result<()> {
    let rows = read_events_csv(events)?;
    let approvals = approved.map(ApprovalList::load).transpose()?;
    if let Some(list) = &approvals {
        info!("{} approved events", list.len());
    }
    let is_approved = |key: &lagscope_lib::EventKey| {
        approvals
            .as_ref()
            .map(|list| list.contains(key))
            .unwrap_or(true)
    };
    if by_condition {
        return print_json(&aggregate_by_condition(&rows, is_approved));
    }
    let summary = aggregate(&rows, is_approved)?;
    print_json(&summary)
}

#[derive(Serialize)]
struct CalibrationOutput {
    condition: Option<u32>,
    samples: usize,
    primary: ThresholdCalibration,
    secondary: ThresholdCalibration,
    profile: Option<ProfileEntry>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ProfileTables {
    profiles: Vec<ProfileEntry>,
}

fn cmd_calibrate(
    inputs: &[PathBuf],
    manifest: Option<&Path>,
    primary_sigma: f64,
    secondary_sigma: f64,
    layout: Option<&str>,
    as_toml: bool,
) -> Result<()> {
    let layout = match layout {
        Some(name) => name.parse()?,
        None => ColumnLayout::standard(),
    };
    // condition -> pooled derivatives
    let mut pools: BTreeMap<Option<u32>, Vec<f64>> = BTreeMap::new();
    if let Some(manifest) = manifest {
        for unit in read_units(manifest)? {
            let pair = load_unit(&unit.path, &layout)?;
            pools
                .entry(Some(unit.condition))
                .or_default()
                .extend(pair.dilation_gradient()?);
        }
    }
    for input in inputs {
        let pair = load_unit(input, &layout)?;
        pools.entry(None).or_default().extend(pair.dilation_gradient()?);
    }

    let mut outputs = Vec::new();
    for (condition, derivatives) in pools {
        let primary = calibrate(&derivatives, primary_sigma)?;
        let secondary = calibrate(&derivatives, secondary_sigma)?;
        let (profile, error) = match calibrate_profile(&derivatives, primary_sigma, secondary_sigma)
        {
            Ok(profile) => (
                Some(ProfileEntry {
                    condition: condition.unwrap_or(0),
                    primary_upper: profile.primary_upper,
                    primary_lower: profile.primary_lower,
                    secondary_upper: profile.secondary_upper,
                    secondary_lower: profile.secondary_lower,
                }),
                None,
            ),
            Err(err) => {
                warn!("condition {:?}: {}", condition, err);
                (None, Some(err.to_string()))
            }
        };
        outputs.push(CalibrationOutput {
            condition,
            samples: derivatives.len(),
            primary,
            secondary,
            profile,
            error,
        });
    }

    if as_toml {
        let tables = ProfileTables {
            profiles: outputs.iter().filter_map(|o| o.profile).collect(),
        };
        print!("{}", toml::to_string(&tables)?);
        return Ok(());
    }
    for output in &outputs {
        print_json(output)?;
    }
    Ok(())
}

fn cmd_average(dir: &Path, grouping: &Grouping) -> Result<()> {
    let files = read_snippet_dir(dir)?;
    if files.is_empty() {
        bail!("no event snippets found in {}", dir.display());
    }
    let averaged = average_snippets(
        files
            .iter()
            .map(|file| (file.group(grouping), file.rows.as_slice())),
    );
    for response in &averaged {
        print_json(&serde_json::json!({
            "group": response.group.to_string(),
            "events": response.events,
            "rows": response.rows,
        }))?;
    }
    Ok(())
}

fn cmd_xcorr(inputs: &[PathBuf], layout: Option<&str>, full: bool) -> Result<()> {
    let layout = match layout {
        Some(name) => name.parse()?,
        None => ColumnLayout::standard(),
    };
    let segments = CorrelationSegment::defaults();
    let mut per_segment: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for input in inputs {
        let pair = load_unit(input, &layout)?;
        for result in segment_correlations(&pair, &segments)? {
            per_segment
                .entry(result.segment.name.clone())
                .or_default()
                .push(result);
        }
    }

    for segment in &segments {
        let Some(results) = per_segment.get(&segment.name) else {
            warn!("segment {} fits none of the inputs", segment.name);
            continue;
        };
        let correlations: Vec<_> = results.iter().map(|r| &r.correlation).collect();
        let mean = average_correlations(&correlations)?;
        let peak = mean.peak();
        let mut value = serde_json::json!({
            "segment": segment.name,
            "start": segment.start,
            "end": segment.end,
            "units": results.len(),
            "peak_lag": peak.map(|(lag, _)| lag),
            "peak_value": peak.map(|(_, value)| value),
            "unit_peak_lags": results.iter().map(|r| r.peak_lag).collect::<Vec<_>>(),
        });
        if full {
            value["correlation"] = serde_json::to_value(&mean)?;
        }
        print_json(&value)?;
    }
    Ok(())
}

fn cmd_simulate(out: &Path, spec: &SimulationSpec, seed: u64, layout: Option<&str>) -> Result<()> {
    let layout = match layout {
        Some(name) => name.parse()?,
        None => ColumnLayout::standard(),
    };
    let pair = simulate_unit(spec, seed)?;
    write_unit_csv(out, &pair, &layout)?;
    print_json(&serde_json::json!({
        "out": out.display().to_string(),
        "samples": pair.len(),
        "onsets": spec.onsets,
        "lag": spec.lag,
    }))
}

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn calibrate_reports_missing_negative_band() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("lagscope");
    cmd.args([
        "calibrate",
        "--input",
        &sample_path("test_data/d001_trial_1_stimcondition_1.csv"),
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let json: Value = serde_json::from_slice(&output)?;
    assert_eq!(json["samples"], 1200);
    assert_eq!(json["primary"]["sigma"], 4.0);
    assert!(json["primary"]["lowest_positive"].as_f64().is_some());
    assert!(json["primary"]["largest_negative"].is_null());
    // dilations only decay slowly, so no negative derivative is extreme enough
    assert!(json["profile"].is_null());
    assert!(json["error"]
        .as_str()
        .map(|e| e.contains("negative"))
        .unwrap_or(false));
    Ok(())
}

#[test]
fn xcorr_covers_default_segments() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("lagscope");
    cmd.args([
        "xcorr",
        "--input",
        &sample_path("test_data/pupil_calcium_unit.csv"),
        "--layout",
        "pupil-calcium",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let segments: Vec<Value> = output
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(serde_json::from_slice)
        .collect::<Result<_, _>>()?;
    let names: Vec<&str> = segments.iter().filter_map(|s| s["segment"].as_str()).collect();
    assert_eq!(names, vec!["pre", "stim", "post-stim", "post", "overall"]);
    assert!(segments.iter().all(|s| s["peak_lag"].is_i64()));
    assert!(segments.iter().all(|s| s.get("correlation").is_none()));
    Ok(())
}

#[test]
fn simulate_then_detect() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let unit = temp.path().join("sim.csv");
    cargo_bin_cmd!("lagscope")
        .args([
            "simulate",
            "--out",
            unit.to_str().expect("utf-8 path"),
            "--seed",
            "7",
            "--onsets",
            "100,500",
        ])
        .assert()
        .success();
    let text = fs::read_to_string(&unit)?;
    assert!(text.starts_with("time,dilation_value,activity_value\n"));
    assert_eq!(text.lines().count(), 1201);

    let mut cmd = cargo_bin_cmd!("lagscope");
    cmd.args(["detect", "--input", unit.to_str().expect("utf-8 path")]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let json: Value = serde_json::from_slice(&output)?;
    assert_eq!(json["onsets"].as_array().map(Vec::len), Some(2));
    Ok(())
}

fn sample_path(relative: &str) -> String {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .join(relative);
    root.to_string_lossy().to_string()
}

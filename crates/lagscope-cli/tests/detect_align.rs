use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::error::Error;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn detect_reports_phased_onsets() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("lagscope");
    cmd.args([
        "detect",
        "--input",
        &sample_path("test_data/d001_trial_1_stimcondition_1.csv"),
        "--condition",
        "1",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let json: Value = serde_json::from_slice(&output)?;
    assert_eq!(json["samples"], 1200);
    let onsets = json["onsets"].as_array().expect("onsets array");
    let indices: Vec<u64> = onsets.iter().filter_map(|o| o["index"].as_u64()).collect();
    assert_eq!(indices, vec![147, 417, 746]);
    let phases: Vec<&str> = onsets.iter().filter_map(|o| o["phase"].as_str()).collect();
    assert_eq!(phases, vec!["pre", "during", "post"]);
    Ok(())
}

#[test]
fn align_processes_stim_onset_first() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let snippets = temp.path().join("snippets");
    let mut cmd = cargo_bin_cmd!("lagscope");
    cmd.args([
        "align",
        "--input",
        &sample_path("test_data/d001_trial_1_stimcondition_1.csv"),
        "--day",
        "d001",
        "--trial",
        "1",
        "--condition",
        "1",
        "--snippets",
        snippets.to_str().expect("utf-8 path"),
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let json: Value = serde_json::from_slice(&output)?;
    assert_eq!(json["unit"], "d001_trial_1_stimcondition_1");
    let events = json["events"].as_array().expect("events array");
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["index"], 417);
    assert_eq!(events[0]["phase"], "during");
    for event in events {
        let lag = event["lag"].as_f64().expect("numeric lag");
        assert!((lag - 1.0).abs() < 0.2, "lag {}", lag);
        assert_eq!(event["converged"], true);
    }
    assert!(snippets
        .join("d001_trial_1_stimcondition_1_stim_index_417.csv")
        .exists());
    assert!(snippets
        .join("d001_trial_1_stimcondition_1_baseline_index_746.csv")
        .exists());
    Ok(())
}

#[test]
fn unknown_condition_fails() {
    let mut cmd = cargo_bin_cmd!("lagscope");
    cmd.args([
        "detect",
        "--input",
        &sample_path("test_data/d001_trial_1_stimcondition_1.csv"),
        "--condition",
        "12",
    ]);
    cmd.assert().failure();
}

fn sample_path(relative: &str) -> String {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .join(relative);
    root.to_string_lossy().to_string()
}

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn run_writes_events_snippets_and_report() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let out = temp.path().join("batch");
    let mut cmd = cargo_bin_cmd!("lagscope");
    cmd.args([
        "run",
        "--manifest",
        &sample_path("test_data/units.csv"),
        "--config",
        &sample_path("test_data/batch.toml"),
        "--out",
        out.to_str().expect("utf-8 path"),
    ]);
    let stdout = cmd.assert().success().get_output().stdout.clone();
    let printed: Value = serde_json::from_slice(&stdout)?;
    assert_eq!(printed["units"], 3);
    assert_eq!(printed["failed_units"], 1);
    assert_eq!(printed["records"], 6);

    let events = fs::read_to_string(out.join("events.csv"))?;
    let mut lines = events.lines();
    assert_eq!(
        lines.next(),
        Some("day,trial,condition,index,phase,lag,shrink_steps,converged")
    );
    let first: Vec<&str> = lines.next().expect("first event").split(',').collect();
    assert_eq!(&first[..5], &["d001", "1", "1", "417", "during"]);
    assert_eq!(events.lines().count(), 7);

    let snippet_count = fs::read_dir(out.join("snippets"))?.count();
    assert_eq!(snippet_count, 6);
    let snippet = fs::read_to_string(
        out.join("snippets")
            .join("d001_trial_2_stimcondition_3_stim_index_477.csv"),
    )?;
    assert_eq!(snippet.lines().count(), 201);

    let report: Value = serde_json::from_str(&fs::read_to_string(out.join("report.json"))?)?;
    assert_eq!(report["failed"][0]["unit"]["trial"], 3);
    assert_eq!(report["failed"][0]["kind"], "io");
    assert_eq!(report["skipped_onsets"], 0);
    Ok(())
}

#[test]
fn average_groups_batch_snippets() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let out = temp.path().join("batch");
    cargo_bin_cmd!("lagscope")
        .args([
            "run",
            "--manifest",
            &sample_path("test_data/units.csv"),
            "--out",
            out.to_str().expect("utf-8 path"),
        ])
        .assert()
        .success();

    let mut cmd = cargo_bin_cmd!("lagscope");
    cmd.args([
        "average",
        "--snippets",
        out.join("snippets").to_str().expect("utf-8 path"),
    ]);
    let stdout = cmd.assert().success().get_output().stdout.clone();
    let groups: Vec<Value> = stdout
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(serde_json::from_slice)
        .collect::<Result<_, _>>()?;
    let labels: Vec<&str> = groups.iter().filter_map(|g| g["group"].as_str()).collect();
    assert_eq!(labels, vec!["baseline", "stimcondition_1", "stimcondition_3"]);
    assert_eq!(groups[0]["events"], 4);
    assert_eq!(groups[0]["rows"].as_array().map(Vec::len), Some(200));
    Ok(())
}

#[test]
fn run_needs_an_input_source() {
    let temp = tempdir().unwrap();
    cargo_bin_cmd!("lagscope")
        .args(["run", "--out", temp.path().to_str().unwrap()])
        .assert()
        .failure();
}

fn sample_path(relative: &str) -> String {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .join(relative);
    root.to_string_lossy().to_string()
}

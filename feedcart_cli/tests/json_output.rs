use assert_cmd::prelude::*;
use serde_json::Value;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn run_json(args: &[&str]) -> (i32, Vec<Value>) {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(
        &cfg,
        "[wireless]\nenabled = false\n[simulation]\nnoise_kg = 0.0\ninitial_load_kg = 12.5\n",
    )
    .unwrap();

    let out = Command::cargo_bin("feedcart")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .args(["--json", "--simulate", "--log-level", "error"])
        .args(args)
        .output()
        .unwrap();
    let stdout = String::from_utf8(out.stdout).unwrap();
    let lines = stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str::<Value>(l).unwrap_or_else(|e| panic!("{e}: {l}")))
        .collect();
    (out.status.code().unwrap_or(-1), lines)
}

#[test]
fn status_snapshot_schema() {
    let (code, lines) = run_json(&["status"]);
    assert_eq!(code, 0);
    assert_eq!(lines.len(), 1);
    let s = &lines[0];
    for key in [
        "current_weight",
        "is_simulation",
        "hardware_available",
        "interface",
        "last_update",
        "error_count",
        "last_error",
        "observers_count",
        "update_seq",
        "last_writer",
        "link_state",
        "node_address",
    ] {
        assert!(s.get(key).is_some(), "missing {key} in {s}");
    }
    assert_eq!(s["is_simulation"], true);
    assert_eq!(s["interface"], "simulation");
    assert_eq!(s["hardware_available"], false);
    assert!(s["link_state"].is_null());
}

#[test]
fn read_reports_weight_and_interface() {
    let (code, lines) = run_json(&["read", "--count", "2", "--interval-ms", "1"]);
    assert_eq!(code, 0);
    assert_eq!(lines.len(), 2);
    for l in &lines {
        assert_eq!(l["weight_kg"].as_f64(), Some(12.5));
        assert_eq!(l["interface"], "simulation");
        assert_eq!(l["is_simulation"], true);
    }
}

#[test]
fn cells_split_the_load() {
    let (code, lines) = run_json(&["cells"]);
    assert_eq!(code, 0);
    let cells = lines[0]["cells_kg"].as_array().unwrap();
    assert_eq!(cells.len(), 4);
    let total: f64 = cells.iter().filter_map(Value::as_f64).sum();
    assert!((total - 12.5).abs() < 1e-9, "got {total}");
}

#[test]
fn failure_is_a_structured_error_object() {
    let (code, lines) = run_json(&["calibrate", "--known-kg", "-1"]);
    assert_eq!(code, 4);
    let err = lines.last().unwrap();
    assert_eq!(err["reason"], "CalibrationFailed");
    assert_eq!(err["code"], 4);
    assert!(err["message"].as_str().unwrap().contains("What happened"));
}

#[test]
fn tare_reports_ok() {
    let (code, lines) = run_json(&["tare"]);
    assert_eq!(code, 0);
    assert_eq!(lines[0]["tare"], "ok");
}

#[test]
fn watch_emits_numbered_updates() {
    let (code, lines) = run_json(&["watch", "--interval-ms", "1", "--max-updates", "2"]);
    assert_eq!(code, 0);
    let updates: Vec<&Value> = lines.iter().filter(|l| l.get("update").is_some()).collect();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0]["update"], 1);
    assert_eq!(updates[1]["update"], 2);
    assert_eq!(updates[0]["weight_kg"].as_f64(), Some(12.5));
}

use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{TempDir, tempdir};

const T0: u64 = 1_700_000_000_000;
const QUARTER_HOUR_MS: u64 = 900_000;

// Partial config: every missing section falls back to its defaults
fn write_valid_config(dir: &TempDir) -> PathBuf {
    let toml = r#"
[control]
hysteresis = 0.5
tick_seconds = 60

[safety]
min_cycle_seconds = 300

[logging]
level = "warn"
"#;
    let path = dir.path().join("ferment.toml");
    fs::write(&path, toml).unwrap();
    path
}

// A falling gravity curve, one reading every 15 minutes; `None` leaves the
// gravity cell empty
fn write_history(dir: &TempDir, name: &str, rows: &[(u64, Option<f64>, f64)]) -> PathBuf {
    let path = dir.path().join(name);
    let mut f = fs::File::create(&path).unwrap();
    writeln!(f, "timestamp_ms,gravity,temperature").unwrap();
    for (ts, g, t) in rows {
        match g {
            Some(g) => writeln!(f, "{ts},{g:.4},{t:.1}").unwrap(),
            None => writeln!(f, "{ts},,{t:.1}").unwrap(),
        }
    }
    path
}

fn curve(n: usize) -> Vec<(u64, Option<f64>, f64)> {
    (0..n)
        .map(|i| {
            let hours = i as f64 / 4.0;
            let g = 1.012 + 0.048 * (-0.03 * hours).exp();
            (T0 + i as u64 * QUARTER_HOUR_MS, Some(g), 19.5)
        })
        .collect()
}

fn ferment(cfg: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ferment").unwrap();
    cmd.arg("--config").arg(cfg);
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["check-config"], 0, "config OK", "stdout")]
#[case(&["replay"], 2, "required", "stderr")]
#[case(&["simulate", "--hours", "0"], 1, "invalid --hours", "stderr")]
fn cli_table_cases(#[case] args: &[&str], #[case] exit_code: i32, #[case] needle: &str, #[case] stream: &str) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let assert = ferment(&cfg).args(args).assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
#[case("[control]\nhysteresis = -1.0\n", "control.hysteresis")]
#[case("[predictor]\nmin_quality = 1.5\n", "predictor.min_quality")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation")]
fn invalid_config_exits_with_config_code(#[case] toml: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, toml).unwrap();

    ferment(&path)
        .arg("check-config")
        .assert()
        .code(3)
        .stderr(predicate::str::contains(needle));
}

#[test]
fn malformed_toml_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[control\nhysteresis = ").unwrap();

    ferment(&path)
        .arg("check-config")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("could not be loaded"));
}

#[test]
fn replay_json_ends_with_a_summary() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let mut rows = curve(40);
    // One incomplete row and one that goes back in time
    rows.push((T0 + 41 * QUARTER_HOUR_MS, None, 19.5));
    rows.push((T0, Some(1.050), 19.5));
    let csv = write_history(&dir, "history.csv", &rows);

    let out = ferment(&cfg)
        .arg("--json")
        .arg("replay")
        .arg(&csv)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8(out.stdout).unwrap();
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).expect("every stdout line is JSON"))
        .collect();
    assert_eq!(lines.len(), 41, "40 readings plus a summary");
    assert!(lines[..40].iter().all(|v| v["type"] == "reading"));

    let summary = lines.last().unwrap();
    assert_eq!(summary["type"], "summary");
    assert_eq!(summary["accepted"], 40);
    assert_eq!(summary["rejected"], 1);
    assert_eq!(summary["incomplete"], 1);
    assert!(summary["prediction"].is_object());
}

#[test]
fn hydrate_reports_counts() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let mut rows = curve(10);
    rows.push((T0 + 10 * QUARTER_HOUR_MS, None, 19.5));
    rows.push((T0 + 11 * QUARTER_HOUR_MS, None, 19.5));
    let csv = write_history(&dir, "history.csv", &rows);

    ferment(&cfg)
        .arg("hydrate")
        .arg(&csv)
        .arg("--device")
        .arg("fv1")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "hydrated fv1: attempted 12, loaded 10, skipped 2, truncated 0",
        ));
}

#[test]
fn hydrate_honours_max_samples() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let csv = write_history(&dir, "history.csv", &curve(30));

    let out = ferment(&cfg)
        .args(["--json", "hydrate"])
        .arg(&csv)
        .args(["--max-samples", "12"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["type"], "hydration");
    assert_eq!(v["loaded"], 12);
    assert_eq!(v["truncated"], 18);
    assert_eq!(v["last_update_ms"], T0 + 29 * QUARTER_HOUR_MS);
}

#[rstest]
#[case(false, "Hydration failed")]
#[case(true, "\"reason\":\"Hydration\"")]
fn hydrate_without_usable_rows_fails(#[case] json: bool, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let rows: Vec<_> = (0..5u64).map(|i| (T0 + i * QUARTER_HOUR_MS, None, 19.5)).collect();
    let csv = write_history(&dir, "junk.csv", &rows);

    let mut cmd = ferment(&cfg);
    if json {
        cmd.arg("--json");
    }
    cmd.arg("hydrate")
        .arg(&csv)
        .assert()
        .code(5)
        .stderr(predicate::str::contains(needle));
}

#[test]
fn bad_history_header_is_explained() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let path = dir.path().join("bad.csv");
    let mut f = fs::File::create(&path).unwrap();
    writeln!(f, "time,sg,temp").unwrap();
    writeln!(f, "{T0},1.050,19.5").unwrap();

    ferment(&cfg)
        .arg("replay")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers"));
}

#[test]
fn simulate_holds_the_target() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = ferment(&cfg)
        .args(["--json", "simulate", "--hours", "6", "--relearn-hours", "0"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["type"], "simulation");
    assert_eq!(v["ticks"], 360);
    assert_eq!(v["interrupted"], false);
    let final_temp = v["final_temp"].as_f64().unwrap();
    assert!((final_temp - 20.0).abs() < 1.5, "final temperature {final_temp}");
    assert!(v["heater_switches"].as_u64().unwrap() >= 1);
}

#[test]
fn simulate_recovers_from_injected_faults() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = ferment(&cfg)
        .args(["--json", "simulate", "--hours", "2", "--inject-faults", "2"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(v["failures"].as_u64().unwrap() >= 2);
    assert!(v["heater_switches"].as_u64().unwrap() >= 1, "heater never came on: {v}");
}

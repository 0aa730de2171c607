use ferment_config::{load_file, load_toml};
use rstest::rstest;
use std::io::Write;

#[rstest]
#[case("[control]\ntick_seconds = 0\n", "control.tick_seconds must be >= 1")]
#[case("[control]\nhysteresis = -0.1\n", "control.hysteresis must be >= 0")]
#[case("[control]\ndivergence_ticks = 0\n", "control.divergence_ticks must be >= 1")]
#[case(
    "[control]\nhorizon_minutes = 0.5\ntick_seconds = 60\n",
    "control.horizon_minutes must cover at least one tick"
)]
#[case("[predictor]\nmin_samples = 2\n", "predictor.min_samples must be >= 3")]
#[case("[predictor]\nmin_quality = 1.5\n", "predictor.min_quality must be in [0.0, 1.0]")]
#[case("[history]\nmax_samples = 5\n", "history.max_samples must be >= predictor.min_samples")]
#[case(
    "[anomaly]\nrapid_rate_per_hour = 0.0001\n",
    "anomaly.rapid_rate_per_hour must exceed"
)]
#[case(
    "[anomaly]\nstuck_hours = 30.0\n",
    "anomaly.window_hours must be >= anomaly.stuck_hours"
)]
#[case("[thermal]\nmin_coverage = 2.0\n", "thermal.min_coverage must be in [0.0, 1.0]")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation must be one of")]
fn rejects_invalid_values(#[case] toml: &str, #[case] expected: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(expected),
        "unexpected message: {err}"
    );
}

#[rstest]
#[case("anomaly", "stuck_rate_per_hour", "nan")]
#[case("anomaly", "stuck_hours", "nan")]
#[case("anomaly", "rapid_rate_per_hour", "nan")]
#[case("anomaly", "sensor_fault_drop", "nan")]
#[case("anomaly", "window_hours", "inf")]
#[case("predictor", "min_quality", "nan")]
#[case("predictor", "fg_tolerance", "nan")]
#[case("predictor", "fg_tolerance", "inf")]
#[case("predictor", "completion_epsilon", "nan")]
#[case("thermal", "window_hours", "nan")]
#[case("thermal", "min_coverage", "nan")]
#[case("thermal", "max_gap_minutes", "inf")]
#[case("control", "hysteresis", "nan")]
#[case("control", "horizon_minutes", "nan")]
#[case("control", "margin", "nan")]
#[case("control", "divergence_tolerance", "nan")]
#[case("control", "divergence_tolerance", "-inf")]
fn rejects_non_finite_values(#[case] section: &str, #[case] field: &str, #[case] value: &str) {
    let cfg = load_toml(&format!("[{section}]\n{field} = {value}\n")).expect("parse TOML");
    let err = cfg.validate().expect_err("non-finite value accepted");
    assert!(
        format!("{err}").contains(&format!("{section}.{field} must be finite")),
        "unexpected message: {err}"
    );
}

#[test]
fn rejects_inverted_plausible_range() {
    let toml = r#"
[gravity]
measurement_noise = 0.0005
value_process_noise = 1e-7
rate_process_noise = 1e-7
initial_rate_variance = 1e-4
min = 1.2
max = 0.98
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains("gravity.min must be < gravity.max"));
}

#[test]
fn incomplete_estimator_table_is_a_parse_error() {
    assert!(load_toml("[gravity]\nmin = 0.99\n").is_err());
}

#[test]
fn accepts_full_config() {
    let toml = r#"
[anomaly]
stuck_rate_per_hour = 0.0002
stuck_hours = 12.0
rapid_rate_per_hour = 0.004
sensor_fault_drop = 0.010
window_hours = 24.0

[predictor]
min_samples = 10
min_quality = 0.8

[control]
hysteresis = 1.0
tick_seconds = 60

[safety]
min_cycle_seconds = 300

[features]
predictive_control = false

[logging]
level = "debug"
rotation = "daily"
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert!(!cfg.features.predictive_control);
    assert!(cfg.features.prediction);
}

#[test]
fn load_file_parses_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ferment.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "[safety]\nmin_cycle_seconds = 120").unwrap();
    let cfg = load_file(&path).unwrap();
    assert_eq!(cfg.safety.min_cycle_seconds, 120);

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "[control]\ntick_seconds = 0\n").unwrap();
    assert!(load_file(&bad).is_err());
}

#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and history CSV parsing for the fermentation core.
//!
//! - `Config` and sub-structs are deserialized from TOML. Every section has
//!   explicit defaults, so a partial file is completed rather than left
//!   half-present, then checked once with `Config::validate`.
//! - The history CSV loader enforces headers and tolerates empty cells so
//!   that incomplete rows reach hydration (where they are counted as skipped).
use serde::Deserialize;

/// One row of a history CSV.
///
/// Expected headers:
/// timestamp_ms,gravity,temperature
///
/// Example:
/// timestamp_ms,gravity,temperature
/// 1700000000000,1.060,19.8
/// 1700000900000,,19.9
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct HistoryRow {
    pub timestamp_ms: Option<u64>,
    pub gravity: Option<f64>,
    pub temperature: Option<f64>,
}

/// Per-signal estimator tuning.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EstimatorCfg {
    /// Measurement noise standard deviation (signal units).
    pub measurement_noise: f64,
    /// Value process noise (units² per hour).
    pub value_process_noise: f64,
    /// Rate process noise ((units/h)² per hour).
    pub rate_process_noise: f64,
    /// Rate variance assumed for a freshly initialised filter.
    pub initial_rate_variance: f64,
    /// Lowest physically plausible raw value.
    pub min: f64,
    /// Highest physically plausible raw value.
    pub max: f64,
}

/// Wrapper so that `[gravity]` defaults to gravity tuning.
/// A present `[gravity]` table must spell out every field.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(transparent)]
pub struct GravityCfg(pub EstimatorCfg);

impl Default for GravityCfg {
    fn default() -> Self {
        Self(EstimatorCfg {
            measurement_noise: 0.0005,
            value_process_noise: 1e-7,
            rate_process_noise: 1e-7,
            initial_rate_variance: 1e-4,
            min: 0.980,
            max: 1.200,
        })
    }
}

/// Wrapper so that `[temperature]` defaults to temperature tuning.
/// A present `[temperature]` table must spell out every field.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(transparent)]
pub struct TemperatureCfg(pub EstimatorCfg);

impl Default for TemperatureCfg {
    fn default() -> Self {
        Self(EstimatorCfg {
            measurement_noise: 0.2,
            value_process_noise: 0.05,
            rate_process_noise: 0.05,
            initial_rate_variance: 1.0,
            min: -10.0,
            max: 60.0,
        })
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AnomalyCfg {
    /// Rates at or below this magnitude (SG/h) count as "not moving".
    pub stuck_rate_per_hour: f64,
    /// How long the rate must stay near zero before flagging "stuck".
    pub stuck_hours: f64,
    /// Rate magnitude (SG/h) that flags "rapid change".
    pub rapid_rate_per_hour: f64,
    /// Single-step raw drop (SG) that flags "sensor fault".
    pub sensor_fault_drop: f64,
    /// Length of the history window handed to the detector.
    pub window_hours: f64,
}

impl Default for AnomalyCfg {
    fn default() -> Self {
        Self {
            stuck_rate_per_hour: 0.0002,
            stuck_hours: 12.0,
            rapid_rate_per_hour: 0.004,
            sensor_fault_drop: 0.010,
            window_hours: 24.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PredictorCfg {
    /// Minimum buffered samples before a fit is attempted.
    pub min_samples: usize,
    /// Minimum coefficient of determination to accept a fit.
    pub min_quality: f64,
    /// Iteration budget for the nonlinear solver.
    pub max_iterations: usize,
    /// Allowed excess of fitted FG over fitted OG.
    pub fg_tolerance: f64,
    /// Distance from FG (SG) considered "complete".
    pub completion_epsilon: f64,
}

impl Default for PredictorCfg {
    fn default() -> Self {
        Self {
            min_samples: 10,
            min_quality: 0.80,
            max_iterations: 100,
            fg_tolerance: 0.002,
            completion_epsilon: 0.001,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HistoryCfg {
    /// Ring buffer cap per device.
    pub max_samples: usize,
}

impl Default for HistoryCfg {
    fn default() -> Self {
        // two weeks at a 5-minute cadence
        Self { max_samples: 4032 }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ThermalCfg {
    /// Learning window length.
    pub window_hours: f64,
    /// Fraction of the window the series must actually span.
    pub min_coverage: f64,
    /// Intervals longer than this are not used for regression.
    pub max_gap_minutes: f64,
    /// Minimum usable intervals per regressed term.
    pub min_intervals: usize,
}

impl Default for ThermalCfg {
    fn default() -> Self {
        Self {
            window_hours: 24.0,
            min_coverage: 0.5,
            max_gap_minutes: 30.0,
            min_intervals: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ControlCfg {
    /// Dead band (°C) either side of target for hysteresis control.
    pub hysteresis: f64,
    /// Forward simulation horizon.
    pub horizon_minutes: f64,
    /// Interval between control evaluations.
    pub tick_seconds: u64,
    /// Temperature margin (°C) short of target at which a running actuator is cut.
    pub margin: f64,
    /// Prediction error (°C) counted as a model miss.
    pub divergence_tolerance: f64,
    /// Consecutive misses that fault the model.
    pub divergence_ticks: u32,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            hysteresis: 0.5,
            horizon_minutes: 120.0,
            tick_seconds: 60,
            margin: 0.1,
            divergence_tolerance: 1.0,
            divergence_ticks: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Safety {
    /// Shortest allowed interval between transitions of one actuator.
    pub min_cycle_seconds: u64,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            min_cycle_seconds: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Features {
    pub prediction: bool,
    pub anomaly_detection: bool,
    pub predictive_control: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            prediction: true,
            anomaly_detection: true,
            predictive_control: true,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub gravity: GravityCfg,
    pub temperature: TemperatureCfg,
    pub anomaly: AnomalyCfg,
    pub predictor: PredictorCfg,
    pub history: HistoryCfg,
    pub thermal: ThermalCfg,
    pub control: ControlCfg,
    pub safety: Safety,
    pub features: Features,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read and parse a TOML file, then validate it.
pub fn load_file(path: &std::path::Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {:?}: {}", path, e))?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_history_csv(path: &std::path::Path) -> eyre::Result<Vec<HistoryRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open history CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["timestamp_ms", "gravity", "temperature"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "history CSV must have headers 'timestamp_ms,gravity,temperature', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<HistoryRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    Ok(rows)
}

fn validate_estimator(name: &str, c: &EstimatorCfg) -> eyre::Result<()> {
    let finite = [
        c.measurement_noise,
        c.value_process_noise,
        c.rate_process_noise,
        c.initial_rate_variance,
        c.min,
        c.max,
    ]
    .iter()
    .all(|v| v.is_finite());
    if !finite {
        eyre::bail!("{name}: all values must be finite");
    }
    if c.measurement_noise <= 0.0 {
        eyre::bail!("{name}.measurement_noise must be > 0");
    }
    if c.value_process_noise < 0.0 || c.rate_process_noise < 0.0 {
        eyre::bail!("{name}: process noise must be >= 0");
    }
    if c.initial_rate_variance <= 0.0 {
        eyre::bail!("{name}.initial_rate_variance must be > 0");
    }
    if c.min >= c.max {
        eyre::bail!("{name}.min must be < {name}.max");
    }
    Ok(())
}

// TOML accepts `nan` and `inf`, and NaN slips past every range comparison
fn ensure_finite(fields: &[(&str, f64)]) -> eyre::Result<()> {
    if let Some((name, v)) = fields.iter().find(|(_, v)| !v.is_finite()) {
        eyre::bail!("{name} must be finite, got {v}");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Estimators
        validate_estimator("gravity", &self.gravity.0)?;
        validate_estimator("temperature", &self.temperature.0)?;

        ensure_finite(&[
            ("anomaly.stuck_rate_per_hour", self.anomaly.stuck_rate_per_hour),
            ("anomaly.stuck_hours", self.anomaly.stuck_hours),
            ("anomaly.rapid_rate_per_hour", self.anomaly.rapid_rate_per_hour),
            ("anomaly.sensor_fault_drop", self.anomaly.sensor_fault_drop),
            ("anomaly.window_hours", self.anomaly.window_hours),
            ("predictor.min_quality", self.predictor.min_quality),
            ("predictor.fg_tolerance", self.predictor.fg_tolerance),
            ("predictor.completion_epsilon", self.predictor.completion_epsilon),
            ("thermal.window_hours", self.thermal.window_hours),
            ("thermal.min_coverage", self.thermal.min_coverage),
            ("thermal.max_gap_minutes", self.thermal.max_gap_minutes),
            ("control.hysteresis", self.control.hysteresis),
            ("control.horizon_minutes", self.control.horizon_minutes),
            ("control.margin", self.control.margin),
            ("control.divergence_tolerance", self.control.divergence_tolerance),
        ])?;

        // Anomaly
        let a = &self.anomaly;
        if a.stuck_rate_per_hour < 0.0 {
            eyre::bail!("anomaly.stuck_rate_per_hour must be >= 0");
        }
        if a.stuck_hours <= 0.0 {
            eyre::bail!("anomaly.stuck_hours must be > 0");
        }
        if a.rapid_rate_per_hour <= 0.0 {
            eyre::bail!("anomaly.rapid_rate_per_hour must be > 0");
        }
        if a.rapid_rate_per_hour <= a.stuck_rate_per_hour {
            eyre::bail!("anomaly.rapid_rate_per_hour must exceed anomaly.stuck_rate_per_hour");
        }
        if a.sensor_fault_drop <= 0.0 {
            eyre::bail!("anomaly.sensor_fault_drop must be > 0");
        }
        if a.window_hours < a.stuck_hours {
            eyre::bail!("anomaly.window_hours must be >= anomaly.stuck_hours");
        }

        // Predictor
        if self.predictor.min_samples < 3 {
            eyre::bail!("predictor.min_samples must be >= 3 (three parameters are fitted)");
        }
        if !(0.0..=1.0).contains(&self.predictor.min_quality) {
            eyre::bail!("predictor.min_quality must be in [0.0, 1.0]");
        }
        if self.predictor.max_iterations == 0 {
            eyre::bail!("predictor.max_iterations must be >= 1");
        }
        if self.predictor.fg_tolerance < 0.0 {
            eyre::bail!("predictor.fg_tolerance must be >= 0");
        }
        if self.predictor.completion_epsilon <= 0.0 {
            eyre::bail!("predictor.completion_epsilon must be > 0");
        }

        // History
        if self.history.max_samples < self.predictor.min_samples {
            eyre::bail!("history.max_samples must be >= predictor.min_samples");
        }

        // Thermal
        if self.thermal.window_hours <= 0.0 {
            eyre::bail!("thermal.window_hours must be > 0");
        }
        if !(0.0..=1.0).contains(&self.thermal.min_coverage) {
            eyre::bail!("thermal.min_coverage must be in [0.0, 1.0]");
        }
        if self.thermal.max_gap_minutes <= 0.0 {
            eyre::bail!("thermal.max_gap_minutes must be > 0");
        }
        if self.thermal.min_intervals == 0 {
            eyre::bail!("thermal.min_intervals must be >= 1");
        }

        // Control
        if self.control.hysteresis < 0.0 {
            eyre::bail!("control.hysteresis must be >= 0");
        }
        if self.control.tick_seconds == 0 {
            eyre::bail!("control.tick_seconds must be >= 1");
        }
        if self.control.horizon_minutes * 60.0 < self.control.tick_seconds as f64 {
            eyre::bail!("control.horizon_minutes must cover at least one tick");
        }
        if self.control.margin < 0.0 {
            eyre::bail!("control.margin must be >= 0");
        }
        if self.control.divergence_tolerance <= 0.0 {
            eyre::bail!("control.divergence_tolerance must be > 0");
        }
        if self.control.divergence_ticks == 0 {
            eyre::bail!("control.divergence_ticks must be >= 1");
        }

        // Safety
        if self.safety.min_cycle_seconds > 24 * 60 * 60 {
            eyre::bail!("safety.min_cycle_seconds is unreasonably large (>24h)");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

//! Configuration types for the fermentation core.
//!
//! These are the runtime configuration structs shared by every component.
//! They are separate from the TOML-deserialized config in `ferment_config`;
//! durations are already converted to milliseconds here.

/// Online estimator tuning for one signal (gravity or temperature).
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorCfg {
    /// Measurement noise standard deviation (signal units).
    pub measurement_noise: f64,
    /// Value process noise (units² per hour of elapsed time).
    pub value_process_noise: f64,
    /// Rate process noise ((units/h)² per hour of elapsed time).
    pub rate_process_noise: f64,
    /// Rate variance of a freshly initialised filter.
    pub initial_rate_variance: f64,
    /// Plausible raw range; anything outside is rejected.
    pub min: f64,
    pub max: f64,
}

impl EstimatorCfg {
    pub fn gravity() -> Self {
        Self {
            measurement_noise: 0.0005,
            value_process_noise: 1e-7,
            rate_process_noise: 1e-7,
            initial_rate_variance: 1e-4,
            min: 0.980,
            max: 1.200,
        }
    }

    pub fn temperature() -> Self {
        Self {
            measurement_noise: 0.2,
            value_process_noise: 0.05,
            rate_process_noise: 0.05,
            initial_rate_variance: 1.0,
            min: -10.0,
            max: 60.0,
        }
    }
}

/// Anomaly rule thresholds. Opaque to the detector; supplied per evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyCfg {
    pub stuck_rate_per_hour: f64,
    pub stuck_ms: u64,
    pub rapid_rate_per_hour: f64,
    pub sensor_fault_drop: f64,
    /// History handed to the detector (ms before the latest sample).
    pub window_ms: u64,
}

impl Default for AnomalyCfg {
    fn default() -> Self {
        Self {
            stuck_rate_per_hour: 0.0002,
            stuck_ms: 12 * crate::util::MILLIS_PER_HOUR,
            rapid_rate_per_hour: 0.004,
            sensor_fault_drop: 0.010,
            window_ms: 24 * crate::util::MILLIS_PER_HOUR,
        }
    }
}

/// Final-gravity predictor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorCfg {
    pub min_samples: usize,
    pub min_quality: f64,
    pub max_iterations: usize,
    pub fg_tolerance: f64,
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

/// Thermal model learner configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalCfg {
    pub window_ms: u64,
    pub min_coverage: f64,
    pub max_gap_ms: u64,
    pub min_intervals: usize,
}

impl Default for ThermalCfg {
    fn default() -> Self {
        Self {
            window_ms: 24 * crate::util::MILLIS_PER_HOUR,
            min_coverage: 0.5,
            max_gap_ms: 30 * crate::util::MILLIS_PER_MIN,
            min_intervals: 3,
        }
    }
}

/// Predictive/hysteresis controller configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCfg {
    pub hysteresis: f64,
    pub horizon_ms: u64,
    pub tick_ms: u64,
    pub margin: f64,
    pub divergence_tolerance: f64,
    pub divergence_ticks: u32,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            hysteresis: 0.5,
            horizon_ms: 2 * crate::util::MILLIS_PER_HOUR,
            tick_ms: crate::util::MILLIS_PER_MIN,
            margin: 0.1,
            divergence_tolerance: 1.0,
            divergence_ticks: 5,
        }
    }
}

/// Actuation safety configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyCfg {
    /// Shortest allowed interval between transitions of one actuator.
    pub min_cycle_ms: u64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            min_cycle_ms: 5 * crate::util::MILLIS_PER_MIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
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

/// Immutable snapshot handed to every evaluation. Never mutated in place;
/// callers install a new `Arc<CoreConfig>` instead.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    pub gravity: EstimatorCfg,
    pub temperature: EstimatorCfg,
    pub anomaly: AnomalyCfg,
    pub predictor: PredictorCfg,
    pub history_max_samples: usize,
    pub thermal: ThermalCfg,
    pub control: ControlCfg,
    pub safety: SafetyCfg,
    pub features: Features,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            gravity: EstimatorCfg::gravity(),
            temperature: EstimatorCfg::temperature(),
            anomaly: AnomalyCfg::default(),
            predictor: PredictorCfg::default(),
            history_max_samples: 4032,
            thermal: ThermalCfg::default(),
            control: ControlCfg::default(),
            safety: SafetyCfg::default(),
            features: Features::default(),
        }
    }
}

//! `From` implementations bridging `ferment_config` types to `ferment_core` types.
//!
//! Durations given in hours/minutes/seconds in the TOML are converted to
//! milliseconds once, here.

use crate::config::{
    AnomalyCfg, ControlCfg, CoreConfig, EstimatorCfg, Features, PredictorCfg, SafetyCfg,
    ThermalCfg,
};
use crate::util::{MILLIS_PER_SEC, hours_to_ms, minutes_to_ms};

// ── EstimatorCfg ─────────────────────────────────────────────────────────────

impl From<&ferment_config::EstimatorCfg> for EstimatorCfg {
    fn from(c: &ferment_config::EstimatorCfg) -> Self {
        Self {
            measurement_noise: c.measurement_noise,
            value_process_noise: c.value_process_noise,
            rate_process_noise: c.rate_process_noise,
            initial_rate_variance: c.initial_rate_variance,
            min: c.min,
            max: c.max,
        }
    }
}

// ── AnomalyCfg ───────────────────────────────────────────────────────────────

impl From<&ferment_config::AnomalyCfg> for AnomalyCfg {
    fn from(c: &ferment_config::AnomalyCfg) -> Self {
        Self {
            stuck_rate_per_hour: c.stuck_rate_per_hour,
            stuck_ms: hours_to_ms(c.stuck_hours),
            rapid_rate_per_hour: c.rapid_rate_per_hour,
            sensor_fault_drop: c.sensor_fault_drop,
            window_ms: hours_to_ms(c.window_hours),
        }
    }
}

// ── PredictorCfg ─────────────────────────────────────────────────────────────

impl From<&ferment_config::PredictorCfg> for PredictorCfg {
    fn from(c: &ferment_config::PredictorCfg) -> Self {
        Self {
            min_samples: c.min_samples,
            min_quality: c.min_quality,
            max_iterations: c.max_iterations,
            fg_tolerance: c.fg_tolerance,
            completion_epsilon: c.completion_epsilon,
        }
    }
}

// ── ThermalCfg ───────────────────────────────────────────────────────────────

impl From<&ferment_config::ThermalCfg> for ThermalCfg {
    fn from(c: &ferment_config::ThermalCfg) -> Self {
        Self {
            window_ms: hours_to_ms(c.window_hours),
            min_coverage: c.min_coverage,
            max_gap_ms: minutes_to_ms(c.max_gap_minutes),
            min_intervals: c.min_intervals,
        }
    }
}

// ── ControlCfg / SafetyCfg ───────────────────────────────────────────────────

impl From<&ferment_config::ControlCfg> for ControlCfg {
    fn from(c: &ferment_config::ControlCfg) -> Self {
        Self {
            hysteresis: c.hysteresis,
            horizon_ms: minutes_to_ms(c.horizon_minutes),
            tick_ms: c.tick_seconds.saturating_mul(MILLIS_PER_SEC),
            margin: c.margin,
            divergence_tolerance: c.divergence_tolerance,
            divergence_ticks: c.divergence_ticks,
        }
    }
}

impl From<&ferment_config::Safety> for SafetyCfg {
    fn from(c: &ferment_config::Safety) -> Self {
        Self {
            min_cycle_ms: c.min_cycle_seconds.saturating_mul(MILLIS_PER_SEC),
        }
    }
}

impl From<&ferment_config::Features> for Features {
    fn from(c: &ferment_config::Features) -> Self {
        Self {
            prediction: c.prediction,
            anomaly_detection: c.anomaly_detection,
            predictive_control: c.predictive_control,
        }
    }
}

// ── CoreConfig ───────────────────────────────────────────────────────────────

impl From<&ferment_config::Config> for CoreConfig {
    fn from(c: &ferment_config::Config) -> Self {
        Self {
            gravity: (&c.gravity.0).into(),
            temperature: (&c.temperature.0).into(),
            anomaly: (&c.anomaly).into(),
            predictor: (&c.predictor).into(),
            history_max_samples: c.history.max_samples,
            thermal: (&c.thermal).into(),
            control: (&c.control).into(),
            safety: (&c.safety).into(),
            features: (&c.features).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_defaults_match_core_defaults() {
        let cfg = ferment_config::Config::default();
        assert_eq!(CoreConfig::from(&cfg), CoreConfig::default());
    }

    #[test]
    fn durations_are_converted_to_ms() {
        let mut cfg = ferment_config::Config::default();
        cfg.control.tick_seconds = 30;
        cfg.control.horizon_minutes = 90.0;
        cfg.safety.min_cycle_seconds = 120;
        cfg.anomaly.stuck_hours = 6.0;
        let core = CoreConfig::from(&cfg);
        assert_eq!(core.control.tick_ms, 30_000);
        assert_eq!(core.control.horizon_ms, 5_400_000);
        assert_eq!(core.safety.min_cycle_ms, 120_000);
        assert_eq!(core.anomaly.stuck_ms, 6 * 3_600_000);
    }
}

//! Thermal model learner.
//!
//! Fits the first-order vessel model
//!
//! ```text
//! dT/dt = h·heater − c·cooler + a·(T_amb − T)      (°C per hour)
//! ```
//!
//! from a joined series of temperature, ambient and actuator state. Only
//! consecutive observations at most `max_gap_ms` apart form an interval;
//! each interval is attributed to the actuation at its start.
//!
//! All three coefficients come from one least-squares fit of the observed
//! interval slopes, so bang-bang histories with little passive drift still
//! identify the ambient coupling. An actuator never seen on has its rate
//! left at zero and its column dropped from the fit.

use std::fmt;

use crate::config::ThermalCfg;
use crate::safety::{ActuatorKind, ControlEvent};
use crate::util::{hours_between, solve3};

/// One joined observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalObservation {
    pub timestamp_ms: u64,
    pub temp: f64,
    pub ambient: f64,
    pub heater_on: bool,
    pub cooler_on: bool,
}

/// A temperature reading with the ambient temperature at the same time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperaturePoint {
    pub timestamp_ms: u64,
    pub temp: f64,
    pub ambient: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelRejection {
    InsufficientCoverage { coverage: f64, required: f64 },
    NoTransition,
    TooFewIntervals { term: &'static str, have: usize, need: usize },
    /// The regression is singular (e.g. temperature never left ambient).
    Degenerate,
    /// A fitted rate came out with the wrong sign.
    Implausible { term: &'static str, value: f64 },
}

impl fmt::Display for ModelRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRejection::InsufficientCoverage { coverage, required } => {
                write!(f, "window coverage {coverage:.2} below {required:.2}")
            }
            ModelRejection::NoTransition => f.write_str("no actuator transition in window"),
            ModelRejection::TooFewIntervals { term, have, need } => {
                write!(f, "{term}: {have} intervals, need {need}")
            }
            ModelRejection::Degenerate => f.write_str("singular regression"),
            ModelRejection::Implausible { term, value } => write!(f, "{term} rate {value:.3} is implausible"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalModel {
    /// °C per hour added while the heater is on.
    pub heating_rate: f64,
    /// °C per hour removed while the cooler is on (positive).
    pub cooling_rate: f64,
    /// Per hour.
    pub ambient_coupling: f64,
    pub learned_at_ms: u64,
    pub valid: bool,
    pub rejection: Option<ModelRejection>,
    pub heating_intervals: usize,
    pub cooling_intervals: usize,
    pub passive_intervals: usize,
}

impl ThermalModel {
    fn rejected(learned_at_ms: u64, reason: ModelRejection) -> Self {
        Self {
            heating_rate: 0.0,
            cooling_rate: 0.0,
            ambient_coupling: 0.0,
            learned_at_ms,
            valid: false,
            rejection: Some(reason),
            heating_intervals: 0,
            cooling_intervals: 0,
            passive_intervals: 0,
        }
    }

    /// Instantaneous dT/dt in °C per hour.
    #[inline]
    pub fn derivative(&self, temp: f64, ambient: f64, heater_on: bool, cooler_on: bool) -> f64 {
        let mut d = self.ambient_coupling * (ambient - temp);
        if heater_on {
            d += self.heating_rate;
        }
        if cooler_on {
            d -= self.cooling_rate;
        }
        d
    }
}

/// Rebuild actuator state for each temperature point from the control
/// event log. Both actuators are assumed off before the first event.
pub fn join_observations(temps: &[TemperaturePoint], events: &[ControlEvent]) -> Vec<ThermalObservation> {
    let mut events: Vec<&ControlEvent> = events.iter().collect();
    events.sort_by_key(|e| e.timestamp_ms);
    let mut temps: Vec<&TemperaturePoint> = temps.iter().collect();
    temps.sort_by_key(|p| p.timestamp_ms);

    let (mut heater, mut cooler) = (false, false);
    let mut next = events.iter().peekable();
    temps
        .into_iter()
        .map(|p| {
            while let Some(e) = next.next_if(|e| e.timestamp_ms <= p.timestamp_ms) {
                match e.action.kind() {
                    ActuatorKind::Heater => heater = e.action.is_on(),
                    ActuatorKind::Cooler => cooler = e.action.is_on(),
                }
            }
            ThermalObservation {
                timestamp_ms: p.timestamp_ms,
                temp: p.temp,
                ambient: p.ambient,
                heater_on: heater,
                cooler_on: cooler,
            }
        })
        .collect()
}

struct Interval {
    /// Mean (ambient − temp) over the interval.
    drive: f64,
    /// Observed dT/dt (°C per hour).
    slope: f64,
    heater_on: bool,
    cooler_on: bool,
}

/// Learn a model from observations within `cfg.window_ms` before `now_ms`.
pub fn learn(observations: &[ThermalObservation], now_ms: u64, cfg: &ThermalCfg) -> ThermalModel {
    let since = now_ms.saturating_sub(cfg.window_ms);
    let mut obs: Vec<&ThermalObservation> = observations
        .iter()
        .filter(|o| o.timestamp_ms >= since && o.timestamp_ms <= now_ms)
        .filter(|o| o.temp.is_finite() && o.ambient.is_finite())
        .collect();
    obs.sort_by_key(|o| o.timestamp_ms);

    let mut covered_ms = 0u64;
    let mut transitions = 0usize;
    let mut intervals = Vec::new();
    for w in obs.windows(2) {
        let (a, b) = (w[0], w[1]);
        if (a.heater_on, a.cooler_on) != (b.heater_on, b.cooler_on) {
            transitions += 1;
        }
        let dt_ms = b.timestamp_ms - a.timestamp_ms;
        if dt_ms == 0 || dt_ms > cfg.max_gap_ms {
            continue;
        }
        covered_ms += dt_ms;
        let mean_temp = 0.5 * (a.temp + b.temp);
        let mean_amb = 0.5 * (a.ambient + b.ambient);
        intervals.push(Interval {
            drive: mean_amb - mean_temp,
            slope: (b.temp - a.temp) / hours_between(a.timestamp_ms, b.timestamp_ms),
            heater_on: a.heater_on,
            cooler_on: a.cooler_on,
        });
    }

    let coverage = if cfg.window_ms == 0 {
        0.0
    } else {
        covered_ms as f64 / cfg.window_ms as f64
    };
    if coverage < cfg.min_coverage {
        return ThermalModel::rejected(
            now_ms,
            ModelRejection::InsufficientCoverage {
                coverage,
                required: cfg.min_coverage,
            },
        );
    }
    if transitions == 0 {
        return ThermalModel::rejected(now_ms, ModelRejection::NoTransition);
    }

    let need = cfg.min_intervals.max(1);
    let n_heat = intervals.iter().filter(|i| i.heater_on).count();
    let n_cool = intervals.iter().filter(|i| i.cooler_on).count();
    let n_passive = intervals.iter().filter(|i| !i.heater_on && !i.cooler_on).count();
    for (term, n) in [("heating", n_heat), ("cooling", n_cool)] {
        if n > 0 && n < need {
            return ThermalModel::rejected(now_ms, ModelRejection::TooFewIntervals { term, have: n, need });
        }
    }
    if n_heat == 0 && n_cool == 0 {
        return ThermalModel::rejected(
            now_ms,
            ModelRejection::TooFewIntervals {
                term: "actuated",
                have: 0,
                need,
            },
        );
    }

    // slope = h·heater − c·cooler + a·drive, solved as [h, c, a]
    let mut ata = [[0.0; 3]; 3];
    let mut atb = [0.0; 3];
    for i in &intervals {
        let row = [
            f64::from(u8::from(i.heater_on)),
            -f64::from(u8::from(i.cooler_on)),
            i.drive,
        ];
        for r in 0..3 {
            atb[r] += row[r] * i.slope;
            for c in 0..3 {
                ata[r][c] += row[r] * row[c];
            }
        }
    }
    // Unobserved actuator: pin its coefficient to zero
    for (col, n) in [(0, n_heat), (1, n_cool)] {
        if n == 0 {
            ata[col] = [0.0; 3];
            ata[col][col] = 1.0;
            atb[col] = 0.0;
        }
    }
    let Some([heating_rate, cooling_rate, coupling]) = solve3(ata, atb) else {
        return ThermalModel::rejected(now_ms, ModelRejection::Degenerate);
    };

    for (term, n, value) in [
        ("heating", n_heat, heating_rate),
        ("cooling", n_cool, cooling_rate),
    ] {
        if n > 0 && value <= 0.0 {
            return ThermalModel::rejected(now_ms, ModelRejection::Implausible { term, value });
        }
    }
    if coupling < 0.0 {
        return ThermalModel::rejected(
            now_ms,
            ModelRejection::Implausible {
                term: "ambient",
                value: coupling,
            },
        );
    }

    tracing::info!(
        heating_rate,
        cooling_rate,
        ambient_coupling = coupling,
        heating_intervals = n_heat,
        cooling_intervals = n_cool,
        passive_intervals = n_passive,
        coverage,
        "thermal model learned"
    );
    ThermalModel {
        heating_rate,
        cooling_rate,
        ambient_coupling: coupling,
        learned_at_ms: now_ms,
        valid: true,
        rejection: None,
        heating_intervals: n_heat,
        cooling_intervals: n_cool,
        passive_intervals: n_passive,
    }
}

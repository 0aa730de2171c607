//! Per-batch temperature controller.
//!
//! Three states:
//!
//! - `NoModel`: dead-band hysteresis around the target.
//! - `ModelReady`: forward-simulates the learned [`ThermalModel`] in one
//!   minute Euler steps and compares the time until the trajectory would
//!   cross the target (less a margin when heating, plus a margin when
//!   cooling) with the time until the next tick. An actuator that would
//!   cross before then is switched off now; an idle vessel outside the band
//!   only starts an actuator whose trajectory would not cross within a tick.
//! - `Faulted`: entered when measured temperature misses the previous
//!   one-tick prediction by more than `divergence_tolerance` for
//!   `divergence_ticks` consecutive ticks. Behaves as `NoModel` until a new
//!   model is installed.

use std::fmt;

use crate::config::ControlCfg;
use crate::thermal::ThermalModel;
use crate::util::{MILLIS_PER_HOUR, MILLIS_PER_MIN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    NoModel,
    ModelReady,
    Faulted,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControllerState::NoModel => "no_model",
            ControllerState::ModelReady => "model_ready",
            ControllerState::Faulted => "faulted",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    /// Hysteresis: below the band.
    BelowBand,
    /// Hysteresis: above the band.
    AboveBand,
    /// Inside the band (or nothing to change); current actuation kept.
    Hold,
    /// Heating would cross the target before the next tick.
    HeatingWouldOvershoot,
    CoolingWouldOvershoot,
    ContinueHeating,
    ContinueCooling,
    StartHeating,
    StartCooling,
    /// Outside the band, but starting would overshoot within one tick.
    StartDeferred,
    /// Model ready but no ambient reading; hysteresis used.
    NoAmbient,
}

impl DecisionReason {
    pub fn code(self) -> &'static str {
        match self {
            DecisionReason::BelowBand => "below_band",
            DecisionReason::AboveBand => "above_band",
            DecisionReason::Hold => "hold",
            DecisionReason::HeatingWouldOvershoot => "heating_would_overshoot",
            DecisionReason::CoolingWouldOvershoot => "cooling_would_overshoot",
            DecisionReason::ContinueHeating => "continue_heating",
            DecisionReason::ContinueCooling => "continue_cooling",
            DecisionReason::StartHeating => "start_heating",
            DecisionReason::StartCooling => "start_cooling",
            DecisionReason::StartDeferred => "start_deferred",
            DecisionReason::NoAmbient => "no_ambient",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub heater_on: bool,
    pub cooler_on: bool,
    /// Expected temperature at the next tick.
    pub predicted_temp: f64,
    pub reason: DecisionReason,
}

// ── Simulation ───────────────────────────────────────────────────────────────

const STEP_MS: u64 = MILLIS_PER_MIN;

/// Temperature after `duration_ms` under fixed actuation.
pub fn simulate(model: &ThermalModel, start: f64, ambient: f64, heat: bool, cool: bool, duration_ms: u64) -> f64 {
    let mut t = start;
    let mut left = duration_ms;
    while left > 0 {
        let step = left.min(STEP_MS);
        t += model.derivative(t, ambient, heat, cool) * step as f64 / MILLIS_PER_HOUR as f64;
        left -= step;
    }
    t
}

/// Which actuator drives a simulated trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    Heat,
    Cool,
}

/// Milliseconds until the trajectory with `drive` on reaches `level` (from
/// below when heating, from above when cooling), or `None` within
/// `horizon_ms`.
pub fn time_to_cross(
    model: &ThermalModel,
    start: f64,
    ambient: f64,
    drive: Drive,
    level: f64,
    horizon_ms: u64,
) -> Option<u64> {
    let (heat, cool) = (drive == Drive::Heat, drive == Drive::Cool);
    let crossed = |t: f64| if heat { t >= level } else { t <= level };
    let mut t = start;
    let mut elapsed = 0u64;
    if crossed(t) {
        return Some(0);
    }
    while elapsed < horizon_ms {
        let step = (horizon_ms - elapsed).min(STEP_MS);
        t += model.derivative(t, ambient, heat, cool) * step as f64 / MILLIS_PER_HOUR as f64;
        elapsed += step;
        if crossed(t) {
            return Some(elapsed);
        }
    }
    None
}

// ── Controller ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Controller {
    cfg: ControlCfg,
    model: Option<ThermalModel>,
    state: ControllerState,
    /// One-tick prediction from the previous model-based decision.
    last_prediction: Option<f64>,
    divergent_ticks: u32,
    last_decision: Option<Decision>,
}

impl Controller {
    pub fn new(cfg: ControlCfg) -> Self {
        Self {
            cfg,
            model: None,
            state: ControllerState::NoModel,
            last_prediction: None,
            divergent_ticks: 0,
            last_decision: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn model(&self) -> Option<&ThermalModel> {
        self.model.as_ref()
    }

    pub fn last_decision(&self) -> Option<&Decision> {
        self.last_decision.as_ref()
    }

    pub fn set_config(&mut self, cfg: ControlCfg) {
        self.cfg = cfg;
    }

    /// Install a freshly learned model. A valid model moves the controller
    /// to `ModelReady` (clearing `Faulted`); an invalid one to `NoModel`.
    pub fn set_model(&mut self, model: ThermalModel) {
        let next = if model.valid {
            ControllerState::ModelReady
        } else {
            ControllerState::NoModel
        };
        if next != self.state {
            tracing::info!(from = %self.state, to = %next, "controller state change");
        }
        self.state = next;
        self.model = model.valid.then_some(model);
        self.last_prediction = None;
        self.divergent_ticks = 0;
    }

    fn hysteresis(&self, temp: f64, target: f64, heater_on: bool, cooler_on: bool) -> Decision {
        let band = self.cfg.hysteresis;
        let (heater_on, cooler_on, reason) = if temp < target - band {
            (true, false, DecisionReason::BelowBand)
        } else if temp > target + band {
            (false, true, DecisionReason::AboveBand)
        } else {
            (heater_on, cooler_on, DecisionReason::Hold)
        };
        Decision {
            heater_on,
            cooler_on,
            predicted_temp: temp,
            reason,
        }
    }

    fn track_divergence(&mut self, temp: f64) {
        let Some(predicted) = self.last_prediction.take() else {
            return;
        };
        if (temp - predicted).abs() > self.cfg.divergence_tolerance {
            self.divergent_ticks += 1;
            tracing::debug!(temp, predicted, count = self.divergent_ticks, "model prediction missed");
        } else {
            self.divergent_ticks = 0;
        }
        if self.divergent_ticks >= self.cfg.divergence_ticks.max(1) {
            tracing::warn!(
                ticks = self.divergent_ticks,
                tolerance = self.cfg.divergence_tolerance,
                "thermal model diverged; falling back to hysteresis"
            );
            self.state = ControllerState::Faulted;
            self.divergent_ticks = 0;
        }
    }

    fn predictive(
        &self,
        model: &ThermalModel,
        temp: f64,
        target: f64,
        ambient: f64,
        heater_on: bool,
        cooler_on: bool,
    ) -> Decision {
        let tick = self.cfg.tick_ms;
        let horizon = self.cfg.horizon_ms.max(tick);
        let heat_level = target - self.cfg.margin;
        let cool_level = target + self.cfg.margin;
        let band = self.cfg.hysteresis;

        // Both on cannot be realized; treat it as whichever corrects the error
        let (heating, cooling) = match (heater_on, cooler_on) {
            (true, true) => (temp < target, temp >= target),
            other => other,
        };

        let (heat, cool, reason) = if heating {
            match time_to_cross(model, temp, ambient, Drive::Heat, heat_level, horizon) {
                Some(t) if t <= tick => (false, false, DecisionReason::HeatingWouldOvershoot),
                _ => (true, false, DecisionReason::ContinueHeating),
            }
        } else if cooling {
            match time_to_cross(model, temp, ambient, Drive::Cool, cool_level, horizon) {
                Some(t) if t <= tick => (false, false, DecisionReason::CoolingWouldOvershoot),
                _ => (false, true, DecisionReason::ContinueCooling),
            }
        } else if temp < target - band {
            match time_to_cross(model, temp, ambient, Drive::Heat, heat_level, horizon) {
                Some(t) if t <= tick => (false, false, DecisionReason::StartDeferred),
                _ => (true, false, DecisionReason::StartHeating),
            }
        } else if temp > target + band {
            match time_to_cross(model, temp, ambient, Drive::Cool, cool_level, horizon) {
                Some(t) if t <= tick => (false, false, DecisionReason::StartDeferred),
                _ => (false, true, DecisionReason::StartCooling),
            }
        } else {
            (false, false, DecisionReason::Hold)
        };

        Decision {
            heater_on: heat,
            cooler_on: cool,
            predicted_temp: simulate(model, temp, ambient, heat, cool, tick),
            reason,
        }
    }

    /// Record what was actually realized after the safety layer, so the
    /// next divergence check compares against the actuation the vessel saw
    /// rather than the one this controller asked for. `None` means the
    /// relay state is unknown and the next tick is not checked.
    pub fn record_actuation(
        &mut self,
        heater_on: Option<bool>,
        cooler_on: Option<bool>,
        temp: f64,
        ambient: Option<f64>,
    ) {
        self.last_prediction = match (self.state, self.model, ambient, heater_on, cooler_on) {
            (ControllerState::ModelReady, Some(model), Some(amb), Some(heat), Some(cool)) => {
                Some(simulate(&model, temp, amb, heat, cool, self.cfg.tick_ms))
            }
            _ => None,
        };
    }

    /// Choose the actuation for this tick.
    pub fn compute_action(
        &mut self,
        current_temp: f64,
        target: f64,
        ambient: Option<f64>,
        heater_on: bool,
        cooler_on: bool,
    ) -> Decision {
        if self.state == ControllerState::ModelReady {
            self.track_divergence(current_temp);
        }

        let decision = match (self.state, self.model, ambient) {
            (ControllerState::ModelReady, Some(model), Some(amb)) => {
                let d = self.predictive(&model, current_temp, target, amb, heater_on, cooler_on);
                self.last_prediction = Some(d.predicted_temp);
                d
            }
            (ControllerState::ModelReady, Some(_), None) => {
                self.last_prediction = None;
                Decision {
                    reason: DecisionReason::NoAmbient,
                    ..self.hysteresis(current_temp, target, heater_on, cooler_on)
                }
            }
            _ => {
                self.last_prediction = None;
                self.hysteresis(current_temp, target, heater_on, cooler_on)
            }
        };
        tracing::debug!(
            state = %self.state,
            temp = current_temp,
            target,
            heater = decision.heater_on,
            cooler = decision.cooler_on,
            predicted = decision.predicted_temp,
            reason = %decision.reason,
            "control decision"
        );
        self.last_decision = Some(decision);
        decision
    }
}

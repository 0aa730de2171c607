//! Actuation safety layer.
//!
//! Sits between a controller decision and the relays. Per tick, in order:
//!
//! 1. Expired overrides are dropped; an active override replaces the
//!    decision for its actuator.
//! 2. Mutual exclusion: if both actuators are requested on, the overridden
//!    one wins, otherwise the one correcting the current deviation.
//! 3. Minimum cycle time: a transition requested sooner than `min_cycle_ms`
//!    after that actuator's last realized transition is suppressed. This
//!    applies to overrides too.
//! 4. Exclusion again: an actuator still held on by the cycle limit keeps
//!    the other one off.
//!
//! Commands go out offs first. No on-command is issued in a tick where an
//! off-command failed. A failed call leaves the actuator "unknown" and the
//! intended command is re-issued on the next tick. A [`ControlEvent`] is
//! emitted once per acknowledged transition.

use std::fmt;

use ferment_traits::Actuator;

use crate::config::SafetyCfg;
use crate::error::FermentError;
use crate::hw_error::map_actuator_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActuatorKind {
    Heater,
    Cooler,
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActuatorKind::Heater => "heater",
            ActuatorKind::Cooler => "cooler",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    HeaterOn,
    HeaterOff,
    CoolerOn,
    CoolerOff,
}

impl ControlAction {
    pub fn new(kind: ActuatorKind, on: bool) -> Self {
        match (kind, on) {
            (ActuatorKind::Heater, true) => ControlAction::HeaterOn,
            (ActuatorKind::Heater, false) => ControlAction::HeaterOff,
            (ActuatorKind::Cooler, true) => ControlAction::CoolerOn,
            (ActuatorKind::Cooler, false) => ControlAction::CoolerOff,
        }
    }

    pub fn kind(self) -> ActuatorKind {
        match self {
            ControlAction::HeaterOn | ControlAction::HeaterOff => ActuatorKind::Heater,
            ControlAction::CoolerOn | ControlAction::CoolerOff => ActuatorKind::Cooler,
        }
    }

    pub fn is_on(self) -> bool {
        matches!(self, ControlAction::HeaterOn | ControlAction::CoolerOn)
    }

    pub fn code(self) -> &'static str {
        match self {
            ControlAction::HeaterOn => "heater_on",
            ControlAction::HeaterOff => "heater_off",
            ControlAction::CoolerOn => "cooler_on",
            ControlAction::CoolerOff => "cooler_off",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "heater_on" => Some(ControlAction::HeaterOn),
            "heater_off" => Some(ControlAction::HeaterOff),
            "cooler_on" => Some(ControlAction::CoolerOn),
            "cooler_off" => Some(ControlAction::CoolerOff),
            _ => None,
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Append-only record of one realized actuator transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlEvent {
    pub timestamp_ms: u64,
    pub action: ControlAction,
    pub wort_temp: f64,
    pub ambient_temp: Option<f64>,
    pub target_temp: f64,
}

/// A timed manual override for one actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Override {
    pub on: bool,
    pub until_ms: u64,
}

/// Conditions at the moment of a tick, recorded on emitted events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    pub now_ms: u64,
    pub wort_temp: f64,
    pub ambient_temp: Option<f64>,
    pub target_temp: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyOutcome {
    /// Post-safety intended states. Never both true.
    pub heater_on: bool,
    pub cooler_on: bool,
    pub events: Vec<ControlEvent>,
    pub failures: Vec<(ActuatorKind, FermentError)>,
}

#[derive(Debug, Clone, Default)]
struct Channel {
    /// Last acknowledged state.
    acked: bool,
    /// Set when the last call failed; the relay may be in either state.
    unknown: bool,
    /// Last post-safety command, acknowledged or not.
    intended: bool,
    last_transition_ms: Option<u64>,
    forced: Option<Override>,
}

impl Channel {
    fn active_override(&self, now_ms: u64) -> Option<bool> {
        self.forced.filter(|o| now_ms < o.until_ms).map(|o| o.on)
    }

    fn cycle_locked(&self, now_ms: u64, min_cycle_ms: u64) -> bool {
        self.last_transition_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < min_cycle_ms)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SafetyLayer {
    cfg: SafetyCfg,
    heater: Channel,
    cooler: Channel,
}

impl SafetyLayer {
    pub fn new(cfg: SafetyCfg) -> Self {
        Self {
            cfg,
            heater: Channel::default(),
            cooler: Channel::default(),
        }
    }

    pub fn set_config(&mut self, cfg: SafetyCfg) {
        self.cfg = cfg;
    }

    fn channel(&self, kind: ActuatorKind) -> &Channel {
        match kind {
            ActuatorKind::Heater => &self.heater,
            ActuatorKind::Cooler => &self.cooler,
        }
    }

    fn channel_mut(&mut self, kind: ActuatorKind) -> &mut Channel {
        match kind {
            ActuatorKind::Heater => &mut self.heater,
            ActuatorKind::Cooler => &mut self.cooler,
        }
    }

    /// Force `kind` to `on` until `until_ms`. Forcing one actuator on clears
    /// an opposing on-override so the two can never both be forced on.
    pub fn set_override(&mut self, kind: ActuatorKind, on: bool, until_ms: u64) {
        if on {
            let other = match kind {
                ActuatorKind::Heater => ActuatorKind::Cooler,
                ActuatorKind::Cooler => ActuatorKind::Heater,
            };
            let ch = self.channel_mut(other);
            if ch.forced.is_some_and(|o| o.on) {
                ch.forced = None;
            }
        }
        tracing::info!(actuator = %kind, on, until_ms, "override set");
        self.channel_mut(kind).forced = Some(Override { on, until_ms });
    }

    pub fn clear_override(&mut self, kind: ActuatorKind) {
        if self.channel_mut(kind).forced.take().is_some() {
            tracing::info!(actuator = %kind, "override cleared");
        }
    }

    /// The override for `kind`, if still active at `now_ms`.
    pub fn active_override(&self, kind: ActuatorKind, now_ms: u64) -> Option<Override> {
        self.channel(kind).forced.filter(|o| now_ms < o.until_ms)
    }

    /// Last acknowledged state, or `None` while the actuator is unknown.
    pub fn acknowledged(&self, kind: ActuatorKind) -> Option<bool> {
        let ch = self.channel(kind);
        (!ch.unknown).then_some(ch.acked)
    }

    /// Last post-safety command for `kind`.
    pub fn intended(&self, kind: ActuatorKind) -> bool {
        self.channel(kind).intended
    }

    pub fn last_transition_ms(&self, kind: ActuatorKind) -> Option<u64> {
        self.channel(kind).last_transition_ms
    }

    /// Steps 1–4: turn a requested pair into the pair that may be commanded.
    pub fn resolve(&mut self, heater_req: bool, cooler_req: bool, ctx: &TickContext) -> (bool, bool) {
        let now = ctx.now_ms;
        for kind in [ActuatorKind::Heater, ActuatorKind::Cooler] {
            let ch = self.channel_mut(kind);
            if ch.forced.is_some_and(|o| now >= o.until_ms) {
                ch.forced = None;
                tracing::info!(actuator = %kind, "override expired");
            }
        }

        let h_forced = self.heater.active_override(now);
        let c_forced = self.cooler.active_override(now);
        let mut heat = h_forced.unwrap_or(heater_req);
        let mut cool = c_forced.unwrap_or(cooler_req);

        if heat && cool {
            let prefer_heat = match (h_forced, c_forced) {
                (Some(true), None) => true,
                (None, Some(true)) => false,
                _ => ctx.wort_temp < ctx.target_temp,
            };
            if prefer_heat {
                cool = false;
            } else {
                heat = false;
            }
            tracing::debug!(heat, cool, "mutual exclusion applied");
        }

        let min_cycle = self.cfg.min_cycle_ms;
        for (kind, want) in [(ActuatorKind::Heater, &mut heat), (ActuatorKind::Cooler, &mut cool)] {
            let ch = self.channel(kind);
            if *want != ch.intended && ch.cycle_locked(now, min_cycle) {
                tracing::debug!(
                    actuator = %kind,
                    requested = *want,
                    held = ch.intended,
                    "transition suppressed by minimum cycle time"
                );
                *want = ch.intended;
            }
        }

        // At most one of the two was already on; keep that one and hold the
        // other in its previous off state.
        if heat && cool {
            if self.heater.intended {
                cool = false;
            } else {
                heat = false;
            }
        }
        (heat, cool)
    }

    /// Resolve the request, then drive both actuators.
    pub fn apply(
        &mut self,
        heater_req: bool,
        cooler_req: bool,
        ctx: &TickContext,
        heater: &mut dyn Actuator,
        cooler: &mut dyn Actuator,
    ) -> SafetyOutcome {
        let (heat, cool) = self.resolve(heater_req, cooler_req, ctx);
        self.heater.intended = heat;
        self.cooler.intended = cool;

        let mut outcome = SafetyOutcome {
            heater_on: heat,
            cooler_on: cool,
            events: Vec::new(),
            failures: Vec::new(),
        };

        // Offs first; ons only once every off has been acknowledged
        let mut order = [(ActuatorKind::Heater, heat), (ActuatorKind::Cooler, cool)];
        order.sort_by_key(|&(_, on)| on);
        let mut off_failed = false;
        for (kind, on) in order {
            if on && off_failed {
                tracing::warn!(actuator = %kind, "on-command deferred after failed off-command");
                continue;
            }
            let dev: &mut dyn Actuator = match kind {
                ActuatorKind::Heater => &mut *heater,
                ActuatorKind::Cooler => &mut *cooler,
            };
            match self.drive(kind, on, dev, ctx) {
                Ok(Some(ev)) => outcome.events.push(ev),
                Ok(None) => {}
                Err(e) => {
                    if !on {
                        off_failed = true;
                    }
                    outcome.failures.push((kind, e));
                }
            }
        }
        outcome
    }

    /// Command both actuators off now, ignoring overrides and the cycle
    /// limit. Every relay is sent the off command even if it is believed
    /// off already; events are emitted only for real transitions.
    pub fn shutdown<'a>(
        &mut self,
        ctx: &TickContext,
        heater: &'a mut dyn Actuator,
        cooler: &'a mut dyn Actuator,
    ) -> SafetyOutcome {
        let mut outcome = SafetyOutcome {
            heater_on: false,
            cooler_on: false,
            events: Vec::new(),
            failures: Vec::new(),
        };
        for (kind, dev) in [(ActuatorKind::Heater, heater), (ActuatorKind::Cooler, cooler)] {
            let ch = self.channel_mut(kind);
            ch.forced = None;
            ch.intended = false;
            // Forces the call through even when acknowledged off
            ch.unknown = true;
            match self.drive(kind, false, dev, ctx) {
                Ok(Some(ev)) => outcome.events.push(ev),
                Ok(None) => {}
                Err(e) => outcome.failures.push((kind, e)),
            }
        }
        outcome
    }

    fn drive(
        &mut self,
        kind: ActuatorKind,
        on: bool,
        dev: &mut dyn Actuator,
        ctx: &TickContext,
    ) -> Result<Option<ControlEvent>, FermentError> {
        let ch = self.channel_mut(kind);
        if !ch.unknown && ch.acked == on {
            return Ok(None);
        }
        match dev.set(on) {
            Ok(()) => {
                ch.unknown = false;
                if ch.acked == on {
                    tracing::debug!(actuator = %kind, on, "state confirmed after retry");
                    return Ok(None);
                }
                ch.acked = on;
                ch.last_transition_ms = Some(ctx.now_ms);
                let action = ControlAction::new(kind, on);
                tracing::info!(%action, temp = ctx.wort_temp, target = ctx.target_temp, "actuator transition");
                Ok(Some(ControlEvent {
                    timestamp_ms: ctx.now_ms,
                    action,
                    wort_temp: ctx.wort_temp,
                    ambient_temp: ctx.ambient_temp,
                    target_temp: ctx.target_temp,
                }))
            }
            Err(e) => {
                ch.unknown = true;
                let err = map_actuator_error(kind, on, &*e);
                tracing::warn!(actuator = %kind, on, error = %err, "actuator command failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingActuator;
    use crate::util::MILLIS_PER_MIN;

    fn ctx(now_ms: u64, temp: f64) -> TickContext {
        TickContext {
            now_ms,
            wort_temp: temp,
            ambient_temp: Some(15.0),
            target_temp: 20.0,
        }
    }

    #[test]
    fn both_requested_keeps_the_one_correcting_deviation() {
        let mut s = SafetyLayer::new(SafetyCfg::default());
        assert_eq!(s.resolve(true, true, &ctx(0, 18.0)), (true, false));
        let mut s = SafetyLayer::new(SafetyCfg::default());
        assert_eq!(s.resolve(true, true, &ctx(0, 22.0)), (false, true));
    }

    #[test]
    fn events_only_on_acknowledged_transitions() {
        let mut s = SafetyLayer::new(SafetyCfg::default());
        let (mut h, mut c) = (RecordingActuator::default(), RecordingActuator::default());
        let out = s.apply(true, false, &ctx(0, 18.0), &mut h, &mut c);
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].action, ControlAction::HeaterOn);
        // Same decision again: no-op tick, no calls, no events
        let out = s.apply(true, false, &ctx(MILLIS_PER_MIN, 18.2), &mut h, &mut c);
        assert!(out.events.is_empty());
        assert_eq!(h.calls(), vec![true]);
        assert!(c.calls().is_empty());
    }

    #[test]
    fn min_cycle_suppresses_early_transition() {
        let mut s = SafetyLayer::new(SafetyCfg {
            min_cycle_ms: 5 * MILLIS_PER_MIN,
        });
        let (mut h, mut c) = (RecordingActuator::default(), RecordingActuator::default());
        s.apply(true, false, &ctx(0, 18.0), &mut h, &mut c);
        let out = s.apply(false, false, &ctx(2 * MILLIS_PER_MIN, 19.9), &mut h, &mut c);
        assert!(out.heater_on);
        assert!(out.events.is_empty());
        let out = s.apply(false, false, &ctx(5 * MILLIS_PER_MIN, 20.1), &mut h, &mut c);
        assert!(!out.heater_on);
        assert_eq!(out.events[0].action, ControlAction::HeaterOff);
    }

    #[test]
    fn held_heater_blocks_cooler() {
        let mut s = SafetyLayer::new(SafetyCfg::default());
        let (mut h, mut c) = (RecordingActuator::default(), RecordingActuator::default());
        s.apply(true, false, &ctx(0, 18.0), &mut h, &mut c);
        // Controller flips to cooling a minute later; heater is cycle-locked on
        let out = s.apply(false, true, &ctx(MILLIS_PER_MIN, 21.0), &mut h, &mut c);
        assert_eq!((out.heater_on, out.cooler_on), (true, false));
        assert!(c.calls().is_empty());
    }

    #[test]
    fn failed_call_is_reissued_next_tick() {
        let mut s = SafetyLayer::new(SafetyCfg::default());
        let (mut h, mut c) = (RecordingActuator::default(), RecordingActuator::default());
        h.fail_next(1);
        let out = s.apply(true, false, &ctx(0, 18.0), &mut h, &mut c);
        assert_eq!(out.failures.len(), 1);
        assert!(out.events.is_empty());
        assert_eq!(s.acknowledged(ActuatorKind::Heater), None);

        let out = s.apply(true, false, &ctx(MILLIS_PER_MIN, 18.0), &mut h, &mut c);
        assert!(out.failures.is_empty());
        assert_eq!(out.events.len(), 1);
        assert_eq!(s.acknowledged(ActuatorKind::Heater), Some(true));
        assert_eq!(h.calls(), vec![true, true]);
    }

    #[test]
    fn failed_off_defers_on() {
        let mut s = SafetyLayer::new(SafetyCfg { min_cycle_ms: 0 });
        let (mut h, mut c) = (RecordingActuator::default(), RecordingActuator::default());
        s.apply(true, false, &ctx(0, 18.0), &mut h, &mut c);
        h.fail_next(1);
        let out = s.apply(false, true, &ctx(MILLIS_PER_MIN, 22.0), &mut h, &mut c);
        assert_eq!(out.failures.len(), 1);
        assert!(c.calls().is_empty(), "cooler must wait for heater off");
        let out = s.apply(false, true, &ctx(2 * MILLIS_PER_MIN, 22.0), &mut h, &mut c);
        let actions: Vec<_> = out.events.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![ControlAction::HeaterOff, ControlAction::CoolerOn]);
    }

    #[test]
    fn shutdown_ignores_cycle_limit_and_overrides() {
        let mut s = SafetyLayer::new(SafetyCfg {
            min_cycle_ms: 5 * MILLIS_PER_MIN,
        });
        let (mut h, mut c) = (RecordingActuator::default(), RecordingActuator::default());
        s.set_override(ActuatorKind::Heater, true, 60 * MILLIS_PER_MIN);
        s.apply(false, false, &ctx(0, 18.0), &mut h, &mut c);

        let out = s.shutdown(&ctx(MILLIS_PER_MIN, 18.1), &mut h, &mut c);
        let actions: Vec<_> = out.events.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![ControlAction::HeaterOff]);
        assert_eq!(out.events[0].timestamp_ms, MILLIS_PER_MIN);
        assert_eq!(h.calls(), vec![true, false]);
        // Sent off even though it was never on
        assert_eq!(c.calls(), vec![false]);
        assert_eq!(s.active_override(ActuatorKind::Heater, MILLIS_PER_MIN), None);
        assert_eq!(s.acknowledged(ActuatorKind::Heater), Some(false));
    }

    #[test]
    fn forcing_one_on_clears_the_other() {
        let mut s = SafetyLayer::new(SafetyCfg::default());
        s.set_override(ActuatorKind::Cooler, true, 10_000);
        s.set_override(ActuatorKind::Heater, true, 10_000);
        assert_eq!(s.active_override(ActuatorKind::Cooler, 0), None);
        assert!(s.active_override(ActuatorKind::Heater, 0).is_some());
        assert_eq!(s.active_override(ActuatorKind::Heater, 10_000), None);
    }

    #[test]
    fn action_codes_round_trip() {
        for a in [
            ControlAction::HeaterOn,
            ControlAction::HeaterOff,
            ControlAction::CoolerOn,
            ControlAction::CoolerOff,
        ] {
            assert_eq!(ControlAction::from_code(a.code()), Some(a));
            assert_eq!(ControlAction::new(a.kind(), a.is_on()), a);
        }
    }
}

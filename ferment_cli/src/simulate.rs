//! `simulate`: the full control path against a simulated vessel.
//!
//! Runs on a manual clock, one control tick per step, so a day of
//! fermentation takes well under a second. Ctrl-C stops early and still
//! prints the summary.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use serde_json::json;

use ferment_core::thermal::join_observations;
use ferment_core::util::{MILLIS_PER_HOUR, hours_to_ms};
use ferment_core::{
    ActuatorKind, BatchSpec, ControlEvent, ControlLoop, CoreConfig, FermentError, HistoryStore, MemoryStore, Pipeline,
    StoreWriter, TemperaturePoint, ThermalModel,
};
use ferment_hardware::{SimulatedRelay, SimulatedVessel};
use ferment_traits::{Clock, ManualClock};

const DEVICE: &str = "sim-vessel";
const BATCH: &str = "sim-batch";

/// Gravity the simulated hydrometer reports after `hours`.
fn gravity_at(hours: f64) -> f64 {
    1.010 + 0.040 * (-0.03 * hours).exp()
}

#[derive(Debug, Clone, Copy)]
pub struct SimParams {
    pub target: f64,
    pub ambient: f64,
    pub initial: f64,
    pub hours: f64,
    pub relearn_hours: f64,
    pub inject_faults: usize,
}

#[derive(Debug, Default)]
struct Stats {
    ticks: u64,
    abs_error_sum: f64,
    // Worst deviation once the wort has first reached the target
    settled_max_error: Option<f64>,
    failures: usize,
    relearns: usize,
    valid_models: usize,
    events: usize,
}

/// Drop temperature points the learner can no longer see. Of the events
/// before the cutoff only the newest per actuator survives, so the relay
/// state at the start of the window is still known.
fn trim_to_window(temps: &mut Vec<TemperaturePoint>, events: &mut Vec<ControlEvent>, now_ms: u64, window_ms: u64) {
    let since = now_ms.saturating_sub(window_ms);
    temps.retain(|p| p.timestamp_ms >= since);
    let latest_before = |kind: ActuatorKind| {
        events
            .iter()
            .filter(|e| e.timestamp_ms < since && e.action.kind() == kind)
            .map(|e| e.timestamp_ms)
            .max()
    };
    let (heater, cooler) = (latest_before(ActuatorKind::Heater), latest_before(ActuatorKind::Cooler));
    events.retain(|e| {
        e.timestamp_ms >= since
            || Some(e.timestamp_ms)
                == match e.action.kind() {
                    ActuatorKind::Heater => heater,
                    ActuatorKind::Cooler => cooler,
                }
    });
}

pub fn run_simulate(mut cfg: CoreConfig, p: SimParams, json_mode: bool) -> eyre::Result<()> {
    if !(p.hours > 0.0 && p.hours.is_finite()) {
        eyre::bail!("invalid --hours {}: expected a positive duration", p.hours);
    }
    if !(p.relearn_hours >= 0.0 && p.relearn_hours.is_finite()) {
        eyre::bail!("invalid --relearn-hours {}: expected zero or a positive duration", p.relearn_hours);
    }
    // Only temperature matters here
    cfg.features.prediction = false;
    let cfg = Arc::new(cfg);
    let tick_ms = cfg.control.tick_ms.max(1);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || stop_handler.store(true, Ordering::SeqCst)).wrap_err("install Ctrl-C handler")?;

    let (heater, cooler) = (SimulatedRelay::new(), SimulatedRelay::new());
    heater.fail_next(p.inject_faults);
    cooler.fail_next(p.inject_faults);
    let mut vessel = SimulatedVessel::new(p.initial, p.ambient, heater.clone(), cooler.clone());

    // Samples and transitions are persisted the way a deployment would
    let store = Arc::new(Mutex::new(MemoryStore::new()));
    let pipeline = Arc::new(
        Pipeline::new(cfg.clone()).with_store(StoreWriter::spawn(store.clone(), StoreWriter::DEFAULT_QUEUE)),
    );
    let control = ControlLoop::new(cfg.clone(), pipeline.clone())
        .with_store(StoreWriter::spawn(store.clone(), StoreWriter::DEFAULT_QUEUE));
    let ambient = p.ambient;
    control.register_batch(
        BATCH,
        BatchSpec {
            device_id: DEVICE.into(),
            target_temp: p.target,
            heater: Box::new(heater.clone()),
            cooler: Box::new(cooler.clone()),
            ambient: Box::new(move || Some(ambient)),
        },
    )?;

    let clock = ManualClock::new(0);
    let end_ms = hours_to_ms(p.hours);
    let relearn_ms = hours_to_ms(p.relearn_hours);
    let mut next_relearn = relearn_ms;
    let mut temps: Vec<TemperaturePoint> = Vec::new();
    let mut events: Vec<ControlEvent> = Vec::new();
    let mut last_model: Option<ThermalModel> = None;
    let mut stats = Stats::default();
    let band = cfg.control.hysteresis;

    tracing::info!(target = p.target, ambient = p.ambient, hours = p.hours, "simulation started");
    while clock.now_ms() < end_ms {
        if stop.load(Ordering::SeqCst) {
            tracing::info!(at_ms = clock.now_ms(), "simulation interrupted");
            break;
        }
        let now = clock.now_ms();
        let temp = vessel.temp();
        let gravity = gravity_at(now as f64 / MILLIS_PER_HOUR as f64);
        pipeline
            .process_reading(DEVICE, gravity, temp, now)
            .map_err(|e| eyre::Report::new(FermentError::InvalidSample(e)))?;
        temps.push(TemperaturePoint {
            timestamp_ms: now,
            temp,
            ambient: vessel.ambient(),
        });

        let report = control.tick(BATCH, now)?;
        events.extend(report.outcome.events.iter().copied());
        stats.events += report.outcome.events.len();
        stats.failures += report.outcome.failures.len();
        stats.ticks += 1;
        let err = (temp - p.target).abs();
        stats.abs_error_sum += err;
        if let Some(max) = stats.settled_max_error.as_mut() {
            *max = max.max(err);
        } else if err <= band {
            stats.settled_max_error = Some(err);
        }

        if relearn_ms > 0 && now >= next_relearn {
            let obs = join_observations(&temps, &events);
            let model = control.relearn(BATCH, &obs, now)?;
            stats.relearns += 1;
            if model.valid {
                stats.valid_models += 1;
                last_model = Some(model);
            }
            next_relearn = next_relearn.saturating_add(relearn_ms);
            trim_to_window(&mut temps, &mut events, now, cfg.thermal.window_ms);
        }

        vessel.advance(Duration::from_millis(tick_ms));
        clock.advance(Duration::from_millis(tick_ms));
    }

    let state = control.controller_state(BATCH)?;
    let end = control.remove_batch(BATCH, clock.now_ms())?;
    stats.events += end.events.len();
    // Dropping both owners drains and joins the writer threads
    drop(control);
    drop(pipeline);
    let persisted_samples = store.query_history(DEVICE, 0, usize::MAX)?.len();
    let persisted_events = store.query_control_history(BATCH, 0)?.len();
    let interrupted = stop.load(Ordering::SeqCst);
    let mean_abs_error = if stats.ticks == 0 {
        0.0
    } else {
        stats.abs_error_sum / stats.ticks as f64
    };

    if json_mode {
        let model = last_model.map(|m| {
            json!({
                "heating_rate": m.heating_rate,
                "cooling_rate": m.cooling_rate,
                "ambient_coupling": m.ambient_coupling,
                "learned_at_ms": m.learned_at_ms,
            })
        });
        let line = json!({
            "type": "simulation",
            "ticks": stats.ticks,
            "target": p.target,
            "final_temp": vessel.temp(),
            "mean_abs_error": mean_abs_error,
            "settled_max_error": stats.settled_max_error,
            "heater_switches": heater.switches(),
            "cooler_switches": cooler.switches(),
            "events": stats.events,
            "persisted_samples": persisted_samples,
            "persisted_events": persisted_events,
            "failures": stats.failures,
            "relearns": stats.relearns,
            "valid_models": stats.valid_models,
            "controller_state": state.to_string(),
            "model": model,
            "interrupted": interrupted,
        });
        println!("{line}");
    } else {
        println!(
            "simulated {} ticks: final {:.2} °C (target {:.2}), mean |error| {:.3} °C",
            stats.ticks,
            vessel.temp(),
            p.target,
            mean_abs_error
        );
        if let Some(max) = stats.settled_max_error {
            println!("worst deviation after settling: {max:.3} °C");
        }
        println!(
            "heater switched {}x, cooler switched {}x, {} failed commands",
            heater.switches(),
            cooler.switches(),
            stats.failures
        );
        println!(
            "relearned {}x ({} valid), controller {state}",
            stats.relearns, stats.valid_models
        );
        println!("persisted {persisted_samples} samples and {persisted_events} control events");
        if let Some(m) = last_model {
            println!(
                "model: heat {:.2} °C/h, cool {:.2} °C/h, coupling {:.3}/h",
                m.heating_rate, m.cooling_rate, m.ambient_coupling
            );
        }
        if interrupted {
            println!("interrupted");
        }
    }
    Ok(())
}

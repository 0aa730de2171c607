//! Control loop: per-batch controller, safety layer and actuators, plus a
//! background scheduler that ticks every registered batch.
//!
//! Batches are independent. Each lives behind its own mutex; the registry
//! lock is only held long enough to clone the batch handle, so ticks for
//! different batches may run concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use ferment_traits::{Actuator, Clock};

use crate::config::CoreConfig;
use crate::controller::{Controller, ControllerState, Decision};
use crate::error::{BuildError, FermentError, Result};
use crate::pipeline::Pipeline;
use crate::safety::{ActuatorKind, SafetyLayer, SafetyOutcome, TickContext};
use crate::store::StoreWriter;
use crate::thermal::{self, ThermalModel, ThermalObservation};
use crate::util::{lock, read, write};

/// Reads the current ambient temperature, if known.
pub type AmbientSource = Box<dyn Fn() -> Option<f64> + Send>;

/// Everything needed to control one batch.
pub struct BatchSpec {
    pub device_id: String,
    pub target_temp: f64,
    pub heater: Box<dyn Actuator + Send>,
    pub cooler: Box<dyn Actuator + Send>,
    pub ambient: AmbientSource,
}

struct BatchControl {
    spec: BatchSpec,
    // Created on first evaluation
    controller: Option<Controller>,
    safety: SafetyLayer,
}

/// What one tick decided and did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub batch_id: String,
    pub now_ms: u64,
    pub temp: f64,
    pub ambient: Option<f64>,
    pub state: ControllerState,
    pub decision: Decision,
    pub outcome: SafetyOutcome,
}

pub struct ControlLoop {
    cfg: RwLock<Arc<CoreConfig>>,
    pipeline: Arc<Pipeline>,
    batches: RwLock<HashMap<String, Arc<Mutex<BatchControl>>>>,
    store: Option<StoreWriter>,
}

impl ControlLoop {
    pub fn new(cfg: Arc<CoreConfig>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            cfg: RwLock::new(cfg),
            pipeline,
            batches: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Append every realized transition to `store` in the background.
    pub fn with_store(mut self, store: StoreWriter) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> Arc<CoreConfig> {
        read(&self.cfg).clone()
    }

    /// Install a new configuration snapshot; batches pick it up on their
    /// next tick.
    pub fn set_config(&self, cfg: Arc<CoreConfig>) {
        *write(&self.cfg) = cfg;
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    fn batch(&self, batch_id: &str) -> Result<Arc<Mutex<BatchControl>>> {
        read(&self.batches)
            .get(batch_id)
            .cloned()
            .ok_or_else(|| eyre::Report::new(BuildError::UnknownBatch(batch_id.to_owned())))
    }

    pub fn register_batch(&self, batch_id: &str, spec: BatchSpec) -> Result<()> {
        if !spec.target_temp.is_finite() {
            return Err(eyre::Report::new(BuildError::InvalidConfig("target_temp must be finite")));
        }
        let cfg = self.config();
        let mut batches = write(&self.batches);
        if batches.contains_key(batch_id) {
            return Err(eyre::Report::new(BuildError::DuplicateBatch(batch_id.to_owned())));
        }
        tracing::info!(batch = batch_id, device = %spec.device_id, target = spec.target_temp, "batch registered");
        batches.insert(
            batch_id.to_owned(),
            Arc::new(Mutex::new(BatchControl {
                spec,
                controller: None,
                safety: SafetyLayer::new(cfg.safety.clone()),
            })),
        );
        Ok(())
    }

    /// Drop a batch. Both actuators are commanded off through the safety
    /// layer first, so the off transitions are logged and persisted like
    /// any other; the batch is removed even if those commands fail.
    pub fn remove_batch(&self, batch_id: &str, now_ms: u64) -> Result<SafetyOutcome> {
        let Some(slot) = write(&self.batches).remove(batch_id) else {
            return Err(eyre::Report::new(BuildError::UnknownBatch(batch_id.to_owned())));
        };
        let mut guard = lock(&slot);
        let b = &mut *guard;
        let ctx = TickContext {
            now_ms,
            // Unknown once the device has gone
            wort_temp: self
                .pipeline
                .temperature(&b.spec.device_id)
                .map_or(f64::NAN, |t| t.value),
            ambient_temp: (b.spec.ambient)().filter(|a| a.is_finite()),
            target_temp: b.spec.target_temp,
        };
        let outcome = b.safety.shutdown(&ctx, &mut b.spec.heater, &mut b.spec.cooler);
        self.persist(batch_id, &outcome);
        tracing::info!(
            batch = batch_id,
            transitions = outcome.events.len(),
            failures = outcome.failures.len(),
            "batch removed"
        );
        Ok(outcome)
    }

    fn persist(&self, batch_id: &str, outcome: &SafetyOutcome) {
        if let Some(store) = self.store.as_ref() {
            for ev in &outcome.events {
                store.append_control_event(batch_id, *ev);
            }
        }
    }

    /// Registered batch ids, sorted.
    pub fn batch_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read(&self.batches).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn set_target(&self, batch_id: &str, target_temp: f64) -> Result<()> {
        if !target_temp.is_finite() {
            return Err(eyre::Report::new(BuildError::InvalidConfig("target_temp must be finite")));
        }
        let slot = self.batch(batch_id)?;
        lock(&slot).spec.target_temp = target_temp;
        Ok(())
    }

    pub fn set_override(&self, batch_id: &str, kind: ActuatorKind, on: bool, until_ms: u64) -> Result<()> {
        let slot = self.batch(batch_id)?;
        lock(&slot).safety.set_override(kind, on, until_ms);
        Ok(())
    }

    pub fn clear_override(&self, batch_id: &str, kind: ActuatorKind) -> Result<()> {
        let slot = self.batch(batch_id)?;
        lock(&slot).safety.clear_override(kind);
        Ok(())
    }

    pub fn controller_state(&self, batch_id: &str) -> Result<ControllerState> {
        let slot = self.batch(batch_id)?;
        let state = lock(&slot)
            .controller
            .as_ref()
            .map_or(ControllerState::NoModel, Controller::state);
        Ok(state)
    }

    /// Learn a model from `observations` and, when it is valid and
    /// predictive control is enabled, hand it to the batch's controller.
    pub fn relearn(&self, batch_id: &str, observations: &[ThermalObservation], now_ms: u64) -> Result<ThermalModel> {
        let cfg = self.config();
        let slot = self.batch(batch_id)?;
        let model = thermal::learn(observations, now_ms, &cfg.thermal);
        if let Some(reason) = model.rejection {
            tracing::info!(batch = batch_id, %reason, "thermal model rejected");
            return Ok(model);
        }
        if !cfg.features.predictive_control {
            tracing::debug!(batch = batch_id, "predictive control disabled; model not installed");
            return Ok(model);
        }
        let mut b = lock(&slot);
        b.controller
            .get_or_insert_with(|| Controller::new(cfg.control.clone()))
            .set_model(model);
        Ok(model)
    }

    /// Evaluate one batch: controller decision, safety layer, actuation.
    pub fn tick(&self, batch_id: &str, now_ms: u64) -> Result<TickReport> {
        let cfg = self.config();
        let slot = self.batch(batch_id)?;
        let mut guard = lock(&slot);
        let b = &mut *guard;

        let temp = self
            .pipeline
            .temperature(&b.spec.device_id)
            .map(|t| t.value)
            .ok_or_else(|| {
                eyre::Report::new(FermentError::State(format!(
                    "no temperature estimate for device {}",
                    b.spec.device_id
                )))
            })?;
        let ambient = (b.spec.ambient)().filter(|a| a.is_finite());
        let target = b.spec.target_temp;

        let controller = b
            .controller
            .get_or_insert_with(|| Controller::new(cfg.control.clone()));
        controller.set_config(cfg.control.clone());
        b.safety.set_config(cfg.safety.clone());

        let decision = controller.compute_action(
            temp,
            target,
            ambient,
            b.safety.intended(ActuatorKind::Heater),
            b.safety.intended(ActuatorKind::Cooler),
        );
        let state = controller.state();

        let ctx = TickContext {
            now_ms,
            wort_temp: temp,
            ambient_temp: ambient,
            target_temp: target,
        };
        let outcome = b.safety.apply(
            decision.heater_on,
            decision.cooler_on,
            &ctx,
            &mut b.spec.heater,
            &mut b.spec.cooler,
        );
        // Divergence is judged against what the relays did, which an
        // override or the cycle limit may have changed
        controller.record_actuation(
            b.safety.acknowledged(ActuatorKind::Heater),
            b.safety.acknowledged(ActuatorKind::Cooler),
            temp,
            ambient,
        );
        self.persist(batch_id, &outcome);
        Ok(TickReport {
            batch_id: batch_id.to_owned(),
            now_ms,
            temp,
            ambient,
            state,
            decision,
            outcome,
        })
    }
}

/// Runs [`ControlLoop::tick`] for every batch on a background thread.
///
/// Safety: exactly one thread per scheduler, stopped and joined on drop.
pub struct ControlScheduler {
    shutdown: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl ControlScheduler {
    // Longest single sleep, bounding shutdown latency
    const SLICE: Duration = Duration::from_millis(100);

    pub fn spawn<C: Clock + Send + 'static>(control: Arc<ControlLoop>, clock: C) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let ticks = Arc::new(AtomicU64::new(0));
        let ticks_clone = ticks.clone();

        let join_handle = std::thread::spawn(move || {
            while !shutdown_clone.load(Ordering::Relaxed) {
                let now = clock.now_ms();
                for id in control.batch_ids() {
                    if let Err(e) = control.tick(&id, now) {
                        tracing::warn!(batch = %id, error = %e, "control tick failed");
                    }
                }
                ticks_clone.fetch_add(1, Ordering::Relaxed);

                let deadline = now.saturating_add(control.config().control.tick_ms.max(1));
                loop {
                    if shutdown_clone.load(Ordering::Relaxed) {
                        break;
                    }
                    let now = clock.now_ms();
                    if now >= deadline {
                        break;
                    }
                    clock.sleep(Duration::from_millis(deadline - now).min(Self::SLICE));
                }
            }
            tracing::trace!("Control scheduler thread exiting cleanly");
        });

        Self {
            shutdown,
            ticks,
            join_handle: Some(join_handle),
        }
    }

    /// Completed scheduler passes.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for ControlScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("Control scheduler thread joined successfully"),
                Err(e) => tracing::warn!(?e, "Control scheduler thread panicked during shutdown"),
            }
        }
    }
}

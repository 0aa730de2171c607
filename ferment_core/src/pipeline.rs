//! Device pipeline orchestrator.
//!
//! Owns one [`DeviceState`] per device id and chains, for every reading:
//! estimator (gravity and temperature) → anomaly detector → history append →
//! predictor (when enabled).
//!
//! Each device sits behind its own mutex inside a registry. `hydrate` and
//! `reset` build a replacement state without holding any lock and install
//! it with a single swap under the device mutex, so a concurrent reader sees
//! either the old state or the complete new one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::anomaly::{self, AnomalyReport};
use crate::config::CoreConfig;
use crate::error::{HydrationFailure, InvalidSample};
use crate::estimator::{FilteredSample, StateEstimator};
use crate::history::{HistoryBuffer, HistoryRecord, HistorySample};
use crate::predictor::{self, PredictionResult};
use crate::store::StoreWriter;
use crate::util::{lock, read, write};

/// Per-device filters, history and the latest anomaly evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    gravity: StateEstimator,
    temperature: StateEstimator,
    history: HistoryBuffer,
    last_anomaly: AnomalyReport,
    last_update_ms: Option<u64>,
}

/// Result of one accepted reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedOutputs {
    pub gravity: FilteredSample,
    pub temperature: Option<FilteredSample>,
    pub anomaly: AnomalyReport,
    /// `None` when prediction is disabled.
    pub prediction: Option<PredictionResult>,
}

/// Current estimate of one signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalEstimate {
    pub value: f64,
    pub rate_per_hour: f64,
    pub variance: f64,
    pub confidence: f64,
}

/// A detached copy of a device's state for display or comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub gravity: Option<SignalEstimate>,
    pub temperature: Option<SignalEstimate>,
    pub last_update_ms: Option<u64>,
    pub last_anomaly: AnomalyReport,
    pub history: Vec<HistorySample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HydrationReport {
    pub attempted: usize,
    pub loaded: usize,
    /// Records missing a timestamp or gravity, or rejected by the estimator.
    pub skipped: usize,
    /// Valid records older than the newest `max_samples`.
    pub truncated: usize,
}

fn estimate(e: &StateEstimator) -> Option<SignalEstimate> {
    Some(SignalEstimate {
        value: e.value()?,
        rate_per_hour: e.rate()?,
        variance: e.variance()?,
        confidence: e.confidence()?,
    })
}

impl DeviceState {
    pub fn new(cfg: &CoreConfig) -> Self {
        Self {
            gravity: StateEstimator::new(cfg.gravity.clone()),
            temperature: StateEstimator::new(cfg.temperature.clone()),
            history: HistoryBuffer::new(cfg.history_max_samples),
            last_anomaly: AnomalyReport::default(),
            last_update_ms: None,
        }
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn last_update_ms(&self) -> Option<u64> {
        self.last_update_ms
    }

    /// Validate both signals, then update filters, evaluate anomalies and
    /// append the history sample. Nothing is mutated on error.
    fn ingest(
        &mut self,
        gravity: f64,
        temperature: Option<f64>,
        ts_ms: u64,
        cfg: &CoreConfig,
    ) -> Result<(FilteredSample, Option<FilteredSample>), InvalidSample> {
        self.gravity.validate(gravity, ts_ms)?;
        if let Some(t) = temperature {
            self.temperature.validate(t, ts_ms)?;
        }
        let g = self.gravity.observe(gravity, ts_ms)?;
        let t = temperature
            .map(|t| self.temperature.observe(t, ts_ms))
            .transpose()?;

        let report = if cfg.features.anomaly_detection {
            let since = ts_ms.saturating_sub(cfg.anomaly.window_ms);
            anomaly::evaluate(&g, &self.history.since(since), &cfg.anomaly)
        } else {
            AnomalyReport::default()
        };

        self.history.push(HistorySample {
            timestamp_ms: ts_ms,
            raw: g.raw,
            value: g.value,
            rate_per_hour: g.rate_per_hour,
            confidence: g.confidence,
            anomaly: report.anomaly,
            reasons: report.reasons.clone(),
            raw_temperature: t.map(|s| s.raw),
            temperature: t.map(|s| s.value),
        });
        self.last_anomaly = report;
        self.last_update_ms = Some(ts_ms);
        Ok((g, t))
    }

    fn predict(&self, cfg: &CoreConfig) -> PredictionResult {
        let points: Vec<(u64, f64)> = self
            .history
            .iter()
            .map(|s| (s.timestamp_ms, s.value))
            .collect();
        predictor::predict(&points, &cfg.predictor)
    }

    fn snapshot(&self, device_id: &str) -> DeviceSnapshot {
        DeviceSnapshot {
            device_id: device_id.to_owned(),
            gravity: estimate(&self.gravity),
            temperature: estimate(&self.temperature),
            last_update_ms: self.last_update_ms,
            last_anomaly: self.last_anomaly.clone(),
            history: self.history.to_vec(),
        }
    }
}

/// Build a device state from historical records, off to the side.
fn build_from_history(
    records: Vec<HistoryRecord>,
    max_samples: usize,
    cfg: &CoreConfig,
) -> Result<(DeviceState, HydrationReport), HydrationFailure> {
    let attempted = records.len();
    let mut valid: Vec<(u64, f64, Option<f64>)> = records
        .iter()
        .filter_map(|r| Some((r.timestamp_ms?, r.gravity?, r.temperature)))
        .collect();
    let mut skipped = attempted - valid.len();

    if max_samples == 0 {
        return Err(HydrationFailure {
            attempted,
            loaded: 0,
            skipped,
            reason: "max_samples is zero".into(),
        });
    }

    // Stable: equal timestamps keep input order; the estimator rejects the
    // later duplicates
    valid.sort_by_key(|&(ts, _, _)| ts);
    let truncated = valid.len().saturating_sub(max_samples);
    let mut state = DeviceState::new(cfg);
    let mut loaded = 0usize;
    for &(ts, gravity, temp) in &valid[truncated..] {
        // Temperature is optional here: an unusable one is dropped, not fatal
        let temp = temp.filter(|&t| state.temperature.validate(t, ts).is_ok());
        match state.ingest(gravity, temp, ts, cfg) {
            Ok(_) => loaded += 1,
            Err(e) => {
                tracing::debug!(ts, gravity, error = %e, "hydration record skipped");
                skipped += 1;
            }
        }
    }

    if loaded == 0 {
        return Err(HydrationFailure {
            attempted,
            loaded,
            skipped,
            reason: "no usable records".into(),
        });
    }
    Ok((
        state,
        HydrationReport {
            attempted,
            loaded,
            skipped,
            truncated,
        },
    ))
}

/// Registry of per-device pipelines.
pub struct Pipeline {
    cfg: RwLock<Arc<CoreConfig>>,
    devices: RwLock<HashMap<String, Arc<Mutex<DeviceState>>>>,
    store: Option<StoreWriter>,
}

impl Pipeline {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self {
            cfg: RwLock::new(cfg),
            devices: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Append every accepted sample to `store` in the background.
    pub fn with_store(mut self, store: StoreWriter) -> Self {
        self.store = Some(store);
        self
    }

    /// Install a new configuration snapshot. Existing filters keep their
    /// tuning until the device is reset or rehydrated.
    pub fn set_config(&self, cfg: Arc<CoreConfig>) {
        *write(&self.cfg) = cfg;
    }

    pub fn config(&self) -> Arc<CoreConfig> {
        read(&self.cfg).clone()
    }

    fn device(&self, device_id: &str) -> Option<Arc<Mutex<DeviceState>>> {
        read(&self.devices).get(device_id).cloned()
    }

    fn device_or_insert(&self, device_id: &str, cfg: &CoreConfig) -> Arc<Mutex<DeviceState>> {
        if let Some(d) = self.device(device_id) {
            return d;
        }
        write(&self.devices)
            .entry(device_id.to_owned())
            .or_insert_with(|| {
                tracing::info!(device = device_id, "device registered");
                Arc::new(Mutex::new(DeviceState::new(cfg)))
            })
            .clone()
    }

    /// Swap `state` in as the live state of `device_id`.
    fn install(&self, device_id: &str, state: DeviceState, cfg: &CoreConfig) {
        let slot = self.device_or_insert(device_id, cfg);
        *lock(&slot) = state;
    }

    pub fn process_reading(
        &self,
        device_id: &str,
        gravity: f64,
        temperature: f64,
        timestamp_ms: u64,
    ) -> Result<ProcessedOutputs, InvalidSample> {
        let cfg = self.config();
        let slot = self.device_or_insert(device_id, &cfg);
        let mut dev = lock(&slot);
        let (g, t) = match dev.ingest(gravity, Some(temperature), timestamp_ms, &cfg) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(device = device_id, gravity, temperature, ts = timestamp_ms, error = %e, "sample rejected");
                return Err(e);
            }
        };
        let prediction = cfg.features.prediction.then(|| dev.predict(&cfg));
        if let (Some(store), Some(last)) = (self.store.as_ref(), dev.history.last()) {
            store.append_sample(device_id, last.clone());
        }
        tracing::trace!(
            device = device_id,
            gravity = g.value,
            rate = g.rate_per_hour,
            confidence = g.confidence,
            "reading processed"
        );
        Ok(ProcessedOutputs {
            gravity: g,
            temperature: t,
            anomaly: dev.last_anomaly.clone(),
            prediction,
        })
    }

    /// Rebuild `device_id` from `records`, replaying at most the newest
    /// `max_samples` valid ones. On failure the live state is untouched.
    pub fn hydrate<I>(
        &self,
        device_id: &str,
        records: I,
        max_samples: usize,
    ) -> Result<HydrationReport, HydrationFailure>
    where
        I: IntoIterator<Item = HistoryRecord>,
    {
        let cfg = self.config();
        let records: Vec<HistoryRecord> = records.into_iter().collect();
        match build_from_history(records, max_samples, &cfg) {
            Ok((state, report)) => {
                self.install(device_id, state, &cfg);
                tracing::info!(
                    device = device_id,
                    attempted = report.attempted,
                    loaded = report.loaded,
                    skipped = report.skipped,
                    truncated = report.truncated,
                    "device hydrated"
                );
                Ok(report)
            }
            Err(f) => {
                tracing::warn!(device = device_id, error = %f, "hydration failed");
                Err(f)
            }
        }
    }

    /// Discard history and anchor the gravity filter at `seed`.
    pub fn reset(&self, device_id: &str, seed: f64) -> Result<(), InvalidSample> {
        let cfg = self.config();
        let mut state = DeviceState::new(&cfg);
        state.gravity.reset_to(seed)?;
        self.install(device_id, state, &cfg);
        tracing::info!(device = device_id, seed, "device reset");
        Ok(())
    }

    /// Recompute the prediction for `device_id` on demand.
    pub fn predict(&self, device_id: &str) -> Option<PredictionResult> {
        let cfg = self.config();
        let slot = self.device(device_id)?;
        let dev = lock(&slot);
        Some(dev.predict(&cfg))
    }

    /// Current filtered temperature of `device_id`, without copying history.
    pub fn temperature(&self, device_id: &str) -> Option<SignalEstimate> {
        let slot = self.device(device_id)?;
        let dev = lock(&slot);
        estimate(&dev.temperature)
    }

    pub fn snapshot(&self, device_id: &str) -> Option<DeviceSnapshot> {
        let slot = self.device(device_id)?;
        let dev = lock(&slot);
        Some(dev.snapshot(device_id))
    }

    pub fn remove(&self, device_id: &str) -> bool {
        let removed = write(&self.devices).remove(device_id).is_some();
        if removed {
            tracing::info!(device = device_id, "device removed");
        }
        removed
    }

    /// Registered device ids, sorted.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read(&self.devices).keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::MILLIS_PER_HOUR;

    fn pipeline() -> Pipeline {
        Pipeline::new(Arc::new(CoreConfig::default()))
    }

    #[test]
    fn invalid_temperature_rejects_whole_reading() {
        let p = pipeline();
        p.process_reading("a", 1.050, 20.0, 0).unwrap();
        let before = p.snapshot("a").unwrap();
        let err = p.process_reading("a", 1.049, 99.0, MILLIS_PER_HOUR).unwrap_err();
        assert!(matches!(err, InvalidSample::OutOfRange { .. }));
        assert_eq!(p.snapshot("a").unwrap(), before);
    }

    #[test]
    fn history_is_capped() {
        let cfg = CoreConfig {
            history_max_samples: 5,
            ..CoreConfig::default()
        };
        let p = Pipeline::new(Arc::new(cfg));
        for i in 0..12u64 {
            p.process_reading("a", 1.050, 20.0, i * MILLIS_PER_HOUR).unwrap();
        }
        let snap = p.snapshot("a").unwrap();
        assert_eq!(snap.history.len(), 5);
        assert_eq!(snap.history[0].timestamp_ms, 7 * MILLIS_PER_HOUR);
    }

    #[test]
    fn hydrate_counts_incomplete_and_truncated_records() {
        let p = pipeline();
        let mut records: Vec<HistoryRecord> = (0..6u64)
            .map(|i| HistoryRecord::new(i * MILLIS_PER_HOUR, 1.050 - 0.001 * i as f64, Some(20.0)))
            .collect();
        records.push(HistoryRecord {
            timestamp_ms: None,
            gravity: Some(1.040),
            temperature: None,
        });
        records.push(HistoryRecord {
            timestamp_ms: Some(99),
            gravity: None,
            temperature: Some(20.0),
        });
        let report = p.hydrate("a", records, 4).unwrap();
        assert_eq!(
            report,
            HydrationReport {
                attempted: 8,
                loaded: 4,
                skipped: 2,
                truncated: 2,
            }
        );
        let snap = p.snapshot("a").unwrap();
        assert_eq!(snap.history.first().map(|s| s.timestamp_ms), Some(2 * MILLIS_PER_HOUR));
    }

    #[test]
    fn failed_hydration_keeps_live_state() {
        let p = pipeline();
        p.process_reading("a", 1.050, 20.0, 0).unwrap();
        let before = p.snapshot("a").unwrap();
        let bad = vec![HistoryRecord::default(); 3];
        let err = p.hydrate("a", bad, 100).unwrap_err();
        assert_eq!((err.attempted, err.loaded, err.skipped), (3, 0, 3));
        assert_eq!(p.snapshot("a").unwrap(), before);
    }

    #[test]
    fn reset_discards_history() {
        let p = pipeline();
        for i in 0..5u64 {
            p.process_reading("a", 1.010, 20.0, i * MILLIS_PER_HOUR).unwrap();
        }
        p.reset("a", 1.062).unwrap();
        let snap = p.snapshot("a").unwrap();
        assert!(snap.history.is_empty());
        assert_eq!(snap.gravity.map(|g| g.value), Some(1.062));
        assert_eq!(snap.temperature, None);
        // A new cycle may restart the clock
        p.process_reading("a", 1.061, 20.0, 0).unwrap();
    }

    #[test]
    fn remove_and_ids() {
        let p = pipeline();
        p.process_reading("b", 1.050, 20.0, 0).unwrap();
        p.process_reading("a", 1.050, 20.0, 0).unwrap();
        assert_eq!(p.device_ids(), vec!["a".to_string(), "b".to_string()]);
        assert!(p.remove("a"));
        assert!(!p.remove("a"));
        assert!(p.snapshot("a").is_none());
        assert!(p.predict("a").is_none());
    }
}

//! End-to-end behaviour through the public pipeline and control loop APIs.

use std::sync::{Arc, Mutex};

use ferment_core::mocks::RecordingActuator;
use ferment_core::util::{MILLIS_PER_HOUR, MILLIS_PER_MIN};
use ferment_core::{
    ActuatorKind, AnomalyReason, BatchSpec, ControlAction, ControlLoop, CoreConfig, DecisionReason, HistoryStore,
    MemoryStore, Pipeline, StoreWriter, Unavailable,
};
use rstest::rstest;

const T0: u64 = 1_700_000_000_000;

#[test]
fn three_samples_are_normal_and_too_few_to_predict() {
    let p = Pipeline::new(Arc::new(CoreConfig::default()));
    let readings = [(0, 1.060), (3, 1.058), (6, 1.055)];
    let mut last = None;
    for (h, g) in readings {
        last = Some(p.process_reading("hydrometer", g, 19.0, T0 + h * MILLIS_PER_HOUR).unwrap());
    }
    let out = last.unwrap();
    assert!(!out.anomaly.anomaly, "{:?}", out.anomaly);
    let prediction = out.prediction.unwrap();
    assert!(!prediction.is_available());
    assert_eq!(
        prediction.reason(),
        Some(&Unavailable::InsufficientSamples { have: 3, need: 10 })
    );
}

#[test]
fn flat_gravity_after_decline_is_stuck() {
    let p = Pipeline::new(Arc::new(CoreConfig::default()));
    let step = 15 * MILLIS_PER_MIN;
    // 12 h falling 1.040 → 1.020, then 12 h flat at 1.020
    let mut last = None;
    for i in 0..=96u64 {
        let g = if i <= 48 {
            1.040 - 0.020 * i as f64 / 48.0
        } else {
            1.020
        };
        last = Some(p.process_reading("hydrometer", g, 18.0, T0 + i * step).unwrap());
    }
    let out = last.unwrap();
    assert!(out.anomaly.anomaly);
    assert!(out.anomaly.reasons.contains(&AnomalyReason::Stuck), "{:?}", out.anomaly);
    assert!(out.anomaly.severity >= 0.5);
}

fn control_loop(cfg: CoreConfig) -> (ControlLoop, RecordingActuator, RecordingActuator) {
    let cfg = Arc::new(cfg);
    let pipeline = Arc::new(Pipeline::new(cfg.clone()));
    let control = ControlLoop::new(cfg, pipeline);
    let heater = RecordingActuator::default();
    let cooler = RecordingActuator::default();
    control
        .register_batch(
            "batch-1",
            BatchSpec {
                device_id: "hydrometer".into(),
                target_temp: 20.0,
                heater: Box::new(heater.clone()),
                cooler: Box::new(cooler.clone()),
                ambient: Box::new(|| Some(15.0)),
            },
        )
        .unwrap();
    (control, heater, cooler)
}

#[rstest]
#[case(18.5, true, false, DecisionReason::BelowBand)]
#[case(21.5, false, true, DecisionReason::AboveBand)]
#[case(20.0, false, false, DecisionReason::Hold)]
fn hysteresis_without_model(
    #[case] temp: f64,
    #[case] heater_on: bool,
    #[case] cooler_on: bool,
    #[case] reason: DecisionReason,
) {
    let mut cfg = CoreConfig::default();
    cfg.control.hysteresis = 1.0;
    let (control, heater, cooler) = control_loop(cfg);
    control.pipeline().process_reading("hydrometer", 1.050, temp, T0).unwrap();

    let report = control.tick("batch-1", T0).unwrap();
    assert_eq!(report.decision.reason, reason);
    assert_eq!(
        (report.outcome.heater_on, report.outcome.cooler_on),
        (heater_on, cooler_on)
    );
    // Only actual transitions reach the relays
    assert_eq!(heater.calls(), if heater_on { vec![true] } else { vec![] });
    assert_eq!(cooler.calls(), if cooler_on { vec![true] } else { vec![] });
}

#[test]
fn override_holds_heater_until_expiry_then_control_resumes() {
    let (control, heater, cooler) = control_loop(CoreConfig::default());
    control.pipeline().process_reading("hydrometer", 1.050, 22.0, T0).unwrap();
    control
        .set_override("batch-1", ActuatorKind::Heater, true, T0 + 30 * MILLIS_PER_MIN)
        .unwrap();

    for m in 0..30 {
        let r = control.tick("batch-1", T0 + m * MILLIS_PER_MIN).unwrap();
        assert!(r.outcome.heater_on && !r.outcome.cooler_on, "minute {m}: {r:?}");
    }
    let r = control.tick("batch-1", T0 + 30 * MILLIS_PER_MIN).unwrap();
    assert!(!r.outcome.heater_on && r.outcome.cooler_on, "{r:?}");

    let actions: Vec<ControlAction> = r.outcome.events.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![ControlAction::HeaterOff, ControlAction::CoolerOn]);
    assert_eq!(heater.calls(), vec![true, false]);
    assert_eq!(cooler.calls(), vec![true]);
}

#[test]
fn tick_without_temperature_is_an_error() {
    let (control, _, _) = control_loop(CoreConfig::default());
    let err = control.tick("batch-1", T0).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ferment_core::FermentError>(),
        Some(ferment_core::FermentError::State(_))
    ));
}

#[test]
fn removing_a_batch_switches_both_actuators_off_and_records_it() {
    let shared = Arc::new(Mutex::new(MemoryStore::new()));
    let (control, heater, cooler) = control_loop(CoreConfig::default());
    let control = control.with_store(StoreWriter::spawn(shared.clone(), 64));
    control.pipeline().process_reading("hydrometer", 1.050, 18.0, T0).unwrap();
    control.tick("batch-1", T0).unwrap();
    control.remove_batch("batch-1", T0 + MILLIS_PER_MIN).unwrap();
    assert_eq!(heater.calls(), vec![true, false]);
    assert_eq!(cooler.calls(), vec![false]);
    assert!(control.batch_ids().is_empty());
    assert!(control.tick("batch-1", T0).is_err());

    // Dropping the loop drains the writer
    drop(control);
    let actions: Vec<_> = shared
        .query_control_history("batch-1", 0)
        .unwrap()
        .into_iter()
        .map(|e| (e.timestamp_ms, e.action))
        .collect();
    assert_eq!(
        actions,
        vec![(T0, ControlAction::HeaterOn), (T0 + MILLIS_PER_MIN, ControlAction::HeaterOff)]
    );
}

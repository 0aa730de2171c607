use ferment_core::config::{EstimatorCfg, PredictorCfg, SafetyCfg};
use ferment_core::mocks::RecordingActuator;
use ferment_core::predictor;
use ferment_core::safety::TickContext;
use ferment_core::util::{MILLIS_PER_HOUR, MILLIS_PER_MIN};
use ferment_core::{ActuatorKind, SafetyLayer, StateEstimator};
use proptest::prelude::*;

prop_compose! {
    // Raw gravity readings with 15–30 minute spacing
    fn readings_strategy()(
        len in 2usize..150,
    )(
        values in prop::collection::vec(1.000f64..1.100, len),
        gaps in prop::collection::vec(15u64..=30, len),
    ) -> Vec<(u64, f64)> {
        let mut ts = 0u64;
        values
            .into_iter()
            .zip(gaps)
            .map(|(v, g)| {
                ts += g * MILLIS_PER_MIN;
                (ts, v)
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Step {
    advance_min: u64,
    heat: bool,
    cool: bool,
    fail_heater: bool,
    fail_cooler: bool,
}

prop_compose! {
    fn step_strategy()(
        advance_min in 1u64..10,
        heat in any::<bool>(),
        cool in any::<bool>(),
        fail_heater in prop::bool::weighted(0.15),
        fail_cooler in prop::bool::weighted(0.15),
    ) -> Step {
        Step { advance_min, heat, cool, fail_heater, fail_cooler }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128, .. ProptestConfig::default()
    })]

    // Filtered output never jumps by more than a fixed multiple of the
    // largest raw step seen so far.
    #[test]
    fn filtered_output_moves_with_raw(readings in readings_strategy()) {
        let mut est = StateEstimator::new(EstimatorCfg::gravity());
        let mut prev: Option<(f64, f64)> = None;
        let mut max_raw_delta = 0.0f64;
        for (ts, raw) in readings {
            let out = est.observe(raw, ts).unwrap();
            if let Some((prev_raw, prev_value)) = prev {
                max_raw_delta = max_raw_delta.max((raw - prev_raw).abs());
                let moved = (out.value - prev_value).abs();
                prop_assert!(
                    moved <= 5.0 * max_raw_delta + 1e-9,
                    "filtered moved {moved} with max raw delta {max_raw_delta}"
                );
            }
            prop_assert!(out.value.is_finite() && out.rate_per_hour.is_finite());
            prop_assert!((0.0..=1.0).contains(&out.confidence));
            prev = Some((raw, out.value));
        }
    }

    #[test]
    fn actuators_never_both_on_and_respect_min_cycle(
        steps in prop::collection::vec(step_strategy(), 1..200),
    ) {
        let cfg = SafetyCfg { min_cycle_ms: 5 * MILLIS_PER_MIN };
        let mut safety = SafetyLayer::new(cfg.clone());
        let mut heater = RecordingActuator::default();
        let mut cooler = RecordingActuator::default();
        let (mut heater_acked, mut cooler_acked) = (false, false);
        let mut last_event = [None::<u64>; 2];
        let mut now = 0u64;

        for s in steps {
            now += s.advance_min * MILLIS_PER_MIN;
            heater.fail_next(usize::from(s.fail_heater));
            cooler.fail_next(usize::from(s.fail_cooler));
            let ctx = TickContext { now_ms: now, wort_temp: 19.0, ambient_temp: None, target_temp: 20.0 };
            let out = safety.apply(s.heat, s.cool, &ctx, &mut heater, &mut cooler);

            prop_assert!(!(out.heater_on && out.cooler_on));
            for ev in &out.events {
                let slot = match ev.action.kind() {
                    ActuatorKind::Heater => {
                        heater_acked = ev.action.is_on();
                        &mut last_event[0]
                    }
                    ActuatorKind::Cooler => {
                        cooler_acked = ev.action.is_on();
                        &mut last_event[1]
                    }
                };
                if let Some(prev) = *slot {
                    prop_assert!(
                        ev.timestamp_ms - prev >= cfg.min_cycle_ms,
                        "{} after {} ms", ev.action, ev.timestamp_ms - prev
                    );
                }
                *slot = Some(ev.timestamp_ms);
            }
            prop_assert!(!(heater_acked && cooler_acked), "both relays acknowledged on at {now}");
        }
    }

    #[test]
    fn accepted_fit_never_has_fg_above_og(
        og in 1.030f64..1.100,
        drop in 0.0f64..0.060,
        k in 0.005f64..0.2,
        noise in prop::collection::vec(-0.0005f64..0.0005, 40..120),
    ) {
        let cfg = PredictorCfg::default();
        let fg = og - drop;
        let points: Vec<(u64, f64)> = noise
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let t = i as f64;
                (i as u64 * MILLIS_PER_HOUR, fg + (og - fg) * (-k * t).exp() + n)
            })
            .collect();
        let res = predictor::predict(&points, &cfg);
        prop_assert_eq!(res.sample_count, points.len());
        if let Some(fit) = res.fit() {
            prop_assert!(fit.final_gravity <= fit.original_gravity + cfg.fg_tolerance, "{:?}", fit);
            prop_assert!(fit.quality >= cfg.min_quality);
            prop_assert!(fit.completion_ms >= points[0].0);
        }
    }
}

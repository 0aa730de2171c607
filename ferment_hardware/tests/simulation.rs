use std::time::Duration;

use ferment_hardware::error::HwError;
use ferment_hardware::{SimulatedRelay, SimulatedVessel};
use ferment_traits::Actuator;
use rstest::rstest;

#[rstest]
#[case::heating(true, false, 1.0)]
#[case::cooling(false, true, -1.0)]
#[case::idle(false, false, 0.0)]
fn relay_state_drives_the_plant(#[case] heat: bool, #[case] cool: bool, #[case] sign: f64) {
    let (mut heater, mut cooler) = (SimulatedRelay::new(), SimulatedRelay::new());
    let mut v = SimulatedVessel::new(18.0, 18.0, heater.clone(), cooler.clone());
    heater.set(heat).unwrap();
    cooler.set(cool).unwrap();
    v.advance(Duration::from_secs(3600));
    // At ambient the coupling term vanishes at t = 0 and stays small
    let moved = v.temp() - 18.0;
    if sign == 0.0 {
        assert!(moved.abs() < 1e-12);
    } else {
        assert!(moved * sign > 2.5, "moved {moved}");
    }
}

#[test]
fn timeouts_surface_as_hw_errors() {
    let mut relay = SimulatedRelay::new();
    relay.time_out_next(2);
    for _ in 0..2 {
        let err = relay.set(true).unwrap_err();
        assert!(matches!(err.downcast_ref::<HwError>(), Some(HwError::Timeout)));
    }
    relay.set(true).unwrap();
    assert!(relay.is_on());
    assert_eq!(relay.switches(), 1);
}

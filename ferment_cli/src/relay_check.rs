//! `relay-check`: bench test for a real relay board.
//!
//! Heater on, then cooler on, then both off. The second step requests only
//! the cooler, so the safety layer must switch the heater off before the
//! cooler comes on; the printed events show that order.

use std::time::Duration;

use serde_json::json;

use ferment_core::config::SafetyCfg;
use ferment_core::safety::TickContext;
use ferment_core::SafetyLayer;
use ferment_hardware::GpioRelay;
use ferment_traits::{Clock, SystemClock};

pub fn run_relay_check(heater_pin: u8, cooler_pin: u8, active_low: bool, hold_ms: u64, json_mode: bool) -> eyre::Result<()> {
    if heater_pin == cooler_pin {
        eyre::bail!("heater and cooler cannot share pin {heater_pin}");
    }
    let mut heater = GpioRelay::new(heater_pin, active_low)?;
    let mut cooler = GpioRelay::new(cooler_pin, active_low)?;
    // Each relay switches once per step, so no cycle limit is needed
    let mut safety = SafetyLayer::new(SafetyCfg { min_cycle_ms: 0 });
    let clock = SystemClock::new();

    for (heat, cool) in [(true, false), (false, true), (false, false)] {
        // No wort reading on the bench
        let ctx = TickContext {
            now_ms: clock.now_ms(),
            wort_temp: f64::NAN,
            ambient_temp: None,
            target_temp: f64::NAN,
        };
        let outcome = safety.apply(heat, cool, &ctx, &mut heater, &mut cooler);
        if let Some((kind, err)) = outcome.failures.into_iter().next() {
            tracing::error!(actuator = %kind, error = %err, "relay check failed");
            return Err(eyre::Report::new(err));
        }
        for ev in &outcome.events {
            if json_mode {
                let line = json!({
                    "type": "relay",
                    "timestamp_ms": ev.timestamp_ms,
                    "action": ev.action.code(),
                });
                println!("{line}");
            } else {
                println!("{} {}", ev.timestamp_ms, ev.action);
            }
        }
        if heat || cool {
            clock.sleep(Duration::from_millis(hold_ms));
        }
    }
    if !json_mode {
        println!("relay check OK");
    }
    Ok(())
}


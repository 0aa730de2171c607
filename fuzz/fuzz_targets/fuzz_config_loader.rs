#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not. Anything that
    // validates must also convert into the runtime config.
    if let Ok(cfg) = ferment_config::load_toml(data)
        && cfg.validate().is_ok()
    {
        let core = ferment_core::CoreConfig::from(&cfg);
        assert!(core.safety.min_cycle_ms <= 24 * 3_600_000);
    }
});

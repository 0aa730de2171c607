//! Human-readable error descriptions and structured JSON error formatting.

use ferment_core::error::{BuildError, FermentError, HydrationFailure, InvalidSample};
use ferment_hardware::HwError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::UnknownBatch(id) => format!(
                "What happened: No batch named '{id}' is registered.\nLikely causes: The batch was never registered or was already removed.\nHow to fix: Register the batch before ticking or overriding it."
            ),
            BuildError::DuplicateBatch(id) => format!(
                "What happened: Batch '{id}' is already registered.\nLikely causes: The same batch id was registered twice.\nHow to fix: Remove the existing batch first or pick another id."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `ferment check-config`."
            ),
        };
    }

    if let Some(h) = err.downcast_ref::<HydrationFailure>() {
        return hydration_text(h);
    }

    if let Some(is) = err.downcast_ref::<InvalidSample>() {
        return format!(
            "What happened: A reading was rejected ({is}).\nLikely causes: Sensor glitch, wrong units, or rows out of time order.\nHow to fix: Check the input data; readings must be finite, in range and strictly increasing in time."
        );
    }

    if let Some(fe) = err.downcast_ref::<FermentError>() {
        return match fe {
            FermentError::Timeout => "What happened: A relay command timed out.\nLikely causes: Relay board unpowered or GPIO wiring fault.\nHow to fix: Check relay power and wiring; the controller retries the command on the next tick.".to_string(),
            FermentError::Actuation(msg) => format!(
                "What happened: A relay command failed ({msg}).\nLikely causes: Relay board fault or insufficient GPIO permissions.\nHow to fix: Check wiring and permissions, then rerun."
            ),
            FermentError::Hydration(h) => hydration_text(h),
            FermentError::InvalidSample(is) => format!(
                "What happened: A reading was rejected ({is}).\nLikely causes: Sensor glitch or wrong units.\nHow to fix: Check the input data."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(hw) = err.downcast_ref::<HwError>() {
        return format!(
            "What happened: Relay hardware error ({hw}).\nLikely causes: Wrong BCM pin, pin already in use, or no access to /dev/gpiomem.\nHow to fix: Check the pin numbers and run as a user in the gpio group."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("history csv must have headers") {
        return "Invalid headers in history CSV. Expected 'timestamp_ms,gravity,temperature'.".to_string();
    }

    if lower.contains("parse config") || lower.contains("read config") {
        return format!(
            "What happened: The configuration file could not be loaded.\nLikely causes: Wrong path or malformed TOML.\nHow to fix: Check --config. Details: {msg}"
        );
    }

    if lower.contains("must be") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `ferment check-config`."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn hydration_text(h: &HydrationFailure) -> String {
    format!(
        "What happened: Hydration failed: {} ({} attempted, {} skipped).\nLikely causes: Empty history, rows missing timestamp or gravity, or readings out of range.\nHow to fix: Check the history CSV; the device keeps its previous state.",
        h.reason, h.attempted, h.skipped
    )
}

/// Stable short name for JSON output and exit codes.
pub fn error_reason_name(err: &eyre::Report) -> &'static str {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::InvalidConfig(_) => "InvalidConfig",
            BuildError::UnknownBatch(_) | BuildError::DuplicateBatch(_) => "Batch",
        };
    }
    if err.downcast_ref::<HydrationFailure>().is_some() {
        return "Hydration";
    }
    if err.downcast_ref::<InvalidSample>().is_some() {
        return "InvalidSample";
    }
    if let Some(fe) = err.downcast_ref::<FermentError>() {
        return match fe {
            FermentError::InvalidSample(_) => "InvalidSample",
            FermentError::Hydration(_) => "Hydration",
            FermentError::Actuation(_) | FermentError::Timeout => "Actuation",
            FermentError::Config(_) => "InvalidConfig",
            FermentError::State(_) => "State",
        };
    }
    if err.downcast_ref::<HwError>().is_some() {
        return "Actuation";
    }
    let lower = err.to_string().to_ascii_lowercase();
    if lower.contains("config") || lower.contains("must be") {
        return "InvalidConfig";
    }
    "Error"
}

/// Map typed failures to stable exit codes; anything else returns 1.
/// (2 is left to clap for usage errors.)
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match error_reason_name(err) {
        "InvalidConfig" => 3,
        "InvalidSample" => 4,
        "Hydration" => 5,
        "Actuation" => 6,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let reason = error_reason_name(err);
    let message = humanize(err);
    let details = err
        .downcast_ref::<HydrationFailure>()
        .or_else(|| match err.downcast_ref::<FermentError>() {
            Some(FermentError::Hydration(h)) => Some(h),
            _ => None,
        })
        .map(|h| {
            json!({
                "attempted": h.attempted,
                "loaded": h.loaded,
                "skipped": h.skipped,
                "cause": h.reason,
            })
        });
    match details {
        Some(d) => json!({ "reason": reason, "details": d, "message": message }),
        None => json!({ "reason": reason, "message": message }),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hydration_failure_maps_to_code_and_details() {
        let err = eyre::Report::new(FermentError::Hydration(HydrationFailure {
            attempted: 3,
            loaded: 0,
            skipped: 3,
            reason: "no usable records".into(),
        }));
        assert_eq!(exit_code_for_error(&err), 5);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "Hydration");
        assert_eq!(v["details"]["skipped"], 3);
    }

    #[test]
    fn config_messages_are_recognised() {
        let err = eyre::eyre!("control.hysteresis must be >= 0");
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("Configuration is invalid"));
    }

    #[test]
    fn hardware_errors_map_to_actuation() {
        let err = eyre::Report::new(HwError::Gpio("pin 17: busy".into()));
        assert_eq!(exit_code_for_error(&err), 6);
        assert!(humanize(&err).contains("pin 17: busy"));
    }

    #[test]
    fn unknown_errors_fall_back() {
        let err = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("Something went wrong"));
    }
}

//! Typed errors for failed actuator commands.
//!
//! `Actuator::set` reports `Box<dyn Error + Send + Sync>`. With the
//! `hardware-errors` feature the source chain is searched for
//! `ferment_hardware::HwError`; otherwise, and for foreign errors, the
//! message decides.

use crate::error::FermentError;
use crate::safety::ActuatorKind;

fn is_timeout_text(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("timeout") || msg.contains("timed out")
}

/// Classify the failure of commanding `kind` to `on`.
pub fn map_actuator_error(kind: ActuatorKind, on: bool, e: &(dyn std::error::Error + 'static)) -> FermentError {
    let command = if on { "on" } else { "off" };

    #[cfg(feature = "hardware-errors")]
    {
        use ferment_hardware::HwError;
        let typed = std::iter::successors(Some(e), |cur| cur.source()).find_map(|cur| cur.downcast_ref::<HwError>());
        if let Some(hw) = typed {
            return match hw {
                HwError::Timeout => FermentError::Timeout,
                other => FermentError::Actuation(format!("{kind} {command}: {other}")),
            };
        }
    }

    if is_timeout_text(&e.to_string()) {
        FermentError::Timeout
    } else {
        FermentError::Actuation(format!("{kind} {command}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_text_maps_to_timeout() {
        let e = std::io::Error::other("relay write timed out");
        assert_eq!(map_actuator_error(ActuatorKind::Heater, true, &e), FermentError::Timeout);
    }

    #[test]
    fn other_errors_name_the_command() {
        let e = std::io::Error::other("bus fault");
        assert_eq!(
            map_actuator_error(ActuatorKind::Cooler, false, &e),
            FermentError::Actuation(format!("{} off: bus fault", ActuatorKind::Cooler))
        );
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn hardware_errors_are_found_in_the_source_chain() {
        use ferment_hardware::HwError;

        assert_eq!(
            map_actuator_error(ActuatorKind::Heater, true, &HwError::Timeout),
            FermentError::Timeout
        );
        // Wrapped by an io::Error, as a driver layer might
        let wrapped = std::io::Error::other(HwError::Timeout);
        assert_eq!(map_actuator_error(ActuatorKind::Heater, true, &wrapped), FermentError::Timeout);

        let injected = HwError::Injected("relay stuck".into());
        assert!(matches!(
            map_actuator_error(ActuatorKind::Heater, true, &injected),
            FermentError::Actuation(m) if m.contains("relay stuck") && m.ends_with("on: injected fault: relay stuck")
        ));
    }
}

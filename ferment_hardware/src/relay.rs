use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use ferment_traits::Actuator;

use crate::error::HwError;

/// Simulated on/off relay.
///
/// Clones share the same contact, so a vessel model (or a test) can watch
/// the state of a relay that has been handed to a control loop. Faults can
/// be injected for the next N commands; a failed command leaves the contact
/// where it was.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRelay {
    on: Arc<AtomicBool>,
    switches: Arc<AtomicU64>,
    fail_left: Arc<AtomicUsize>,
    timeout_left: Arc<AtomicUsize>,
}

impl SimulatedRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }

    /// Number of times the contact actually changed state.
    pub fn switches(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    /// Fail the next `n` commands with [`HwError::Injected`].
    pub fn fail_next(&self, n: usize) {
        self.fail_left.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` commands with [`HwError::Timeout`].
    pub fn time_out_next(&self, n: usize) {
        self.timeout_left.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn switch(&self, on: bool) -> Result<(), HwError> {
        if Self::take(&self.timeout_left) {
            return Err(HwError::Timeout);
        }
        if Self::take(&self.fail_left) {
            return Err(HwError::Injected(format!(
                "relay refused {}",
                if on { "on" } else { "off" }
            )));
        }
        if self.on.swap(on, Ordering::AcqRel) != on {
            self.switches.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(on, "simulated relay switched");
        }
        Ok(())
    }
}

impl Actuator for SimulatedRelay {
    fn set(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.switch(on).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_contact() {
        let relay = SimulatedRelay::new();
        let mut handle = relay.clone();
        handle.set(true).unwrap();
        assert!(relay.is_on());
        handle.set(true).unwrap();
        handle.set(false).unwrap();
        assert_eq!(relay.switches(), 2);
    }

    #[test]
    fn injected_fault_leaves_state_unchanged() {
        let mut relay = SimulatedRelay::new();
        relay.fail_next(1);
        let err = relay.set(true).unwrap_err();
        assert!(matches!(err.downcast_ref::<HwError>(), Some(HwError::Injected(_))));
        assert!(!relay.is_on());
        relay.set(true).unwrap();
        assert!(relay.is_on());
    }
}

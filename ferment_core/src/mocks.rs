//! Test and helper mocks for ferment_core

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::util::lock;

/// An actuator that records every command it receives and can be told to
/// fail the next N calls. Clones share the same log, so a test can keep a
/// handle after moving one into a control loop.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    calls: Arc<Mutex<Vec<bool>>>,
    failures_left: Arc<AtomicUsize>,
}

impl RecordingActuator {
    /// Fail the next `n` calls (they are still recorded).
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Every command received, failed ones included.
    pub fn calls(&self) -> Vec<bool> {
        lock(&self.calls).clone()
    }
}

impl ferment_traits::Actuator for RecordingActuator {
    fn set(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        lock(&self.calls).push(on);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Box::new(std::io::Error::other("injected actuator failure")));
        }
        Ok(())
    }
}

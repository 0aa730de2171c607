use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock abstraction shared by ingestion, control and scheduling.
///
/// - now_ms(): milliseconds since the Unix epoch
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - ms_since(): helper to compute elapsed milliseconds from an earlier `now_ms()`
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch_ms`, saturating at 0 on underflow.
    fn ms_since(&self, epoch_ms: u64) -> u64 {
        self.now_ms().saturating_sub(epoch_ms)
    }
}

/// Default, real-time clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
            .unwrap_or(0)
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when told to.
///
/// now_ms() = origin + offset
/// sleep(d) advances internal time by d without actually sleeping.
/// Clones share the same timeline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        let add = d.as_millis().min(u128::from(u64::MAX)) as u64;
        self.ms.fetch_add(add, Ordering::SeqCst);
    }

    /// Set the absolute time in milliseconds.
    pub fn set_ms(&self, ms: u64) {
        self.ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

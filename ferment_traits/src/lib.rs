pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

/// A single on/off actuator (heater or cooler relay).
///
/// Implementations report failures through the boxed error; callers must
/// treat a failed or timed-out call as "state unknown".
pub trait Actuator {
    fn set(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn set(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set(on)
    }
}

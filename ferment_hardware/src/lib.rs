//! Relays and a simulated fermentation vessel.
//!
//! `SimulatedRelay` and `SimulatedVessel` run anywhere and back the CLI's
//! `simulate` command and the tests. `GpioRelay` drives a real relay board
//! and is only built with the `hardware` feature.

pub mod error;
#[cfg(feature = "hardware")]
pub mod gpio;
pub mod relay;
pub mod vessel;

#[cfg(feature = "hardware")]
pub use gpio::GpioRelay;
pub use error::HwError;
pub use relay::SimulatedRelay;
pub use vessel::SimulatedVessel;

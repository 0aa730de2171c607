use rppal::gpio::{Gpio, OutputPin};

use ferment_traits::Actuator;

use crate::error::{HwError, Result};

/// Relay channel on a GPIO output. Most opto-isolated relay boards are
/// active-low, hence the flag.
pub struct GpioRelay {
    pin: OutputPin,
    active_low: bool,
    on: bool,
}

impl GpioRelay {
    /// Claim `bcm_pin` and drive it to the "off" level.
    pub fn new(bcm_pin: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let pin = gpio
            .get(bcm_pin)
            .map_err(|e| HwError::Gpio(format!("pin {bcm_pin}: {e}")))?
            .into_output();
        let mut relay = Self {
            pin,
            active_low,
            on: true,
        };
        relay.write(false);
        Ok(relay)
    }

    fn write(&mut self, on: bool) {
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        if on != self.on {
            tracing::debug!(pin = self.pin.pin(), on, "relay switched");
        }
        self.on = on;
    }
}

impl Actuator for GpioRelay {
    fn set(&mut self, on: bool) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.write(on);
        Ok(())
    }
}

impl Drop for GpioRelay {
    fn drop(&mut self) {
        self.write(false);
    }
}

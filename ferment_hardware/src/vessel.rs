use std::time::Duration;

use crate::relay::SimulatedRelay;

const STEP: Duration = Duration::from_secs(60);

/// First-order fermentation vessel:
///
/// ```text
/// dT/dt = h·heater − c·cooler + a·(T_amb − T)      (°C per hour)
/// ```
///
/// The heater and cooler terms follow the attached relays, so whatever a
/// control loop commands through them shows up in the temperature.
#[derive(Debug, Clone)]
pub struct SimulatedVessel {
    temp: f64,
    ambient: f64,
    heating_rate: f64,
    cooling_rate: f64,
    ambient_coupling: f64,
    heater: SimulatedRelay,
    cooler: SimulatedRelay,
}

impl SimulatedVessel {
    pub fn new(initial_temp: f64, ambient: f64, heater: SimulatedRelay, cooler: SimulatedRelay) -> Self {
        Self {
            temp: initial_temp,
            ambient,
            heating_rate: 3.0,
            cooling_rate: 3.0,
            ambient_coupling: 0.1,
            heater,
            cooler,
        }
    }

    /// Override the plant constants (°C/h, °C/h, 1/h).
    pub fn with_rates(mut self, heating_rate: f64, cooling_rate: f64, ambient_coupling: f64) -> Self {
        self.heating_rate = heating_rate;
        self.cooling_rate = cooling_rate;
        self.ambient_coupling = ambient_coupling;
        self
    }

    pub fn temp(&self) -> f64 {
        self.temp
    }

    pub fn ambient(&self) -> f64 {
        self.ambient
    }

    pub fn set_ambient(&mut self, ambient: f64) {
        self.ambient = ambient;
    }

    /// Integrate forward by `dt` in steps of at most one minute, holding the
    /// relay states read at the start.
    pub fn advance(&mut self, dt: Duration) {
        let heat = self.heater.is_on();
        let cool = self.cooler.is_on();
        let mut left = dt;
        while !left.is_zero() {
            let step = left.min(STEP);
            let mut d = self.ambient_coupling * (self.ambient - self.temp);
            if heat {
                d += self.heating_rate;
            }
            if cool {
                d -= self.cooling_rate;
            }
            self.temp += d * step.as_secs_f64() / 3600.0;
            left -= step;
        }
    }
}

//! Per-signal online estimator.
//!
//! A two-state (value, rate) Kalman-style filter over irregularly spaced
//! samples. Rates are expressed per hour. The predict step advances the
//! estimate by the elapsed time using the current rate and inflates the
//! covariance in proportion to that time; the correct step blends in the raw
//! measurement with a gain derived from predicted variance versus measurement
//! noise.
//!
//! ```text
//! predict:  v' = v + r·dt          P' = F·P·Fᵀ + Q·dt,  F = [[1, dt], [0, 1]]
//! correct:  S  = P'00 + R          K = [P'00 / S, P'01 / S]
//!           v  = v' + K0·(z − v')  r = r + K1·(z − v')
//! ```
//!
//! Confidence is `1 − sqrt(P00) / σ_R`, clamped to [0, 1]: zero right after
//! (re)initialisation and approaching one as the filter converges.

use crate::config::EstimatorCfg;
use crate::error::InvalidSample;
use crate::util::hours_between;

/// Output of one accepted observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredSample {
    pub timestamp_ms: u64,
    pub raw: f64,
    pub value: f64,
    pub rate_per_hour: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct FilterState {
    value: f64,
    rate: f64,
    // Symmetric 2x2 covariance: [[p00, p01], [p01, p11]]
    p00: f64,
    p01: f64,
    p11: f64,
    // None while anchored at a seed that has not seen a measurement yet
    last_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateEstimator {
    cfg: EstimatorCfg,
    state: Option<FilterState>,
}

impl StateEstimator {
    pub fn new(cfg: EstimatorCfg) -> Self {
        Self { cfg, state: None }
    }

    fn measurement_variance(&self) -> f64 {
        self.cfg.measurement_noise * self.cfg.measurement_noise
    }

    fn check_value(&self, raw: f64) -> Result<(), InvalidSample> {
        if !raw.is_finite() {
            return Err(InvalidSample::NonFinite);
        }
        if raw < self.cfg.min || raw > self.cfg.max {
            return Err(InvalidSample::OutOfRange {
                value: raw,
                min: self.cfg.min,
                max: self.cfg.max,
            });
        }
        Ok(())
    }

    /// Check a sample without touching state. `observe` performs the same
    /// checks; this exists so callers can validate several signals before
    /// mutating any of them.
    pub fn validate(&self, raw: f64, timestamp_ms: u64) -> Result<(), InvalidSample> {
        self.check_value(raw)?;
        if let Some(last_ms) = self.last_timestamp_ms()
            && timestamp_ms <= last_ms
        {
            return Err(InvalidSample::NonMonotonic {
                last_ms,
                got_ms: timestamp_ms,
            });
        }
        Ok(())
    }

    /// Feed one raw measurement. Rejected samples leave the filter untouched.
    pub fn observe(&mut self, raw: f64, timestamp_ms: u64) -> Result<FilteredSample, InvalidSample> {
        self.validate(raw, timestamp_ms)?;
        let r_var = self.measurement_variance();

        let Some(st) = self.state.as_mut() else {
            self.state = Some(FilterState {
                value: raw,
                rate: 0.0,
                p00: r_var,
                p01: 0.0,
                p11: self.cfg.initial_rate_variance,
                last_ms: Some(timestamp_ms),
            });
            return Ok(FilteredSample {
                timestamp_ms,
                raw,
                value: raw,
                rate_per_hour: 0.0,
                confidence: 0.0,
            });
        };

        // Predict (skipped when anchored at a seed with no timestamp yet)
        if let Some(last_ms) = st.last_ms {
            let dt = hours_between(last_ms, timestamp_ms);
            st.value += st.rate * dt;
            let p00 = st.p00 + 2.0 * dt * st.p01 + dt * dt * st.p11 + self.cfg.value_process_noise * dt;
            let p01 = st.p01 + dt * st.p11;
            let p11 = st.p11 + self.cfg.rate_process_noise * dt;
            st.p00 = p00;
            st.p01 = p01;
            st.p11 = p11;
        }

        // Correct
        let s = st.p00 + r_var;
        let k0 = st.p00 / s;
        let k1 = st.p01 / s;
        let innovation = raw - st.value;
        st.value += k0 * innovation;
        st.rate += k1 * innovation;
        let (p00, p01, p11) = (st.p00, st.p01, st.p11);
        st.p00 = (1.0 - k0) * p00;
        st.p01 = (1.0 - k0) * p01;
        st.p11 = (p11 - k1 * p01).max(0.0);
        st.last_ms = Some(timestamp_ms);

        let confidence = confidence_from(st.p00, self.cfg.measurement_noise);
        tracing::trace!(
            raw,
            value = st.value,
            rate = st.rate,
            gain = k0,
            confidence,
            "estimator update"
        );
        Ok(FilteredSample {
            timestamp_ms,
            raw,
            value: st.value,
            rate_per_hour: st.rate,
            confidence,
        })
    }

    /// Forget everything; the next sample re-initialises the filter.
    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Discard state and anchor the filter at `seed` with zero rate. The seed
    /// carries the same uncertainty as one measurement and has no timestamp,
    /// so the next observation is accepted regardless of its time.
    pub fn reset_to(&mut self, seed: f64) -> Result<(), InvalidSample> {
        self.check_value(seed)?;
        self.state = Some(FilterState {
            value: seed,
            rate: 0.0,
            p00: self.measurement_variance(),
            p01: 0.0,
            p11: self.cfg.initial_rate_variance,
            last_ms: None,
        });
        Ok(())
    }

    pub fn value(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.value)
    }

    pub fn rate(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.rate)
    }

    /// Posterior variance of the value estimate.
    pub fn variance(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.p00)
    }

    pub fn confidence(&self) -> Option<f64> {
        self.state
            .as_ref()
            .map(|s| confidence_from(s.p00, self.cfg.measurement_noise))
    }

    pub fn last_timestamp_ms(&self) -> Option<u64> {
        self.state.as_ref().and_then(|s| s.last_ms)
    }

    pub fn cfg(&self) -> &EstimatorCfg {
        &self.cfg
    }
}

#[inline]
fn confidence_from(p00: f64, sigma: f64) -> f64 {
    if !(p00.is_finite() && sigma > 0.0) {
        return 0.0;
    }
    (1.0 - p00.max(0.0).sqrt() / sigma).clamp(0.0, 1.0)
}

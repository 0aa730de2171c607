//! Rule-based anomaly detection over a filtered gravity sample and the
//! recent history window preceding it.
//!
//! The detector is a pure function: it keeps no state and treats every
//! threshold as an opaque parameter.

use std::collections::BTreeSet;
use std::fmt;

use crate::config::AnomalyCfg;
use crate::estimator::FilteredSample;
use crate::history::HistorySample;
use crate::util::hours_between;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnomalyReason {
    /// Near-zero rate sustained for at least the stuck duration.
    Stuck,
    /// Rate magnitude above the rapid-change threshold.
    RapidChange,
    /// Raw reading dropped implausibly far since the previous one.
    SensorFault,
}

impl AnomalyReason {
    pub fn code(self) -> &'static str {
        match self {
            AnomalyReason::Stuck => "stuck",
            AnomalyReason::RapidChange => "rapid_change",
            AnomalyReason::SensorFault => "sensor_fault",
        }
    }
}

impl fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnomalyReport {
    pub anomaly: bool,
    pub reasons: BTreeSet<AnomalyReason>,
    /// Maximum normalized severity across triggered rules; 0 when none fired.
    pub severity: f64,
}

impl AnomalyReport {
    fn trigger(&mut self, reason: AnomalyReason, severity: f64) {
        self.anomaly = true;
        self.reasons.insert(reason);
        self.severity = self.severity.max(severity);
    }
}

/// Severity of a rule that fired with `measured` against `threshold`:
/// 0.5 right at the threshold, saturating at 1.0 at twice the threshold.
fn exceed_severity(measured: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    (measured / (2.0 * threshold)).clamp(0.5, 1.0)
}

/// Least-squares slope (units per hour) of `(timestamp_ms, value)` points.
fn slope_per_hour(points: &[(u64, f64)]) -> Option<f64> {
    let (t0, _) = *points.first()?;
    let n = points.len() as f64;
    let (mut st, mut sv, mut stt, mut stv) = (0.0, 0.0, 0.0, 0.0);
    for &(ts, v) in points {
        let t = hours_between(t0, ts);
        st += t;
        sv += v;
        stt += t * t;
        stv += t * v;
    }
    let denom = n * stt - st * st;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    Some((n * stv - st * sv) / denom)
}

/// Evaluate every rule for `latest`, given the samples that preceded it
/// (oldest first). Samples in `window` newer than `latest` are ignored.
pub fn evaluate(latest: &FilteredSample, window: &[HistorySample], cfg: &AnomalyCfg) -> AnomalyReport {
    let mut report = AnomalyReport::default();
    let prior: Vec<&HistorySample> = window
        .iter()
        .filter(|s| s.timestamp_ms < latest.timestamp_ms)
        .collect();

    // Stuck: history must span the full duration, then the raw trend across
    // it must be flat. Raw readings keep filter settling out of the slope.
    let cutoff = latest.timestamp_ms.checked_sub(cfg.stuck_ms);
    if let Some(cutoff) = cutoff
        && cfg.stuck_ms > 0
        && prior.first().is_some_and(|s| s.timestamp_ms <= cutoff)
    {
        let mut points: Vec<(u64, f64)> = prior
            .iter()
            .filter(|s| s.timestamp_ms >= cutoff)
            .map(|s| (s.timestamp_ms, s.raw))
            .collect();
        points.push((latest.timestamp_ms, latest.raw));
        if points.len() >= 3
            && let Some(slope) = slope_per_hour(&points)
            && slope.abs() <= cfg.stuck_rate_per_hour
        {
            let severity = if cfg.stuck_rate_per_hour > 0.0 {
                (1.0 - slope.abs() / (2.0 * cfg.stuck_rate_per_hour)).clamp(0.5, 1.0)
            } else {
                1.0
            };
            report.trigger(AnomalyReason::Stuck, severity);
        }
    }

    let rate = latest.rate_per_hour.abs();
    if rate > cfg.rapid_rate_per_hour {
        report.trigger(
            AnomalyReason::RapidChange,
            exceed_severity(rate, cfg.rapid_rate_per_hour),
        );
    }

    if let Some(prev) = prior.last() {
        let drop = prev.raw - latest.raw;
        if drop > cfg.sensor_fault_drop {
            report.trigger(
                AnomalyReason::SensorFault,
                exceed_severity(drop, cfg.sensor_fault_drop),
            );
        }
    }

    if report.anomaly {
        tracing::debug!(
            reasons = ?report.reasons,
            severity = report.severity,
            ts = latest.timestamp_ms,
            "anomaly detected"
        );
    }
    report
}

//! Final-gravity prediction.
//!
//! Fits `value(t) = fg + (og − fg) · exp(−k·t)` to buffered filtered gravity
//! with Levenberg–Marquardt, `t` in hours since the first sample. The fit
//! never fails the caller: anything short of a plausible, converged,
//! good-quality fit is reported as [`Availability::Unavailable`] with a
//! reason.

use std::fmt;

use crate::config::PredictorCfg;
use crate::util::{MILLIS_PER_HOUR, hours_between, solve3};

/// Parameters of an accepted fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveFit {
    pub original_gravity: f64,
    pub final_gravity: f64,
    /// Decay constant `k` (per hour).
    pub decay_per_hour: f64,
    /// Coefficient of determination over the samples used.
    pub quality: f64,
    /// When the curve comes within `completion_epsilon` of `final_gravity`.
    pub completion_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Unavailable {
    InsufficientSamples { have: usize, need: usize },
    /// All samples share a timestamp or the series has no variance.
    Degenerate,
    /// Iteration budget exhausted or the solve went non-finite.
    DidNotConverge,
    PoorFit { quality: f64 },
    /// Fitted FG above fitted OG by more than the tolerance.
    Implausible { final_gravity: f64, original_gravity: f64 },
}

impl Unavailable {
    pub fn code(&self) -> &'static str {
        match self {
            Unavailable::InsufficientSamples { .. } => "insufficient_samples",
            Unavailable::Degenerate => "degenerate",
            Unavailable::DidNotConverge => "did_not_converge",
            Unavailable::PoorFit { .. } => "poor_fit",
            Unavailable::Implausible { .. } => "implausible",
        }
    }
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::InsufficientSamples { have, need } => {
                write!(f, "insufficient samples ({have} of {need})")
            }
            Unavailable::Degenerate => f.write_str("no trend to fit"),
            Unavailable::DidNotConverge => f.write_str("fit did not converge"),
            Unavailable::PoorFit { quality } => write!(f, "poor fit (quality {quality:.3})"),
            Unavailable::Implausible {
                final_gravity,
                original_gravity,
            } => write!(
                f,
                "implausible fit (fg {final_gravity:.4} above og {original_gravity:.4})"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Availability {
    Available(CurveFit),
    Unavailable(Unavailable),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionResult {
    pub sample_count: usize,
    pub availability: Availability,
}

impl PredictionResult {
    fn unavailable(sample_count: usize, reason: Unavailable) -> Self {
        Self {
            sample_count,
            availability: Availability::Unavailable(reason),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.availability, Availability::Available(_))
    }

    pub fn fit(&self) -> Option<&CurveFit> {
        match &self.availability {
            Availability::Available(fit) => Some(fit),
            Availability::Unavailable(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&Unavailable> {
        match &self.availability {
            Availability::Available(_) => None,
            Availability::Unavailable(r) => Some(r),
        }
    }
}

// ── Model ────────────────────────────────────────────────────────────────────

// Parameter vector: [og, fg, k]
type Params = [f64; 3];

#[inline]
fn model(p: &Params, t: f64) -> f64 {
    p[1] + (p[0] - p[1]) * (-p[2] * t).exp()
}

#[inline]
fn gradient(p: &Params, t: f64) -> [f64; 3] {
    let e = (-p[2] * t).exp();
    [e, 1.0 - e, -(p[0] - p[1]) * t * e]
}

fn sse(p: &Params, t: &[f64], y: &[f64]) -> f64 {
    t.iter()
        .zip(y)
        .map(|(&ti, &yi)| {
            let r = yi - model(p, ti);
            r * r
        })
        .sum()
}

enum FitOutcome {
    Converged(Params),
    Exhausted,
}

const MIN_DECAY: f64 = 1e-9;

fn levenberg_marquardt(t: &[f64], y: &[f64], init: Params, max_iterations: usize) -> FitOutcome {
    let mut p = init;
    let mut cost = sse(&p, t, y);
    let mut lambda = 1e-3;

    for _ in 0..max_iterations {
        if cost < 1e-24 {
            return FitOutcome::Converged(p);
        }
        let mut jtj = [[0.0; 3]; 3];
        let mut jtr = [0.0; 3];
        for (&ti, &yi) in t.iter().zip(y) {
            let g = gradient(&p, ti);
            let r = yi - model(&p, ti);
            for i in 0..3 {
                jtr[i] += g[i] * r;
                for j in 0..3 {
                    jtj[i][j] += g[i] * g[j];
                }
            }
        }
        let mut damped = jtj;
        for (i, row) in damped.iter_mut().enumerate() {
            row[i] += lambda * jtj[i][i].max(1e-12);
        }
        let Some(step) = solve3(damped, jtr) else {
            lambda *= 10.0;
            continue;
        };
        let candidate = [
            p[0] + step[0],
            p[1] + step[1],
            (p[2] + step[2]).max(MIN_DECAY),
        ];
        let new_cost = sse(&candidate, t, y);
        if new_cost.is_finite() && new_cost < cost {
            let improvement = (cost - new_cost) / cost;
            p = candidate;
            cost = new_cost;
            lambda = (lambda / 10.0).max(1e-12);
            if improvement < 1e-10 {
                return FitOutcome::Converged(p);
            }
        } else {
            lambda *= 10.0;
            // No step improves the cost at any useful scale: at a minimum
            if lambda > 1e12 {
                return FitOutcome::Converged(p);
            }
        }
    }
    FitOutcome::Exhausted
}

/// Starting point: OG at the first value, FG extrapolated a quarter of the
/// observed change past the last value, and `k` consistent with both.
fn initial_guess(y: &[f64], span_h: f64) -> Params {
    let first = y[0];
    let last = y[y.len() - 1];
    let change = first - last;
    let fg0 = last - 0.25 * change;
    // (og − fg) / (last − fg) = 1.25 / 0.25 = 5
    let k0 = 5f64.ln() / span_h;
    [first, fg0, k0]
}

/// Fit `(timestamp_ms, filtered_gravity)` pairs ordered oldest first.
pub fn predict(points: &[(u64, f64)], cfg: &PredictorCfg) -> PredictionResult {
    let n = points.len();
    let need = cfg.min_samples;
    if n < need || n < 3 {
        return PredictionResult::unavailable(
            n,
            Unavailable::InsufficientSamples {
                have: n,
                need: need.max(3),
            },
        );
    }

    let t0 = points[0].0;
    let t: Vec<f64> = points.iter().map(|&(ts, _)| hours_between(t0, ts)).collect();
    let y: Vec<f64> = points.iter().map(|&(_, v)| v).collect();
    let span_h = t[n - 1];
    let mean = y.iter().sum::<f64>() / n as f64;
    let sst: f64 = y.iter().map(|v| (v - mean) * (v - mean)).sum();
    if span_h <= 0.0 || sst < 1e-14 || y.iter().any(|v| !v.is_finite()) {
        return PredictionResult::unavailable(n, Unavailable::Degenerate);
    }

    let p = match levenberg_marquardt(&t, &y, initial_guess(&y, span_h), cfg.max_iterations) {
        FitOutcome::Converged(p) if p.iter().all(|v| v.is_finite()) => p,
        _ => {
            tracing::debug!(samples = n, "curve fit did not converge");
            return PredictionResult::unavailable(n, Unavailable::DidNotConverge);
        }
    };

    let [og, fg, k] = p;
    let quality = 1.0 - sse(&p, &t, &y) / sst;
    // A NaN tolerance must reject, not accept
    let plausible = fg <= og + cfg.fg_tolerance;
    if !plausible {
        return PredictionResult::unavailable(
            n,
            Unavailable::Implausible {
                final_gravity: fg,
                original_gravity: og,
            },
        );
    }
    if !(quality >= cfg.min_quality) {
        return PredictionResult::unavailable(n, Unavailable::PoorFit { quality });
    }

    let gap = og - fg;
    let hours_to_done = if gap > cfg.completion_epsilon && cfg.completion_epsilon > 0.0 {
        (gap / cfg.completion_epsilon).ln() / k
    } else {
        0.0
    };
    let offset_ms = (hours_to_done * MILLIS_PER_HOUR as f64).clamp(0.0, u64::MAX as f64) as u64;
    let fit = CurveFit {
        original_gravity: og,
        final_gravity: fg,
        decay_per_hour: k,
        quality,
        completion_ms: t0.saturating_add(offset_ms),
    };
    tracing::debug!(og, fg, k, quality, samples = n, "curve fit accepted");
    PredictionResult {
        sample_count: n,
        availability: Availability::Available(fit),
    }
}

//! Common time, locking and numeric helpers for ferment_core.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;
/// Number of milliseconds in one minute.
pub const MILLIS_PER_MIN: u64 = 60 * MILLIS_PER_SEC;
/// Number of milliseconds in one hour.
pub const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MIN;

/// Elapsed hours from `from_ms` to `to_ms`; negative when `to_ms` is earlier.
#[inline]
pub fn hours_between(from_ms: u64, to_ms: u64) -> f64 {
    (to_ms as f64 - from_ms as f64) / MILLIS_PER_HOUR as f64
}

/// Convert fractional hours to whole milliseconds, saturating at 0 for
/// negative or non-finite input.
#[inline]
pub fn hours_to_ms(hours: f64) -> u64 {
    if !hours.is_finite() || hours <= 0.0 {
        return 0;
    }
    let ms = (hours * MILLIS_PER_HOUR as f64).round();
    if ms >= u64::MAX as f64 { u64::MAX } else { ms as u64 }
}

/// Convert fractional minutes to whole milliseconds (see `hours_to_ms`).
#[inline]
pub fn minutes_to_ms(minutes: f64) -> u64 {
    hours_to_ms(minutes / 60.0)
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
#[inline]
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
pub fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
pub fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

/// Solve a 3x3 system by Gaussian elimination with partial pivoting.
pub fn solve3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..3 {
            let f = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let mut acc = b[row];
        for k in (row + 1)..3 {
            acc -= a[row][k] * x[k];
        }
        x[row] = acc / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hours_between_is_signed() {
        assert_eq!(hours_between(0, MILLIS_PER_HOUR), 1.0);
        assert_eq!(hours_between(MILLIS_PER_HOUR, 0), -1.0);
        assert_eq!(hours_between(0, MILLIS_PER_HOUR / 2), 0.5);
    }

    #[test]
    fn hours_to_ms_saturates() {
        assert_eq!(hours_to_ms(1.5), 5_400_000);
        assert_eq!(hours_to_ms(-2.0), 0);
        assert_eq!(hours_to_ms(f64::NAN), 0);
        assert_eq!(hours_to_ms(f64::INFINITY), 0);
        assert_eq!(minutes_to_ms(30.0), 1_800_000);
    }

    #[test]
    fn solve3_handles_pivoting() {
        let a = [[0.0, 2.0, 1.0], [1.0, 1.0, 0.0], [2.0, 0.0, 3.0]];
        let x = solve3(a, [5.0, 3.0, 11.0]).unwrap();
        for (row, rhs) in a.iter().zip([5.0, 3.0, 11.0]) {
            let lhs: f64 = row.iter().zip(&x).map(|(a, x)| a * x).sum();
            assert!((lhs - rhs).abs() < 1e-12);
        }
        assert!(solve3([[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]], [1.0, 2.0, 3.0]).is_none());
    }
}

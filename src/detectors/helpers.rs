//! Common helper functions shared across detector modules.

/// `(to - from) / from`
#[inline]
pub fn relative_change(from: f64, to: f64) -> f64 {
    (to - from) / from
}

/// Close-to-close return of day `i` relative to day `i - 1`.
///
/// `i` must be >= 1.
#[inline]
pub fn daily_return(close: &[f64], i: usize) -> f64 {
    relative_change(close[i - 1], close[i])
}

/// `max(high) - min(low)` over aligned slices. `None` when empty.
#[inline]
pub fn span(high: &[f64], low: &[f64]) -> Option<f64> {
    let hi = high.iter().copied().reduce(f64::max)?;
    let lo = low.iter().copied().reduce(f64::min)?;
    Some(hi - lo)
}

//! Volatility normalization
//!
//! Relative average true range and the threshold correction derived from it.
//! Every function here is pure. An undefined metric (`None`) propagates through
//! the `_opt` variants instead of raising an error; callers treat such a day as
//! not evaluable.

use serde::{Deserialize, Serialize};

use crate::{DetectError, Result};

// ============================================================
// DEFAULTS
// ============================================================

/// Base decline threshold before volatility correction (-5%)
pub const DEFAULT_BASE_DECLINE: f64 = -0.05;
/// Base rebound threshold before volatility correction (+0.5%)
pub const DEFAULT_BASE_REBOUND: f64 = 0.005;
/// Lower edge of the neutral ATR band (1%)
pub const DEFAULT_LOWER_BAND: f64 = 0.01;
/// Upper edge of the neutral ATR band (2%)
pub const DEFAULT_UPPER_BAND: f64 = 0.02;
/// Default relative ATR window
pub const DEFAULT_ATR_WINDOW: usize = 60;

// ============================================================
// TRUE RANGE / ATR
// ============================================================

fn check_lengths(high: &[f64], low: &[f64], close: &[f64]) -> Result<()> {
    if low.len() != high.len() {
        return Err(DetectError::LengthMismatch {
            field: "low",
            expected: high.len(),
            got: low.len(),
        });
    }
    if close.len() != high.len() {
        return Err(DetectError::LengthMismatch {
            field: "close",
            expected: high.len(),
            got: close.len(),
        });
    }
    Ok(())
}

/// True range per day: `max(high - low, |high - prev_close|, |low - prev_close|)`.
///
/// Day 0 has no previous close, so only `high - low` contributes to it.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Result<Vec<f64>> {
    check_lengths(high, low, close)?;

    let mut tr = Vec::with_capacity(high.len());
    for i in 0..high.len() {
        let hl = high[i] - low[i];
        if i == 0 {
            tr.push(hl);
            continue;
        }
        let pc = close[i - 1];
        tr.push(hl.max((high[i] - pc).abs()).max((low[i] - pc).abs()));
    }
    Ok(tr)
}

/// Simple moving average of true range over `window` days divided by the
/// same-day close.
///
/// The first `window - 1` days have no full window and are `None`.
pub fn relative_atr(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    window: usize,
) -> Result<Vec<Option<f64>>> {
    if window == 0 {
        return Err(DetectError::InvalidValue("ATR window must be > 0"));
    }
    let tr = true_range(high, low, close)?;

    let mut out = vec![None; tr.len()];
    let mut sum = 0.0;
    for i in 0..tr.len() {
        sum += tr[i];
        if i >= window {
            sum -= tr[i - window];
        }
        if i + 1 >= window {
            if (i + 1) % 1024 == 0 {
                sum = tr[i + 1 - window..=i].iter().sum();
            }
            // Rolling subtraction can undershoot zero on flat stretches
            let atr = (sum / window as f64).max(0.0);
            out[i] = Some(atr / close[i]);
        }
    }
    Ok(out)
}

// ============================================================
// CORRECTION FACTOR
// ============================================================

/// Edges of the neutral ATR band. Inside `[lower, upper]` thresholds are left
/// as-is; outside they are scaled by `sqrt(atr / edge)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionBands {
    pub lower: f64,
    pub upper: f64,
}

impl Default for CorrectionBands {
    fn default() -> Self {
        Self {
            lower: DEFAULT_LOWER_BAND,
            upper: DEFAULT_UPPER_BAND,
        }
    }
}

impl CorrectionBands {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("bands.lower", self.lower), ("bands.upper", self.upper)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(DetectError::InvalidConfig(format!(
                    "{field} must be finite and > 0, got {value}"
                )));
            }
        }
        if self.lower > self.upper {
            return Err(DetectError::InvalidConfig(format!(
                "bands.lower ({}) must not exceed bands.upper ({})",
                self.lower, self.upper
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn factor(&self, atr: f64) -> f64 {
        if atr < self.lower {
            (atr / self.lower).sqrt()
        } else if atr > self.upper {
            (atr / self.upper).sqrt()
        } else {
            1.0
        }
    }
}

/// Threshold correction factor with the default 1%/2% bands.
#[inline]
pub fn correction_factor(atr: f64) -> f64 {
    CorrectionBands::default().factor(atr)
}

/// Elementwise [`correction_factor`]; undefined days stay undefined.
pub fn correction_factors(atr: &[Option<f64>]) -> Vec<Option<f64>> {
    let bands = CorrectionBands::default();
    atr.iter().map(|a| a.map(|v| bands.factor(v))).collect()
}

// ============================================================
// THRESHOLDS
// ============================================================

/// Volatility-adjusted thresholds for one day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    /// Required cumulative decline (<= 0)
    pub decline: f64,
    /// Required rebound (>= 0)
    pub rebound: f64,
}

/// `(base_decline * cf, base_rebound * cf)` with the default bases and bands.
pub fn adjusted_thresholds(atr: f64) -> (f64, f64) {
    let pair = Thresholds::default().adjusted(atr);
    (pair.decline, pair.rebound)
}

/// Base thresholds plus the bands used to scale them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub base_decline: f64,
    pub base_rebound: f64,
    pub bands: CorrectionBands,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            base_decline: DEFAULT_BASE_DECLINE,
            base_rebound: DEFAULT_BASE_REBOUND,
            bands: CorrectionBands::default(),
        }
    }
}

impl Thresholds {
    pub fn new(base_decline: f64, base_rebound: f64) -> Self {
        Self {
            base_decline,
            base_rebound,
            bands: CorrectionBands::default(),
        }
    }

    pub fn with_bands(mut self, bands: CorrectionBands) -> Self {
        self.bands = bands;
        self
    }

    #[inline]
    pub fn correction(&self, atr: f64) -> f64 {
        self.bands.factor(atr)
    }

    #[inline]
    pub fn adjusted(&self, atr: f64) -> ThresholdPair {
        let cf = self.correction(atr);
        ThresholdPair {
            decline: self.base_decline * cf,
            rebound: self.base_rebound * cf,
        }
    }

    #[inline]
    pub fn adjusted_opt(&self, atr: Option<f64>) -> Option<ThresholdPair> {
        atr.map(|a| self.adjusted(a))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base_decline.is_finite() || !(-1.0..=0.0).contains(&self.base_decline) {
            return Err(DetectError::OutOfRange {
                field: "base_decline",
                value: self.base_decline,
                min: -1.0,
                max: 0.0,
            });
        }
        if !self.base_rebound.is_finite() || !(0.0..=1.0).contains(&self.base_rebound) {
            return Err(DetectError::OutOfRange {
                field: "base_rebound",
                value: self.base_rebound,
                min: 0.0,
                max: 1.0,
            });
        }
        self.bands.validate()
    }
}

// ============================================================
// TESTS
// ============================================================

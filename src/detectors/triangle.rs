//! Triangle breakout detector
//!
//! Fixed three-condition check with a 5-day lookback and no state between
//! days:
//!
//! 1. Convergence: the 5 daily returns before day `i` are all within
//!    `convergence_threshold`.
//! 2. Breakout: the absolute return of day `i` exceeds `breakout_threshold`.
//! 3. Narrowing: on day `i - 1`, the high-low span of the last 2 days is below
//!    `narrowing_ratio` times the span of the 3 days before them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{daily_return, span};
use crate::{
    params::{get_ratio, ParamMeta, ParameterizedDetector},
    DetectError, Direction, PriceSeries, Ratio, Result,
};

/// First day with enough history for all three conditions
pub const TRIANGLE_MIN_INDEX: usize = 9;

/// A detected breakout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakout {
    pub index: usize,
    pub timestamp: i64,
    /// `Bullish` for an upward break, `Bearish` otherwise
    pub direction: Direction,
    pub breakout_return: f64,
}

/// Named parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrianglePreset {
    Basic,
    Strict,
    Loose,
}

impl TrianglePreset {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "basic" => Ok(Self::Basic),
            "strict" => Ok(Self::Strict),
            "loose" => Ok(Self::Loose),
            other => Err(DetectError::InvalidConfig(format!(
                "unknown triangle preset '{other}', expected basic, strict or loose"
            ))),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Basic => "Plain 1% convergence / 1% breakout / 20% narrowing",
            Self::Strict => "Tighter convergence, larger breakout required",
            Self::Loose => "Looser conditions, more signals",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleBreakoutDetector {
    pub convergence_threshold: Ratio,
    pub breakout_threshold: Ratio,
    pub narrowing_ratio: Ratio,
}

impl Default for TriangleBreakoutDetector {
    fn default() -> Self {
        Self::preset(TrianglePreset::Basic)
    }
}

impl TriangleBreakoutDetector {
    pub fn preset(preset: TrianglePreset) -> Self {
        let (c, b, n) = match preset {
            TrianglePreset::Basic => (0.01, 0.01, 0.8),
            TrianglePreset::Strict => (0.008, 0.015, 0.7),
            TrianglePreset::Loose => (0.012, 0.008, 0.85),
        };
        Self {
            convergence_threshold: Ratio::new_const(c),
            breakout_threshold: Ratio::new_const(b),
            narrowing_ratio: Ratio::new_const(n),
        }
    }

    /// Range narrowing ending on day `at`.
    pub fn is_converging(&self, series: &PriceSeries, at: usize) -> bool {
        if at < 4 || at >= series.len() {
            return false;
        }
        let highs = &series.high()[at - 4..=at];
        let lows = &series.low()[at - 4..=at];

        let (Some(recent), Some(earlier)) = (
            span(&highs[3..], &lows[3..]),
            span(&highs[..3], &lows[..3]),
        ) else {
            return false;
        };
        if earlier <= 0.0 {
            return false;
        }
        recent < earlier * self.narrowing_ratio.get()
    }

    pub fn detect_at(&self, series: &PriceSeries, index: usize) -> Option<Breakout> {
        if index < TRIANGLE_MIN_INDEX || index >= series.len() {
            return None;
        }
        let close = series.close();

        let converged = (index - 5..index)
            .all(|i| daily_return(close, i).abs() <= self.convergence_threshold.get());
        if !converged {
            return None;
        }

        let ret = daily_return(close, index);
        if ret.abs() <= self.breakout_threshold.get() {
            return None;
        }

        if !self.is_converging(series, index - 1) {
            return None;
        }

        Some(Breakout {
            index,
            timestamp: series.timestamp(index),
            direction: if ret > 0.0 {
                Direction::Bullish
            } else {
                Direction::Bearish
            },
            breakout_return: ret,
        })
    }

    pub fn scan(&self, series: &PriceSeries) -> Vec<Breakout> {
        (TRIANGLE_MIN_INDEX..series.len())
            .filter_map(|i| self.detect_at(series, i))
            .collect()
    }
}

impl ParameterizedDetector for TriangleBreakoutDetector {
    fn param_meta() -> &'static [ParamMeta] {
        static META: [ParamMeta; 3] = [
            ParamMeta::ratio(
                "convergence_threshold",
                0.01,
                (0.004, 0.016, 0.002),
                "Max absolute daily return during the 5 converging days",
            ),
            ParamMeta::ratio(
                "breakout_threshold",
                0.01,
                (0.005, 0.025, 0.0025),
                "Min absolute return on the breakout day",
            ),
            ParamMeta::ratio(
                "narrowing_ratio",
                0.8,
                (0.6, 0.9, 0.05),
                "Recent span must be below this fraction of the earlier span",
            ),
        ];
        &META
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            convergence_threshold: get_ratio(params, "convergence_threshold", 0.01)?,
            breakout_threshold: get_ratio(params, "breakout_threshold", 0.01)?,
            narrowing_ratio: get_ratio(params, "narrowing_ratio", 0.8)?,
        })
    }

    fn pattern_id_str() -> &'static str {
        "TRIANGLE_BREAKOUT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Quiet, narrowing tape followed by a 3% jump on the last day.
    fn breakout_series(last_close: f64) -> PriceSeries {
        let close = vec![
            100.0, 100.2, 100.1, 100.3, 100.2, 100.4, 100.3, 100.4, 100.35, last_close,
        ];
        // Wide ranges early, tight ranges on days 7..=8
        let widths = [1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 0.3, 0.3, 1.0];
        let high = close.iter().zip(widths).map(|(c, w)| c + w).collect();
        let low = close.iter().zip(widths).map(|(c, w)| c - w).collect();
        PriceSeries::from_columns((0..10).collect(), high, low, close).unwrap()
    }

    #[test]
    fn test_detects_upward_breakout() {
        let s = breakout_series(103.4);
        let d = TriangleBreakoutDetector::default();
        let b = d.detect_at(&s, 9).unwrap();
        assert_eq!(b.direction, Direction::Bullish);
        assert_eq!(d.scan(&s).len(), 1);
    }

    #[test]
    fn test_detects_downward_breakout() {
        let s = breakout_series(97.0);
        let b = TriangleBreakoutDetector::default().detect_at(&s, 9).unwrap();
        assert_eq!(b.direction, Direction::Bearish);
    }

    #[test]
    fn test_small_move_is_not_a_breakout() {
        let s = breakout_series(100.8);
        assert!(TriangleBreakoutDetector::default().detect_at(&s, 9).is_none());
    }

    #[test]
    fn test_requires_narrowing() {
        let s = breakout_series(103.4);
        let d = TriangleBreakoutDetector {
            narrowing_ratio: Ratio::new(0.1).unwrap(),
            ..TriangleBreakoutDetector::default()
        };
        assert!(d.detect_at(&s, 9).is_none());
    }

    #[test]
    fn test_too_early() {
        let s = breakout_series(103.4);
        assert!(TriangleBreakoutDetector::default().detect_at(&s, 8).is_none());
        assert!(TriangleBreakoutDetector::default().detect_at(&s, 10).is_none());
    }

    #[test]
    fn test_presets() {
        let strict = TriangleBreakoutDetector::preset(TrianglePreset::Strict);
        assert_eq!(strict.breakout_threshold.get(), 0.015);
        assert_eq!(TrianglePreset::from_name("loose").unwrap(), TrianglePreset::Loose);
        assert!(TrianglePreset::from_name("aggressive").is_err());
    }
}

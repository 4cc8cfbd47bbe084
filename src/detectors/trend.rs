//! Decline-then-rebound trend tracing
//!
//! For a (candidate high, evaluation day) pair, replays the close path forward
//! from the candidate, tracking the running bottom, and reports whether the
//! trend terminates exactly on the evaluation day. Each call walks the full
//! path; nothing is cached between pairs.

use serde::{Deserialize, Serialize};

use super::helpers::{daily_return, relative_change};
use crate::volatility::Thresholds;

/// Outcome of tracing one (candidate high, evaluation day) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendTrace {
    pub is_valid: bool,
    pub ends_today: bool,
    pub bottom_price: f64,
    pub bottom_index: usize,
    pub high_price: f64,
    pub high_index: usize,
}

impl TrendTrace {
    /// Zeroed, invalid trace
    pub const fn invalid() -> Self {
        Self {
            is_valid: false,
            ends_today: false,
            bottom_price: 0.0,
            bottom_index: 0,
            high_price: 0.0,
            high_index: 0,
        }
    }

    /// Valid and terminating on the evaluation day
    #[inline]
    pub fn is_candidate(&self) -> bool {
        self.is_valid && self.ends_today
    }

    /// `(bottom - high) / high`
    #[inline]
    pub fn total_decline(&self) -> f64 {
        relative_change(self.high_price, self.bottom_price)
    }
}

impl Default for TrendTrace {
    fn default() -> Self {
        Self::invalid()
    }
}

/// Replays price paths under per-day rebound thresholds.
#[derive(Debug, Clone, Copy)]
pub struct TrendTracer<'a> {
    close: &'a [f64],
    volatility: &'a [Option<f64>],
    thresholds: Thresholds,
}

impl<'a> TrendTracer<'a> {
    /// `close` and `volatility` must be aligned day for day.
    pub fn new(close: &'a [f64], volatility: &'a [Option<f64>], thresholds: Thresholds) -> Self {
        Self {
            close,
            volatility,
            thresholds,
        }
    }

    /// Trace the trend starting at `high_index` and report whether it ends on
    /// `eval_index`.
    ///
    /// The first day (oldest first) whose return reaches that day's rebound
    /// threshold terminates the trend; later days are never looked at. Days
    /// with undefined volatility still move the bottom but cannot terminate.
    pub fn trace(&self, high_index: usize, eval_index: usize) -> TrendTrace {
        if high_index >= eval_index || eval_index >= self.close.len() {
            return TrendTrace::invalid();
        }

        let high_price = self.close[high_index];
        let mut bottom_price = high_price;
        let mut bottom_index = high_index;

        for i in high_index + 1..=eval_index {
            let price = self.close[i];
            if price < bottom_price {
                bottom_price = price;
                bottom_index = i;
            }

            let ret = daily_return(self.close, i);

            let Some(pair) = self
                .volatility
                .get(i)
                .copied()
                .flatten()
                .map(|atr| self.thresholds.adjusted(atr))
            else {
                continue;
            };

            if ret >= pair.rebound {
                if relative_change(high_price, bottom_price) >= 0.0 {
                    return TrendTrace::invalid();
                }
                return TrendTrace {
                    is_valid: true,
                    ends_today: i == eval_index,
                    bottom_price,
                    bottom_index,
                    high_price,
                    high_index,
                };
            }
        }

        TrendTrace::invalid()
    }
}

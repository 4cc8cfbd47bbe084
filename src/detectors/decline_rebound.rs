//! Decline-rebound signal detector
//!
//! Drives the per-day scan: for each evaluation day, candidate highs in the
//! lookback window are traced oldest first, and the first candidate whose
//! trend ends today with enough decline, enough rebound and no earlier signal
//! inside its span is emitted.

use std::collections::HashMap;
use std::ops::Range;

use tracing::{debug, trace};

use super::helpers::relative_change;
use super::trend::{TrendTrace, TrendTracer};
use crate::{
    params::{get_period, get_threshold, ParamMeta, ParameterizedDetector},
    volatility::{CorrectionBands, ThresholdPair, Thresholds},
    DetectError, Period, PriceSeries, Result, Signal, SignalLog,
};

/// Volatility-normalized decline-then-rebound detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeclineReboundDetector {
    /// Number of trailing days searched for candidate highs
    pub lookback_days: Period,
    pub thresholds: Thresholds,
}

impl Default for DeclineReboundDetector {
    fn default() -> Self {
        Self {
            lookback_days: Period::new_const(20),
            thresholds: Thresholds::default(),
        }
    }
}

impl DeclineReboundDetector {
    pub fn new(lookback_days: Period, thresholds: Thresholds) -> Self {
        Self {
            lookback_days,
            thresholds,
        }
    }

    pub fn validate_config(&self) -> Result<()> {
        self.thresholds.validate()
    }

    /// Evaluation days for a series of `len` days.
    #[inline]
    pub fn eval_range(&self, len: usize) -> Range<usize> {
        self.lookback_days.get().min(len)..len
    }

    /// Candidate highs for `eval_index`, oldest first.
    #[inline]
    pub fn candidates(&self, eval_index: usize) -> Range<usize> {
        eval_index.saturating_sub(self.lookback_days.get())..eval_index
    }

    pub fn tracer<'a>(
        &self,
        series: &'a PriceSeries,
        volatility: &'a [Option<f64>],
    ) -> TrendTracer<'a> {
        TrendTracer::new(series.close(), volatility, self.thresholds)
    }

    /// Run the full left-to-right scan.
    pub fn scan(&self, series: &PriceSeries, volatility: &[Option<f64>]) -> Result<SignalLog> {
        check_aligned(series, volatility)?;
        let mut log = SignalLog::new();
        for eval_index in self.eval_range(series.len()) {
            self.step(series, volatility, eval_index, &mut log)?;
        }
        Ok(log)
    }

    /// Evaluate one day against the signals emitted so far.
    ///
    /// Returns the signal appended to `log`, if any.
    pub fn step(
        &self,
        series: &PriceSeries,
        volatility: &[Option<f64>],
        eval_index: usize,
        log: &mut SignalLog,
    ) -> Result<Option<Signal>> {
        if eval_index >= series.len() || eval_index >= volatility.len() {
            return Err(DetectError::OutOfRange {
                field: "eval_index",
                value: eval_index as f64,
                min: 0.0,
                max: series.len().min(volatility.len()) as f64,
            });
        }

        let Some(pair) = self.thresholds.adjusted_opt(volatility[eval_index]) else {
            trace!(eval_index, "volatility undefined, day skipped");
            return Ok(None);
        };

        let tracer = self.tracer(series, volatility);
        let traces = self
            .candidates(eval_index)
            .map(|high_index| tracer.trace(high_index, eval_index));

        self.commit(series, eval_index, pair, traces, log)
    }

    /// Apply the acceptance checks to already-traced candidates, oldest first,
    /// and append the first accepted one to `log`.
    ///
    /// `traces` is consumed lazily, so no candidate after the winner is traced.
    pub fn commit<I>(
        &self,
        series: &PriceSeries,
        eval_index: usize,
        pair: ThresholdPair,
        traces: I,
        log: &mut SignalLog,
    ) -> Result<Option<Signal>>
    where
        I: IntoIterator<Item = TrendTrace>,
    {
        let close = series.close()[eval_index];

        for t in traces {
            if !t.is_candidate() {
                continue;
            }
            check_trace(&t, eval_index)?;

            let total_decline = t.total_decline();
            let rebound = relative_change(t.bottom_price, close);

            let decline_ok = total_decline <= pair.decline;
            let rebound_ok = rebound >= pair.rebound;
            // Only signals committed before this day count; losing candidates
            // of the same day are never recorded.
            let no_overlap = !log.any_between(t.high_index, eval_index);

            if decline_ok && rebound_ok && no_overlap {
                let signal = Signal {
                    index: eval_index,
                    timestamp: series.timestamp(eval_index),
                    high_index: t.high_index,
                    bottom_index: t.bottom_index,
                };
                log.push(signal)?;
                debug!(
                    index = eval_index,
                    high_index = t.high_index,
                    bottom_index = t.bottom_index,
                    total_decline,
                    rebound,
                    "signal emitted"
                );
                return Ok(Some(signal));
            }
        }

        Ok(None)
    }
}

pub(crate) fn check_aligned(series: &PriceSeries, volatility: &[Option<f64>]) -> Result<()> {
    if volatility.len() != series.len() {
        return Err(DetectError::LengthMismatch {
            field: "volatility",
            expected: series.len(),
            got: volatility.len(),
        });
    }
    Ok(())
}

fn check_trace(t: &TrendTrace, eval_index: usize) -> Result<()> {
    let violation = |reason| DetectError::InvariantViolation {
        eval_index,
        high_index: t.high_index,
        reason,
    };
    if !(t.high_index <= t.bottom_index && t.bottom_index <= eval_index) {
        return Err(violation("bottom outside [high, eval]"));
    }
    if t.bottom_price >= t.high_price {
        return Err(violation("bottom not below high"));
    }
    Ok(())
}

impl ParameterizedDetector for DeclineReboundDetector {
    fn param_meta() -> &'static [ParamMeta] {
        static META: [ParamMeta; 5] = [
            ParamMeta::period(
                "lookback_days",
                20.0,
                (5.0, 60.0, 5.0),
                "Trailing days searched for candidate highs",
            ),
            ParamMeta::threshold(
                "base_decline",
                -0.05,
                (-0.15, -0.02, 0.01),
                "Required decline before volatility correction",
            ),
            ParamMeta::threshold(
                "base_rebound",
                0.005,
                (0.0, 0.02, 0.0025),
                "Required rebound before volatility correction",
            ),
            ParamMeta::threshold(
                "lower_band",
                0.01,
                (0.005, 0.02, 0.005),
                "ATR below which thresholds shrink",
            ),
            ParamMeta::threshold(
                "upper_band",
                0.02,
                (0.01, 0.04, 0.005),
                "ATR above which thresholds grow",
            ),
        ];
        &META
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let bands = CorrectionBands {
            lower: get_threshold(params, "lower_band", 0.01)?,
            upper: get_threshold(params, "upper_band", 0.02)?,
        };
        let thresholds = Thresholds::new(
            get_threshold(params, "base_decline", -0.05)?,
            get_threshold(params, "base_rebound", 0.005)?,
        )
        .with_bands(bands);

        let detector = Self::new(get_period(params, "lookback_days", 20)?, thresholds);
        detector.validate_config()?;
        Ok(detector)
    }

    fn pattern_id_str() -> &'static str {
        "DECLINE_REBOUND"
    }
}

//! # DRPD - Decline-Rebound Pattern Detector
//!
//! Volatility-normalized detection of decline-then-rebound patterns in daily
//! OHLC series.
//!
//! ## Quick Start
//!
//! ```rust
//! use drpd::prelude::*;
//!
//! // Define your OHLC data
//! struct Day { t: i64, h: f64, l: f64, c: f64 }
//!
//! impl OHLC for Day {
//!     fn high(&self) -> f64 { self.h }
//!     fn low(&self) -> f64 { self.l }
//!     fn close(&self) -> f64 { self.c }
//!     fn timestamp(&self) -> Option<i64> { Some(self.t) }
//! }
//!
//! // Create engine with default configuration
//! let engine = EngineBuilder::new()
//!     .lookback_days(20)
//!     .build()
//!     .unwrap();
//!
//! // Scan your data
//! let days: Vec<Day> = vec![];
//! let signals = engine.scan(&days).unwrap();
//! ```

pub mod analysis;
pub mod detectors;
pub mod params;
pub mod volatility;

pub mod prelude {
    pub use crate::{
        // Analysis
        analysis::{analyze, AnalysisConfig, SignalReport, TradeDirection},
        // Detectors
        detectors::*,
        // Parameters
        params::{get_period, get_ratio, get_threshold, ParamMeta, ParamType, ParameterizedDetector},
        // Parallel
        scan_parallel,
        // Volatility
        volatility::{
            adjusted_thresholds, correction_factor, relative_atr, true_range, CorrectionBands,
            ThresholdPair, Thresholds,
        },
        // Engine
        DayOutcome,
        DefaultEngine,
        DetectError,
        DetectorConfig,
        Direction,
        EngineBuilder,
        // Core traits
        OHLCExt,
        Period,
        PrecomputedVolatility,
        PriceSeries,
        Ratio,
        RelativeAtr,
        Result,
        ScanError,
        ScanResult,
        Signal,
        SignalEngine,
        SignalIterator,
        SignalLog,
        VolatilityProvider,
        OHLC,
    };
}

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

use detectors::{check_aligned, DeclineReboundDetector, TrendTrace};
use volatility::{CorrectionBands, Thresholds};

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, DetectError>;

/// Errors that can occur during detection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Length mismatch for {field}: expected {expected}, got {got}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Missing {field} at index {index}")]
    MissingField { index: usize, field: &'static str },

    #[error("Invalid {field} at index {index}: {value} (must be finite and > 0)")]
    InvalidPrice {
        index: usize,
        field: &'static str,
        value: f64,
    },

    #[error("Timestamp at index {index} ({current}) does not follow {previous}")]
    NonMonotonicTimestamp {
        index: usize,
        previous: i64,
        current: i64,
    },

    #[error("Invalid OHLC at index {index}: {reason}")]
    InvalidOHLC { index: usize, reason: &'static str },

    #[error("Invariant violated at eval {eval_index} (high {high_index}): {reason}")]
    InvariantViolation {
        eval_index: usize,
        high_index: usize,
        reason: &'static str,
    },

    #[error("Scan cancelled before index {at_index}")]
    Cancelled { at_index: usize },
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(DetectError::InvalidValue("Ratio cannot be NaN or infinite"));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(DetectError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(DetectError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLC TRAITS
// ============================================================

/// Core daily bar trait. `open` is not used by detection.
pub trait OHLC {
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;

    fn open(&self) -> f64 {
        self.close()
    }

    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Blanket impl for references to dyn OHLC
impl OHLC for &dyn OHLC {
    fn high(&self) -> f64 {
        (*self).high()
    }

    fn low(&self) -> f64 {
        (*self).low()
    }

    fn close(&self) -> f64 {
        (*self).close()
    }

    fn open(&self) -> f64 {
        (*self).open()
    }

    fn timestamp(&self) -> Option<i64> {
        (*self).timestamp()
    }
}

/// Extension trait with computed properties for OHLC data
pub trait OHLCExt: OHLC {
    /// Validate one bar. Errors carry index 0; callers re-index.
    fn validate(&self) -> Result<()> {
        for (field, value) in [("high", self.high()), ("low", self.low()), ("close", self.close())]
        {
            if value.is_nan() {
                return Err(DetectError::MissingField { index: 0, field });
            }
            if value.is_infinite() || value <= 0.0 {
                return Err(DetectError::InvalidPrice {
                    index: 0,
                    field,
                    value,
                });
            }
        }
        if self.high() < self.low() {
            return Err(DetectError::InvalidOHLC {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: OHLC> OHLCExt for T {}

/// Direction of a breakout or trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
}

// ============================================================
// PRICE SERIES
// ============================================================

/// Validated, immutable daily price columns.
///
/// Timestamps strictly increase; every price is finite and > 0; high >= low.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    timestamps: Vec<i64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
}

/// Remap a single-bar validation error to its position in the series.
fn at_index(err: DetectError, index: usize) -> DetectError {
    match err {
        DetectError::MissingField { field, .. } => DetectError::MissingField { index, field },
        DetectError::InvalidPrice { field, value, .. } => DetectError::InvalidPrice {
            index,
            field,
            value,
        },
        DetectError::InvalidOHLC { reason, .. } => DetectError::InvalidOHLC { index, reason },
        other => other,
    }
}

impl PriceSeries {
    pub fn from_bars<T: OHLC>(bars: &[T]) -> Result<Self> {
        let mut timestamps = Vec::with_capacity(bars.len());
        for (i, bar) in bars.iter().enumerate() {
            let ts = bar.timestamp().ok_or(DetectError::MissingField {
                index: i,
                field: "timestamp",
            })?;
            timestamps.push(ts);
        }
        Self::from_columns(
            timestamps,
            bars.iter().map(|b| b.high()).collect(),
            bars.iter().map(|b| b.low()).collect(),
            bars.iter().map(|b| b.close()).collect(),
        )
    }

    pub fn from_columns(
        timestamps: Vec<i64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
    ) -> Result<Self> {
        let n = timestamps.len();
        for (field, len) in [("high", high.len()), ("low", low.len()), ("close", close.len())] {
            if len != n {
                return Err(DetectError::LengthMismatch {
                    field,
                    expected: n,
                    got: len,
                });
            }
        }

        let series = Self {
            timestamps,
            high,
            low,
            close,
        };
        series.validate()?;
        Ok(series)
    }

    fn validate(&self) -> Result<()> {
        for i in 0..self.len() {
            self.bar(i).validate().map_err(|e| at_index(e, i))?;
            if i > 0 && self.timestamps[i] <= self.timestamps[i - 1] {
                return Err(DetectError::NonMonotonicTimestamp {
                    index: i,
                    previous: self.timestamps[i - 1],
                    current: self.timestamps[i],
                });
            }
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    #[inline]
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    #[inline]
    pub fn high(&self) -> &[f64] {
        &self.high
    }

    #[inline]
    pub fn low(&self) -> &[f64] {
        &self.low
    }

    #[inline]
    pub fn close(&self) -> &[f64] {
        &self.close
    }

    #[inline]
    pub fn timestamp(&self, index: usize) -> i64 {
        self.timestamps[index]
    }

    /// View of day `index` as a bar
    pub fn bar(&self, index: usize) -> DayBar {
        DayBar {
            timestamp: self.timestamps[index],
            high: self.high[index],
            low: self.low[index],
            close: self.close[index],
        }
    }
}

/// One day of a [`PriceSeries`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayBar {
    pub timestamp: i64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl OHLC for DayBar {
    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.timestamp)
    }
}

// ============================================================
// SIGNALS
// ============================================================

/// An accepted decline-then-rebound signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Evaluation day on which the trend ended
    pub index: usize,
    pub timestamp: i64,
    /// Candidate high the trend started from
    pub high_index: usize,
    /// Lowest close between the high and the signal
    pub bottom_index: usize,
}

/// Append-only, index-ordered log of emitted signals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalLog {
    signals: Vec<Signal>,
}

impl SignalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a signal. Indices must strictly increase.
    pub fn push(&mut self, signal: Signal) -> Result<()> {
        if let Some(last) = self.signals.last() {
            if signal.index <= last.index {
                return Err(DetectError::InvariantViolation {
                    eval_index: signal.index,
                    high_index: signal.high_index,
                    reason: "signal log must grow in index order",
                });
            }
        }
        self.signals.push(signal);
        Ok(())
    }

    /// Whether any logged signal lies strictly inside `(lo, hi)`.
    pub fn any_between(&self, lo: usize, hi: usize) -> bool {
        let first_after = self.signals.partition_point(|s| s.index <= lo);
        self.signals.get(first_after).is_some_and(|s| s.index < hi)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Signal] {
        &self.signals
    }

    pub fn last(&self) -> Option<&Signal> {
        self.signals.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Signal> {
        self.signals.iter()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.signals.iter().map(|s| s.index).collect()
    }

    pub fn into_vec(self) -> Vec<Signal> {
        self.signals
    }
}

impl IntoIterator for SignalLog {
    type Item = Signal;
    type IntoIter = std::vec::IntoIter<Signal>;

    fn into_iter(self) -> Self::IntoIter {
        self.signals.into_iter()
    }
}

impl<'a> IntoIterator for &'a SignalLog {
    type Item = &'a Signal;
    type IntoIter = std::slice::Iter<'a, Signal>;

    fn into_iter(self) -> Self::IntoIter {
        self.signals.iter()
    }
}

// ============================================================
// VOLATILITY PROVIDERS
// ============================================================

/// Provider of the per-day volatility metric - computed once per series
pub trait VolatilityProvider: Send + Sync {
    fn compute_all(&self, series: &PriceSeries) -> Result<Vec<Option<f64>>>;
}

/// Relative ATR over `window` days
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeAtr {
    pub window: Period,
}

impl Default for RelativeAtr {
    fn default() -> Self {
        Self {
            window: Period::new_const(volatility::DEFAULT_ATR_WINDOW),
        }
    }
}

impl VolatilityProvider for RelativeAtr {
    fn compute_all(&self, series: &PriceSeries) -> Result<Vec<Option<f64>>> {
        volatility::relative_atr(
            series.high(),
            series.low(),
            series.close(),
            self.window.get(),
        )
    }
}

/// Externally computed metric, aligned day for day with the series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrecomputedVolatility(pub Vec<Option<f64>>);

impl VolatilityProvider for PrecomputedVolatility {
    fn compute_all(&self, series: &PriceSeries) -> Result<Vec<Option<f64>>> {
        check_aligned(series, &self.0)?;
        // Non-finite entries count as undefined
        Ok(self
            .0
            .iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect())
    }
}

// ============================================================
// CONFIG
// ============================================================

/// Detection configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Trailing days searched for candidate highs
    pub lookback_days: Period,
    /// Relative ATR window, used by the default volatility provider
    pub atr_window: Period,
    pub base_decline: f64,
    pub base_rebound: f64,
    pub bands: CorrectionBands,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            lookback_days: Period::new_const(20),
            atr_window: Period::new_const(volatility::DEFAULT_ATR_WINDOW),
            base_decline: volatility::DEFAULT_BASE_DECLINE,
            base_rebound: volatility::DEFAULT_BASE_REBOUND,
            bands: CorrectionBands::default(),
        }
    }
}

impl DetectorConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(self.base_decline, self.base_rebound).with_bands(self.bands)
    }

    pub fn detector(&self) -> DeclineReboundDetector {
        DeclineReboundDetector::new(self.lookback_days, self.thresholds())
    }

    pub fn validate(&self) -> Result<()> {
        Period::new(self.lookback_days.get())?;
        Period::new(self.atr_window.get())?;
        self.thresholds().validate()
    }
}

// ============================================================
// SIGNAL ENGINE
// ============================================================

/// Main detection engine
#[derive(Debug)]
pub struct SignalEngine<V: VolatilityProvider = RelativeAtr> {
    detector: DeclineReboundDetector,
    provider: V,
    config: DetectorConfig,
}

impl<V: VolatilityProvider> SignalEngine<V> {
    pub fn new(provider: V, config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            detector: config.detector(),
            provider,
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    #[inline]
    pub fn detector(&self) -> &DeclineReboundDetector {
        &self.detector
    }

    // ===========================================
    // LOW-LEVEL: Primitives
    // ===========================================

    /// Compute the volatility metric for every day.
    pub fn compute_volatility(&self, series: &PriceSeries) -> Result<Vec<Option<f64>>> {
        let volatility = self.provider.compute_all(series)?;
        check_aligned(series, &volatility)?;
        Ok(volatility)
    }

    /// Evaluate one day against an explicit log.
    pub fn step(
        &self,
        series: &PriceSeries,
        volatility: &[Option<f64>],
        eval_index: usize,
        log: &mut SignalLog,
    ) -> Result<Option<Signal>> {
        self.detector.step(series, volatility, eval_index, log)
    }

    // ===========================================
    // HIGH-LEVEL: Batch processing
    // ===========================================

    /// Validate bars and scan them.
    pub fn scan<T: OHLC>(&self, bars: &[T]) -> Result<Vec<Signal>> {
        let series = PriceSeries::from_bars(bars)?;
        self.scan_series(&series)
    }

    pub fn scan_series(&self, series: &PriceSeries) -> Result<Vec<Signal>> {
        let volatility = self.compute_volatility(series)?;
        self.run(series, &volatility, None)
    }

    /// Scan, checking `cancel` between evaluation days.
    pub fn scan_with_cancel(&self, series: &PriceSeries, cancel: &AtomicBool) -> Result<Vec<Signal>> {
        let volatility = self.compute_volatility(series)?;
        self.run(series, &volatility, Some(cancel))
    }

    /// Trace every (candidate, day) pair in parallel, then commit signals in
    /// day order. Same output as [`scan_series`](Self::scan_series).
    pub fn scan_parallel_traces(&self, series: &PriceSeries) -> Result<Vec<Signal>> {
        let volatility = self.compute_volatility(series)?;
        let detector = &self.detector;
        let tracer = detector.tracer(series, &volatility);

        let days: Vec<(usize, Vec<TrendTrace>)> = detector
            .eval_range(series.len())
            .into_par_iter()
            .filter(|&eval| volatility[eval].is_some())
            .map(|eval| {
                let traces = detector
                    .candidates(eval)
                    .map(|high| tracer.trace(high, eval))
                    .collect();
                (eval, traces)
            })
            .collect();

        let mut log = SignalLog::new();
        for (eval, traces) in days {
            let Some(pair) = detector.thresholds.adjusted_opt(volatility[eval]) else {
                continue;
            };
            detector.commit(series, eval, pair, traces, &mut log)?;
        }

        self.summarize(series, &volatility, &log);
        Ok(log.into_vec())
    }

    /// Create a day-by-day iterator over the scan.
    pub fn iter<'a>(&'a self, series: &'a PriceSeries) -> Result<SignalIterator<'a, V>> {
        let volatility = self.compute_volatility(series)?;
        Ok(SignalIterator::new(self, series, volatility))
    }

    // ===========================================
    // Internal helpers
    // ===========================================

    fn run(
        &self,
        series: &PriceSeries,
        volatility: &[Option<f64>],
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<Signal>> {
        let mut log = SignalLog::new();
        for eval_index in self.detector.eval_range(series.len()) {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                return Err(DetectError::Cancelled {
                    at_index: eval_index,
                });
            }
            self.detector.step(series, volatility, eval_index, &mut log)?;
        }
        self.summarize(series, volatility, &log);
        Ok(log.into_vec())
    }

    fn summarize(&self, series: &PriceSeries, volatility: &[Option<f64>], log: &SignalLog) {
        let range = self.detector.eval_range(series.len());
        let evaluable = volatility[range.clone()].iter().flatten().count();
        info!(
            days = series.len(),
            evaluated = range.len(),
            evaluable,
            signals = log.len(),
            lookback_days = self.config.lookback_days.get(),
            "decline-rebound scan complete"
        );
    }
}

// ============================================================
// SIGNAL ITERATOR
// ============================================================

/// What happened on one evaluation day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayOutcome {
    pub index: usize,
    /// False when the day's volatility is undefined
    pub evaluable: bool,
    pub signal: Option<Signal>,
}

/// Iterator over evaluation days, carrying the signal log along
pub struct SignalIterator<'a, V: VolatilityProvider> {
    engine: &'a SignalEngine<V>,
    series: &'a PriceSeries,
    volatility: Vec<Option<f64>>,
    log: SignalLog,
    current: usize,
    end: usize,
}

impl<'a, V: VolatilityProvider> SignalIterator<'a, V> {
    fn new(engine: &'a SignalEngine<V>, series: &'a PriceSeries, volatility: Vec<Option<f64>>) -> Self {
        let range = engine.detector.eval_range(series.len());
        Self {
            engine,
            series,
            volatility,
            log: SignalLog::new(),
            current: range.start,
            end: range.end,
        }
    }

    /// Signals emitted so far
    pub fn log(&self) -> &SignalLog {
        &self.log
    }

    pub fn into_log(self) -> SignalLog {
        self.log
    }
}

impl<'a, V: VolatilityProvider> Iterator for SignalIterator<'a, V> {
    type Item = Result<DayOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.end {
            return None;
        }

        let index = self.current;
        self.current += 1;

        let evaluable = self.volatility[index].is_some();
        match self
            .engine
            .step(self.series, &self.volatility, index, &mut self.log)
        {
            Ok(signal) => Some(Ok(DayOutcome {
                index,
                evaluable,
                signal,
            })),
            Err(e) => {
                self.current = self.end;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.current);
        (remaining, Some(remaining))
    }
}

impl<'a, V: VolatilityProvider> ExactSizeIterator for SignalIterator<'a, V> {}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating SignalEngine instances
pub struct EngineBuilder<V: VolatilityProvider = RelativeAtr> {
    provider: Option<V>,
    config: DetectorConfig,
}

impl Default for EngineBuilder<RelativeAtr> {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder<RelativeAtr> {
    pub fn new() -> Self {
        Self::from_config(DetectorConfig::default())
    }

    /// Start from a full configuration; the ATR window comes from it.
    pub fn from_config(config: DetectorConfig) -> Self {
        Self {
            provider: None,
            config,
        }
    }

    /// Relative ATR window (default 60)
    pub fn atr_window(mut self, window: usize) -> Self {
        self.config.atr_window = Period::new_const(window);
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<SignalEngine<RelativeAtr>> {
        let provider = self.provider.unwrap_or(RelativeAtr {
            window: self.config.atr_window,
        });
        SignalEngine::new(provider, self.config)
    }
}

impl<V: VolatilityProvider> EngineBuilder<V> {
    /// Change volatility provider
    pub fn volatility_provider<V2: VolatilityProvider>(self, provider: V2) -> EngineBuilder<V2> {
        EngineBuilder {
            provider: Some(provider),
            config: self.config,
        }
    }

    /// Lookback window of candidate highs (default 20)
    pub fn lookback_days(mut self, days: usize) -> Self {
        self.config.lookback_days = Period::new_const(days);
        self
    }

    /// Base thresholds before volatility correction
    pub fn base_thresholds(mut self, decline: f64, rebound: f64) -> Self {
        self.config.base_decline = decline;
        self.config.base_rebound = rebound;
        self
    }

    /// ATR band edges of the correction factor (default 1% / 2%)
    pub fn correction_bands(mut self, lower: f64, upper: f64) -> Self {
        self.config.bands = CorrectionBands { lower, upper };
        self
    }

    /// Build an engine around a custom provider
    pub fn build_with_provider(self) -> Result<SignalEngine<V>> {
        let provider = self
            .provider
            .ok_or_else(|| DetectError::InvalidConfig("no volatility provider set".into()))?;
        SignalEngine::new(provider, self.config)
    }
}

// ============================================================
// PARALLEL SCANNING
// ============================================================

use rayon::prelude::*;

/// Result of scanning a single instrument
#[derive(Debug)]
pub struct ScanResult {
    pub symbol: String,
    pub signals: Vec<Signal>,
}

/// Error from scanning a single instrument
#[derive(Debug)]
pub struct ScanError {
    pub symbol: String,
    pub error: DetectError,
}

/// Scan independent instruments in parallel
pub fn scan_parallel<'a, T, I, V>(
    engine: &SignalEngine<V>,
    instruments: I,
) -> (Vec<ScanResult>, Vec<ScanError>)
where
    T: OHLC + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, &'a [T])>,
    V: VolatilityProvider,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(symbol, bars)| {
            engine
                .scan(bars)
                .map(|signals| ScanResult {
                    symbol: symbol.to_string(),
                    signals,
                })
                .map_err(|error| ScanError {
                    symbol: symbol.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

// ============================================================
// TYPE ALIASES
// ============================================================

/// Default engine with relative ATR volatility
pub type DefaultEngine = SignalEngine<RelativeAtr>;

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Test daily bar
    #[derive(Debug, Clone)]
    struct Day {
        t: Option<i64>,
        h: f64,
        l: f64,
        c: f64,
    }

    impl Day {
        fn new(t: i64, c: f64) -> Self {
            Self {
                t: Some(t),
                h: c * 1.01,
                l: c * 0.99,
                c,
            }
        }
    }

    impl OHLC for Day {
        fn high(&self) -> f64 {
            self.h
        }

        fn low(&self) -> f64 {
            self.l
        }

        fn close(&self) -> f64 {
            self.c
        }

        fn timestamp(&self) -> Option<i64> {
            self.t
        }
    }

    fn days(close: &[f64]) -> Vec<Day> {
        close
            .iter()
            .enumerate()
            .map(|(i, &c)| Day::new(i as i64, c))
            .collect()
    }

    fn flat_series(close: &[f64]) -> PriceSeries {
        PriceSeries::from_columns(
            (0..close.len() as i64).collect(),
            close.to_vec(),
            close.to_vec(),
            close.to_vec(),
        )
        .unwrap()
    }

    fn neutral_engine(lookback: usize, n: usize) -> SignalEngine<PrecomputedVolatility> {
        EngineBuilder::new()
            .lookback_days(lookback)
            .volatility_provider(PrecomputedVolatility(vec![Some(0.015); n]))
            .build_with_provider()
            .unwrap()
    }

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(0.5).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
        assert!(Ratio::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(100).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_series_rejects_missing_timestamp() {
        let mut bars = days(&[100.0, 101.0]);
        bars[1].t = None;
        let err = PriceSeries::from_bars(&bars).unwrap_err();
        assert_eq!(
            err,
            DetectError::MissingField {
                index: 1,
                field: "timestamp"
            }
        );
    }

    #[test]
    fn test_series_rejects_bad_prices() {
        let mut bars = days(&[100.0, 101.0, 102.0]);
        bars[2].c = 0.0;
        assert!(matches!(
            PriceSeries::from_bars(&bars),
            Err(DetectError::InvalidPrice {
                index: 2,
                field: "close",
                ..
            })
        ));

        let mut bars = days(&[100.0, 101.0]);
        bars[1].h = f64::NAN;
        assert!(matches!(
            PriceSeries::from_bars(&bars),
            Err(DetectError::MissingField {
                index: 1,
                field: "high"
            })
        ));

        let mut bars = days(&[100.0, 101.0]);
        bars[0].h = 90.0;
        assert!(matches!(
            PriceSeries::from_bars(&bars),
            Err(DetectError::InvalidOHLC { index: 0, .. })
        ));
    }

    #[test]
    fn test_series_rejects_non_monotonic_timestamps() {
        let mut bars = days(&[100.0, 101.0, 102.0]);
        bars[2].t = Some(1);
        assert!(matches!(
            PriceSeries::from_bars(&bars),
            Err(DetectError::NonMonotonicTimestamp { index: 2, .. })
        ));
    }

    #[test]
    fn test_series_rejects_mismatched_columns() {
        let err = PriceSeries::from_columns(vec![0, 1], vec![1.0, 1.0], vec![1.0], vec![1.0, 1.0])
            .unwrap_err();
        assert_eq!(
            err,
            DetectError::LengthMismatch {
                field: "low",
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn test_signal_log_between() {
        let mut log = SignalLog::new();
        for index in [3, 7, 12] {
            log.push(Signal {
                index,
                timestamp: index as i64,
                high_index: 0,
                bottom_index: 0,
            })
            .unwrap();
        }
        assert!(log.any_between(2, 4));
        assert!(!log.any_between(3, 7));
        assert!(log.any_between(3, 8));
        assert!(!log.any_between(12, 30));
        assert!(!log.any_between(0, 3));
    }

    #[test]
    fn test_signal_log_is_append_only_in_order() {
        let mut log = SignalLog::new();
        let s = Signal {
            index: 5,
            timestamp: 5,
            high_index: 1,
            bottom_index: 2,
        };
        log.push(s).unwrap();
        assert!(log.push(s).is_err());
        assert!(log.push(Signal { index: 4, ..s }).is_err());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_engine_builder() {
        let engine = EngineBuilder::new().build();
        assert!(engine.is_ok());
        assert!(EngineBuilder::new().lookback_days(0).build().is_err());
        assert!(EngineBuilder::new().atr_window(0).build().is_err());
        assert!(EngineBuilder::new()
            .base_thresholds(0.05, 0.005)
            .build()
            .is_err());
        assert!(EngineBuilder::new()
            .correction_bands(0.03, 0.01)
            .build()
            .is_err());
    }

    #[test]
    fn test_empty_scan() {
        let engine = EngineBuilder::new().build().unwrap();
        let bars: Vec<Day> = vec![];
        assert!(engine.scan(&bars).unwrap().is_empty());
    }

    #[test]
    fn test_scan_validates_input() {
        let engine = EngineBuilder::new().build().unwrap();
        let mut bars = days(&[100.0, 101.0]);
        bars[1].c = -1.0;
        assert!(engine.scan(&bars).is_err());
    }

    #[test]
    fn test_precomputed_length_mismatch() {
        let engine = neutral_engine(2, 3);
        let series = flat_series(&[100.0, 99.0]);
        assert!(matches!(
            engine.scan_series(&series),
            Err(DetectError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_end_to_end_signal() {
        let close = [100.0, 99.0, 98.0, 90.0, 91.0, 95.0];
        let engine = neutral_engine(4, close.len());
        let signals = engine.scan_series(&flat_series(&close)).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].index, 4);
    }

    #[test]
    fn test_iterator_matches_scan() {
        let close = [100.0, 99.0, 98.0, 90.0, 91.0, 95.0, 94.0, 88.0, 89.0];
        let engine = neutral_engine(3, close.len());
        let series = flat_series(&close);

        let scanned = engine.scan_series(&series).unwrap();
        let mut iter = engine.iter(&series).unwrap();
        let outcomes: Vec<DayOutcome> = iter.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(outcomes.len(), close.len() - 3);
        assert_eq!(outcomes[0].index, 3);

        let from_iter: Vec<Signal> = outcomes.iter().filter_map(|o| o.signal).collect();
        assert_eq!(from_iter, scanned);
        assert_eq!(iter.into_log().into_vec(), scanned);
    }

    #[test]
    fn test_iterator_reports_exact_length() {
        let close = [100.0, 99.0, 98.0, 90.0, 91.0, 95.0];
        let engine = neutral_engine(2, close.len());
        let series = flat_series(&close);

        let mut iter = engine.iter(&series).unwrap();
        assert_eq!(iter.size_hint(), (4, Some(4)));
        assert_eq!(iter.len(), 4);
        iter.next();
        assert_eq!(iter.len(), 3);
        assert_eq!(iter.by_ref().count(), 3);
        assert_eq!(iter.size_hint(), (0, Some(0)));
    }

    #[test]
    fn test_parallel_traces_match_sequential() {
        let close: Vec<f64> = (0..200)
            .map(|i| 100.0 + 8.0 * ((i as f64) * 0.37).sin() + 3.0 * ((i as f64) * 1.3).cos())
            .collect();
        let bars = days(&close);
        let series = PriceSeries::from_bars(&bars).unwrap();
        let engine = EngineBuilder::new()
            .atr_window(10)
            .lookback_days(15)
            .build()
            .unwrap();

        let sequential = engine.scan_series(&series).unwrap();
        let parallel = engine.scan_parallel_traces(&series).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_cancel_before_first_day() {
        let close = [100.0, 99.0, 98.0, 90.0, 91.0];
        let engine = neutral_engine(2, close.len());
        let cancel = AtomicBool::new(true);
        let err = engine
            .scan_with_cancel(&flat_series(&close), &cancel)
            .unwrap_err();
        assert_eq!(err, DetectError::Cancelled { at_index: 2 });

        let cancel = AtomicBool::new(false);
        assert!(engine
            .scan_with_cancel(&flat_series(&close), &cancel)
            .is_ok());
    }

    #[test]
    fn test_parallel_scan() {
        let engine = EngineBuilder::new().atr_window(5).lookback_days(5).build().unwrap();

        let bars1 = days(&(0..40).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        let bars2 = days(&(0..40).map(|i| 140.0 - i as f64).collect::<Vec<_>>());
        let mut bad = days(&[100.0, 101.0]);
        bad[1].t = Some(0);

        let instruments: Vec<(&str, &[Day])> = vec![
            ("AAA", bars1.as_slice()),
            ("BBB", bars2.as_slice()),
            ("BAD", bad.as_slice()),
        ];

        let (results, errors) = scan_parallel(&engine, instruments);
        assert_eq!(results.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].symbol, "BAD");
    }

    #[test]
    fn test_config_serde_defaults() {
        let cfg: DetectorConfig = serde_json::from_str(r#"{"lookback_days": 10}"#).unwrap();
        assert_eq!(cfg.lookback_days.get(), 10);
        assert_eq!(cfg.atr_window.get(), 60);
        assert_eq!(cfg.base_decline, -0.05);
        assert!(serde_json::from_str::<DetectorConfig>(r#"{"atr_window": 0}"#).is_err());
    }
}

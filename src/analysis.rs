//! Forward-return analysis of emitted signals
//!
//! Read-only over the price series and a finished signal list: computes the
//! trading return after each signal at fixed holding horizons, then summary
//! statistics with a one-sample t-test against zero per horizon.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detectors::helpers::daily_return;
use crate::{DetectError, Direction, PriceSeries, Result};

// ============================================================
// CONFIG
// ============================================================

/// Which side each signal is traded on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
    /// Long if the signal day closed up, short otherwise
    #[default]
    Bidirectional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Holding horizons in trading days
    pub holding_periods: Vec<usize>,
    pub direction: TradeDirection,
    /// p-value below which a horizon is reported significant
    pub significance_level: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            holding_periods: vec![1, 5, 10, 20, 40],
            direction: TradeDirection::Bidirectional,
            significance_level: 0.05,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.holding_periods.is_empty() {
            return Err(DetectError::InvalidConfig(
                "holding_periods must not be empty".into(),
            ));
        }
        if self.holding_periods.contains(&0) {
            return Err(DetectError::InvalidConfig(
                "holding_periods must be > 0".into(),
            ));
        }
        let level = self.significance_level;
        if !(level > 0.0 && level < 1.0) {
            return Err(DetectError::OutOfRange {
                field: "significance_level",
                value: level,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(())
    }

    fn max_period(&self) -> usize {
        self.holding_periods.iter().copied().max().unwrap_or(0)
    }
}

// ============================================================
// RESULTS
// ============================================================

/// Forward performance of one signal. Returns are in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPerformance {
    pub index: usize,
    pub timestamp: i64,
    pub base_price: f64,
    /// `Bullish` when traded long, `Bearish` when traded short
    pub direction: Direction,
    /// Trading return at each configured holding period, same order
    pub returns: Vec<f64>,
    /// Trading return for every day `1..=max_period`
    pub path: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonStats {
    pub holding_period: usize,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Percentage of positive returns
    pub win_rate: f64,
    pub t_stat: f64,
    pub p_value: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    pub holding_periods: Vec<usize>,
    pub performances: Vec<SignalPerformance>,
    pub stats: Vec<HorizonStats>,
    /// Signals dropped for lack of forward data
    pub skipped: usize,
}

impl SignalReport {
    pub fn total_signals(&self) -> usize {
        self.performances.len()
    }

    pub fn stats_for(&self, holding_period: usize) -> Option<&HorizonStats> {
        self.stats.iter().find(|s| s.holding_period == holding_period)
    }
}

// ============================================================
// ANALYSIS
// ============================================================

/// Analyze the forward returns after each signal index.
///
/// Signals too close to the end of the series for the longest holding period
/// are skipped. No analyzable signal yields an empty report.
pub fn analyze(
    series: &PriceSeries,
    indices: &[usize],
    config: &AnalysisConfig,
) -> Result<SignalReport> {
    config.validate()?;
    if let Some(&bad) = indices.iter().find(|&&i| i >= series.len()) {
        return Err(DetectError::OutOfRange {
            field: "signal index",
            value: bad as f64,
            min: 0.0,
            max: series.len() as f64,
        });
    }

    let max_period = config.max_period();
    let results: Vec<Option<SignalPerformance>> = indices
        .par_iter()
        .map(|&index| performance(series, index, max_period, config))
        .collect();

    let total = results.len();
    let performances: Vec<SignalPerformance> = results.into_iter().flatten().collect();
    let skipped = total - performances.len();
    if skipped > 0 {
        warn!(skipped, max_period, "signals without enough forward data");
    }

    let stats = config
        .holding_periods
        .iter()
        .enumerate()
        .filter_map(|(k, &period)| {
            let sample: Vec<f64> = performances
                .iter()
                .map(|p| p.returns[k])
                .filter(|r| r.is_finite())
                .collect();
            horizon_stats(period, &sample, config.significance_level)
        })
        .collect();

    info!(
        signals = performances.len(),
        skipped,
        horizons = config.holding_periods.len(),
        "signal analysis complete"
    );

    Ok(SignalReport {
        holding_periods: config.holding_periods.clone(),
        performances,
        stats,
        skipped,
    })
}

fn performance(
    series: &PriceSeries,
    index: usize,
    max_period: usize,
    config: &AnalysisConfig,
) -> Option<SignalPerformance> {
    let last = index.checked_add(max_period)?;
    if last >= series.len() {
        return None;
    }
    let close = series.close();
    let base = close[index];

    let long = match config.direction {
        TradeDirection::Long => true,
        TradeDirection::Short => false,
        TradeDirection::Bidirectional => index > 0 && daily_return(close, index) > 0.0,
    };
    let trade = |price: f64| {
        if long {
            (price / base - 1.0) * 100.0
        } else {
            (base / price - 1.0) * 100.0
        }
    };

    Some(SignalPerformance {
        index,
        timestamp: series.timestamp(index),
        base_price: base,
        direction: if long {
            Direction::Bullish
        } else {
            Direction::Bearish
        },
        returns: config
            .holding_periods
            .iter()
            .map(|&h| trade(close[index + h]))
            .collect(),
        path: (1..=max_period).map(|h| trade(close[index + h])).collect(),
    })
}

fn horizon_stats(holding_period: usize, sample: &[f64], level: f64) -> Option<HorizonStats> {
    if sample.is_empty() {
        return None;
    }
    let n = sample.len() as f64;
    let mean = sample.iter().sum::<f64>() / n;
    let ss = sample.iter().map(|r| (r - mean).powi(2)).sum::<f64>();
    let std_dev = (ss / n).sqrt();
    let win_rate = sample.iter().filter(|&&r| r > 0.0).count() as f64 / n * 100.0;

    let mut sorted = sample.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    let (t_stat, p_value) = t_test_zero(mean, ss, sample.len());

    Some(HorizonStats {
        holding_period,
        count: sample.len(),
        mean,
        median,
        std_dev,
        win_rate,
        t_stat,
        p_value,
        significant: p_value < level,
    })
}

/// One-sample t-test of the mean against zero. NaN when undefined.
fn t_test_zero(mean: f64, sum_sq: f64, n: usize) -> (f64, f64) {
    if n < 2 {
        return (f64::NAN, f64::NAN);
    }
    let df = (n - 1) as f64;
    let s = (sum_sq / df).sqrt();
    if s == 0.0 {
        return if mean == 0.0 {
            (f64::NAN, f64::NAN)
        } else {
            (mean.signum() * f64::INFINITY, 0.0)
        };
    }
    let t = mean / (s / (n as f64).sqrt());
    (t, student_t_two_sided(t, df))
}

/// Split signal indices into those before `split` and those on or after it.
pub fn split_by_timestamp(
    series: &PriceSeries,
    indices: &[usize],
    split: i64,
) -> (Vec<usize>, Vec<usize>) {
    indices
        .iter()
        .copied()
        .filter(|&i| i < series.len())
        .partition(|&i| series.timestamp(i) < split)
}

// ============================================================
// STUDENT-T DISTRIBUTION
// ============================================================

/// `P(|T| >= |t|)` for `df` degrees of freedom.
pub fn student_t_two_sided(t: f64, df: f64) -> f64 {
    if t.is_nan() || df <= 0.0 {
        return f64::NAN;
    }
    if t.is_infinite() {
        return 0.0;
    }
    let x = df / (df + t * t);
    regularized_beta(0.5 * df, 0.5, x)
}

#[allow(clippy::excessive_precision)]
const LANCZOS: [f64; 9] = [
    0.99999999999980993,
    676.5203681218851,
    -1259.1392167224028,
    771.32342877765313,
    -176.61502916214059,
    12.507343278686905,
    -0.13857109526572012,
    9.9843695780195716e-6,
    1.5056327351493116e-7,
];

fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + 7.5;
    let a = LANCZOS[1..]
        .iter()
        .enumerate()
        .fold(LANCZOS[0], |acc, (i, c)| acc + c / (x + (i + 1) as f64));
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Regularized incomplete beta `I_x(a, b)`.
fn regularized_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let front = (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln())
        .exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_fraction(b, a, 1.0 - x) / b
    }
}

/// Continued fraction for the incomplete beta (modified Lentz).
fn beta_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 3e-16;
    const TINY: f64 = 1e-300;

    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let (qab, qap, qam) = (a + b, a + 1.0, a - 1.0);
    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

// ============================================================
// TESTS
// ============================================================

//! Property tests for detection invariants.
//!
//! Uses proptest to verify:
//! 1. Signals only land on evaluable days inside the lookback range
//! 2. Every signal satisfies its own day's adjusted thresholds
//! 3. No signal's span contains an earlier signal
//! 4. Sequential, parallel-trace and iterator scans agree and are repeatable

use drpd::prelude::*;
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

/// Random walk of closes with a high/low envelope around each one.
fn arb_series() -> impl Strategy<Value = PriceSeries> {
    (
        50.0..150.0_f64,
        prop::collection::vec((-0.06..0.06_f64, 0.0..0.03_f64, 0.0..0.03_f64), 10..160),
    )
        .prop_map(|(start, steps)| {
            let mut price = start;
            let mut high = Vec::with_capacity(steps.len());
            let mut low = Vec::with_capacity(steps.len());
            let mut close = Vec::with_capacity(steps.len());
            for (ret, up, down) in steps {
                price = (price * (1.0 + ret)).max(1.0);
                close.push(price);
                high.push(price * (1.0 + up));
                low.push(price * (1.0 - down));
            }
            let timestamps = (0..close.len() as i64).map(|t| t * 86_400).collect();
            PriceSeries::from_columns(timestamps, high, low, close).unwrap()
        })
}

fn arb_engine() -> impl Strategy<Value = DefaultEngine> {
    (1..25_usize, 1..30_usize).prop_map(|(lookback, window)| {
        EngineBuilder::new()
            .lookback_days(lookback)
            .atr_window(window)
            .build()
            .unwrap()
    })
}

fn relative_change(from: f64, to: f64) -> f64 {
    (to - from) / from
}

// ── 1-3. Signal invariants ───────────────────────────────────────────

proptest! {
    #[test]
    fn signals_respect_invariants(series in arb_series(), engine in arb_engine()) {
        let signals = engine.scan_series(&series).unwrap();
        let volatility = engine.compute_volatility(&series).unwrap();
        let lookback = engine.config().lookback_days.get();
        let thresholds = engine.config().thresholds();
        let close = series.close();

        for (k, s) in signals.iter().enumerate() {
            // Evaluable day inside the scanned range
            prop_assert!(s.index >= lookback);
            prop_assert!(s.index < series.len());
            let atr = volatility[s.index];
            prop_assert!(atr.is_some());

            // Span ordering
            prop_assert!(s.high_index < s.index);
            prop_assert!(s.index - s.high_index <= lookback);
            prop_assert!(s.high_index <= s.bottom_index && s.bottom_index <= s.index);
            prop_assert_eq!(s.timestamp, series.timestamp(s.index));

            // Thresholds of the signal day
            let pair = thresholds.adjusted(atr.unwrap());
            let decline = relative_change(close[s.high_index], close[s.bottom_index]);
            let rebound = relative_change(close[s.bottom_index], close[s.index]);
            prop_assert!(decline < 0.0);
            prop_assert!(decline <= pair.decline);
            prop_assert!(rebound >= pair.rebound);

            // Strictly increasing, non-overlapping
            for earlier in &signals[..k] {
                prop_assert!(earlier.index < s.index);
                prop_assert!(
                    !(s.high_index < earlier.index && earlier.index < s.index),
                    "signal {} spans earlier signal {}", s.index, earlier.index
                );
            }
        }
    }

    #[test]
    fn no_signals_without_volatility(series in arb_series(), lookback in 1..25_usize) {
        let engine = EngineBuilder::new()
            .lookback_days(lookback)
            .volatility_provider(PrecomputedVolatility(vec![None; series.len()]))
            .build_with_provider()
            .unwrap();
        prop_assert!(engine.scan_series(&series).unwrap().is_empty());
    }
}

// ── 4. Scan agreement ────────────────────────────────────────────────

proptest! {
    #[test]
    fn scan_is_repeatable(series in arb_series(), engine in arb_engine()) {
        let first = engine.scan_series(&series).unwrap();
        let second = engine.scan_series(&series).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn parallel_traces_match_sequential(series in arb_series(), engine in arb_engine()) {
        let sequential = engine.scan_series(&series).unwrap();
        let parallel = engine.scan_parallel_traces(&series).unwrap();
        prop_assert_eq!(sequential, parallel);
    }

    #[test]
    fn iterator_matches_scan(series in arb_series(), engine in arb_engine()) {
        let scanned = engine.scan_series(&series).unwrap();
        let volatility = engine.compute_volatility(&series).unwrap();

        let mut stepped = Vec::new();
        for outcome in engine.iter(&series).unwrap() {
            let outcome = outcome.unwrap();
            prop_assert_eq!(outcome.evaluable, volatility[outcome.index].is_some());
            if !outcome.evaluable {
                prop_assert!(outcome.signal.is_none());
            }
            stepped.extend(outcome.signal);
        }
        prop_assert_eq!(scanned, stepped);
    }

    #[test]
    fn flat_series_never_signals(
        price in 1.0..500.0_f64,
        len in 1..120_usize,
        engine in arb_engine(),
    ) {
        let series = PriceSeries::from_columns(
            (0..len as i64).collect(),
            vec![price; len],
            vec![price; len],
            vec![price; len],
        )
        .unwrap();
        prop_assert!(engine.scan_series(&series).unwrap().is_empty());
    }
}

// ── Volatility normalization ─────────────────────────────────────────

proptest! {
    #[test]
    fn correction_is_neutral_inside_bands(atr in 0.01..=0.02_f64) {
        prop_assert_eq!(correction_factor(atr), 1.0);
        prop_assert_eq!(adjusted_thresholds(atr), (-0.05, 0.005));
    }

    #[test]
    fn correction_scales_with_volatility(a in 0.0001..0.2_f64, b in 0.0001..0.2_f64) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(correction_factor(lo) <= correction_factor(hi));
        prop_assert!(correction_factor(lo) > 0.0);
    }

    #[test]
    fn relative_atr_warmup(series in arb_series(), window in 1..40_usize) {
        let atr = relative_atr(series.high(), series.low(), series.close(), window).unwrap();
        prop_assert_eq!(atr.len(), series.len());
        for (i, v) in atr.iter().enumerate() {
            prop_assert_eq!(v.is_some(), i + 1 >= window);
            if let Some(x) = v {
                prop_assert!(*x >= 0.0);
            }
        }
    }
}

//! Property-based tests using proptest for invariant testing.
//!
//! These tests verify that:
//! 1. Every allocator yields weights summing to one
//! 2. Monte-Carlo draws are always feasible long-only portfolios
//! 3. The comparator always picks the maximum and zeroes invalid strategies
//! 4. Simplex projection and value evolution respect their constraints

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use roboport::allocation::{
    project_to_simplex, risk_parity_weights, MarkowitzOptimizer, MonteCarloSharpe,
    SolverSettings,
};
use roboport::comparator::{Evaluation, StrategyComparator};
use roboport::error::{AllocationError, Result};
use roboport::returns::{daily_returns, ReturnStats};
use roboport::types::{PriceTable, ValuePoint, Weights, WEIGHT_TOLERANCE};
use roboport::valuation::{value_evolution, ValuationSource};

// ============================================================================
// Generators
// ============================================================================

fn date(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + Duration::days(i as i64)
}

/// Random-walk prices for `n` assets built from bounded daily returns.
fn price_table_strategy(
    assets: std::ops::RangeInclusive<usize>,
    days: std::ops::RangeInclusive<usize>,
) -> impl Strategy<Value = PriceTable> {
    (assets, days).prop_flat_map(|(n, len)| {
        (
            prop::collection::vec(10.0..500.0f64, n),
            prop::collection::vec(prop::collection::vec(-0.05..0.05f64, n), len - 1),
        )
            .prop_map(move |(start, moves)| {
                let mut rows = vec![start];
                for step in &moves {
                    let prev = &rows[rows.len() - 1];
                    let next = prev.iter().zip(step).map(|(p, r)| p * (1.0 + r)).collect();
                    rows.push(next);
                }
                PriceTable::new(
                    (0..n).map(|i| format!("T{}", i)).collect(),
                    (0..len).map(date).collect(),
                    rows,
                )
                .unwrap()
            })
    })
}

/// Strictly positive weights normalized to one.
fn weights_strategy(n: usize) -> impl Strategy<Value = Weights> {
    prop::collection::vec(0.01..1.0f64, n).prop_map(|raw| {
        let sum: f64 = raw.iter().sum();
        Weights::new(raw.into_iter().map(|w| w / sum).collect())
    })
}

/// Valuation with canned returns keyed by the first weight.
struct Scripted {
    returns: Vec<f64>,
}

impl ValuationSource for Scripted {
    fn value_series(&self, _: &[String], weights: &Weights, _: u32) -> Result<Vec<ValuePoint>> {
        let index = weights[0].round() as usize;
        let r = *self
            .returns
            .get(index)
            .ok_or_else(|| AllocationError::Unavailable("no script".to_string()))?;
        Ok(vec![
            ValuePoint { date: date(0), value: 100.0 },
            ValuePoint { date: date(1), value: 100.0 * (1.0 + r) },
        ])
    }
}

// ============================================================================
// Allocation Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_risk_parity_weights_sum_to_one(prices in price_table_strategy(1..=6, 5..=60)) {
        let daily = daily_returns(&prices).unwrap();
        match risk_parity_weights(&daily) {
            Ok(w) => {
                prop_assert!(w.is_normalized(WEIGHT_TOLERANCE), "sum = {}", w.sum());
                prop_assert!(w.iter().all(|x| *x > 0.0));
            }
            Err(e) => prop_assert!(matches!(e, AllocationError::ZeroVariance { .. }), "expected ZeroVariance, got {:?}", e),
        }
    }

    #[test]
    fn prop_monte_carlo_draws_are_feasible(
        prices in price_table_strategy(1..=5, 10..=40),
        draws in 1usize..200,
        seed in any::<u64>(),
    ) {
        let stats = ReturnStats::from_prices(&prices).unwrap();
        let search = MonteCarloSharpe::seeded(draws, seed).search(&stats).unwrap();

        prop_assert_eq!(search.samples.len(), draws);
        for sample in &search.samples {
            let sum: f64 = sample.weights.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-9);
            prop_assert!(sample.weights.iter().all(|w| (0.0..=1.0).contains(w)));
        }

        let best = search.best().sharpe;
        prop_assert!(search.samples.iter().all(|s| !s.sharpe.is_finite() || s.sharpe <= best));
        if stats.num_assets() == 1 {
            prop_assert!((search.best().weights[0] - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn prop_max_sharpe_is_feasible(prices in price_table_strategy(2..=4, 20..=60)) {
        let stats = ReturnStats::from_prices(&prices).unwrap();
        let optimizer = MarkowitzOptimizer::new(SolverSettings::default());
        if let Ok(solution) = optimizer.max_sharpe(&stats) {
            prop_assert!(solution.weights.is_normalized(1e-6), "sum = {}", solution.weights.sum());
            prop_assert!(solution.weights.is_long_only(1e-6));
        }
    }

    #[test]
    fn prop_simplex_projection_is_feasible(v in prop::collection::vec(-10.0..10.0f64, 1..12)) {
        let p = project_to_simplex(&v);
        let sum: f64 = p.iter().sum();
        prop_assert_eq!(p.len(), v.len());
        prop_assert!((sum - 1.0).abs() < 1e-9, "sum = {}", sum);
        prop_assert!(p.iter().all(|x| *x >= 0.0));

        // Already feasible points are fixed.
        let again = project_to_simplex(&p);
        for (a, b) in p.iter().zip(&again) {
            prop_assert!((a - b).abs() < 1e-9);
        }
    }
}

// ============================================================================
// Comparator and Valuation Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_comparator_picks_first_maximum(returns in prop::collection::vec(-0.9..2.0f64, 1..10)) {
        let assets = vec!["A".to_string(), "B".to_string()];
        let mut comparator = StrategyComparator::new(
            Scripted { returns: returns.clone() },
            assets,
            3,
        );
        for i in 0..returns.len() {
            let w = Weights::new(vec![i as f64, 1.0 - i as f64]);
            let evaluation = comparator.evaluate(&format!("S{}", i), &w);
            prop_assert!(evaluation.is_scored());
        }

        let max = returns.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let first = returns.iter().position(|r| *r == max).unwrap();
        let (name, best) = comparator.best().unwrap();
        prop_assert_eq!(name, format!("S{}", first));
        prop_assert!((best - max).abs() < 1e-9);
    }

    #[test]
    fn prop_invalid_weight_sum_scores_zero(excess in 0.001..0.5f64, below in any::<bool>()) {
        let sum = if below { 1.0 - excess } else { 1.0 + excess };
        let mut comparator = StrategyComparator::new(
            Scripted { returns: vec![0.5] },
            vec!["A".to_string(), "B".to_string()],
            1,
        );
        let evaluation = comparator.evaluate("bad", &Weights::new(vec![0.0, sum]));

        let rejected = matches!(evaluation, Evaluation::Rejected { .. });
        prop_assert!(rejected);
        prop_assert_eq!(comparator.all_results()["bad"], 0.0);
    }

    #[test]
    fn prop_value_evolution_rejects_bad_sums(
        prices in price_table_strategy(2..=4, 2..=10),
        excess in 0.001..0.5f64,
    ) {
        let n = prices.num_assets();
        let mut raw = vec![1.0 / n as f64; n];
        raw[0] += excess;
        let err = value_evolution(&prices, &Weights::new(raw)).unwrap_err();
        let is_weights = matches!(err, AllocationError::InvalidWeights { .. });
        prop_assert!(is_weights);
    }

    #[test]
    fn prop_value_evolution_is_bounded_by_prices(
        (prices, weights) in price_table_strategy(1..=5, 2..=30)
            .prop_flat_map(|p| { let n = p.num_assets(); (Just(p), weights_strategy(n)) })
    ) {
        let series = value_evolution(&prices, &weights).unwrap();
        prop_assert_eq!(series.len(), prices.len());
        for (point, row) in series.iter().zip(prices.rows()) {
            let lo = row.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(point.value >= lo - 1e-9 && point.value <= hi + 1e-9);
        }
    }
}

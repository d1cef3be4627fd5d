//! Monte-Carlo search for the maximum Sharpe ratio portfolio.
//!
//! Each draw samples `N` uniform numbers and normalizes them to sum to one.
//! This is not uniform over the simplex but always yields feasible long-only
//! weights. Draws come sequentially from a single injected RNG so a seeded
//! run is reproducible; the per-draw metrics are then evaluated in parallel
//! and collected in draw order.

use super::{AllocationContext, Allocator};
use crate::error::{AllocationError, Result};
use crate::returns::ReturnStats;
use crate::types::Weights;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One random portfolio and its metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSample {
    pub weights: Vec<f64>,
    /// Expected log return `Σ mean_i · w_i`.
    pub expected_return: f64,
    /// `sqrt(wᵀ Σ w)`.
    pub volatility: f64,
    /// `expected_return / volatility`; non-finite for zero-volatility draws.
    pub sharpe: f64,
}

/// Full result of a Monte-Carlo search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharpeSearch {
    pub samples: Vec<PortfolioSample>,
    /// Index of the first sample with the maximum finite Sharpe ratio.
    pub best_index: usize,
    /// Draws whose Sharpe ratio was not finite (kept, never selected).
    pub degenerate_draws: usize,
}

impl SharpeSearch {
    pub fn best(&self) -> &PortfolioSample {
        &self.samples[self.best_index]
    }

    pub fn best_weights(&self) -> Weights {
        Weights::new(self.best().weights.clone())
    }

    pub fn returns(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.expected_return).collect()
    }

    pub fn volatilities(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.volatility).collect()
    }

    pub fn sharpes(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.sharpe).collect()
    }

    /// Largest sampled expected return (ignores NaN).
    pub fn max_return(&self) -> f64 {
        self.samples
            .iter()
            .map(|s| s.expected_return)
            .filter(|r| r.is_finite())
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Index of the first maximum among finite values.
fn first_max(values: impl Iterator<Item = f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.enumerate() {
        if !v.is_finite() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Random-search Sharpe optimizer with an injectable random source.
pub struct MonteCarloSharpe<R = StdRng> {
    num_portfolios: usize,
    rng: R,
    last: Option<SharpeSearch>,
}

impl MonteCarloSharpe<StdRng> {
    /// Search seeded from OS entropy.
    pub fn new(num_portfolios: usize) -> Self {
        Self::with_rng(num_portfolios, StdRng::from_entropy())
    }

    /// Reproducible search.
    pub fn seeded(num_portfolios: usize, seed: u64) -> Self {
        Self::with_rng(num_portfolios, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> MonteCarloSharpe<R> {
    pub fn with_rng(num_portfolios: usize, rng: R) -> Self {
        Self {
            num_portfolios,
            rng,
            last: None,
        }
    }

    pub fn num_portfolios(&self) -> usize {
        self.num_portfolios
    }

    /// Result of the most recent search.
    pub fn last_search(&self) -> Option<&SharpeSearch> {
        self.last.as_ref()
    }

    fn draw_weights(&mut self, n: usize) -> Vec<f64> {
        let raw: Vec<f64> = (0..n).map(|_| self.rng.gen::<f64>()).collect();
        let sum: f64 = raw.iter().sum();
        if sum <= 0.0 {
            return vec![1.0 / n as f64; n];
        }
        raw.into_iter().map(|x| x / sum).collect()
    }

    /// Sample `num_portfolios` weight vectors and keep the Sharpe maximizer.
    pub fn search(&mut self, stats: &ReturnStats) -> Result<SharpeSearch> {
        let n = stats.num_assets();
        if self.num_portfolios == 0 {
            return Err(AllocationError::invalid(
                "Monte-Carlo search needs at least one portfolio",
            ));
        }
        if n == 0 {
            return Err(AllocationError::invalid("Monte-Carlo search needs assets"));
        }

        info!(
            "Sampling {} random portfolios over {} assets",
            self.num_portfolios, n
        );

        let draws: Vec<Vec<f64>> = (0..self.num_portfolios)
            .map(|_| self.draw_weights(n))
            .collect();

        let samples: Vec<PortfolioSample> = draws
            .into_par_iter()
            .map(|weights| {
                let expected_return = stats.portfolio_return(&weights);
                let volatility = stats.portfolio_volatility(&weights);
                PortfolioSample {
                    weights,
                    expected_return,
                    volatility,
                    sharpe: expected_return / volatility,
                }
            })
            .collect();

        let degenerate_draws = samples.iter().filter(|s| !s.sharpe.is_finite()).count();
        if degenerate_draws > 0 {
            warn!(
                "{} of {} draws had an undefined Sharpe ratio",
                degenerate_draws,
                samples.len()
            );
        }

        let best_index = first_max(samples.iter().map(|s| s.sharpe)).ok_or_else(|| {
            AllocationError::NumericNonConvergence(
                "no random portfolio produced a finite Sharpe ratio".to_string(),
            )
        })?;

        debug!(
            "Best draw #{} with Sharpe {:.4}",
            best_index, samples[best_index].sharpe
        );

        let search = SharpeSearch {
            samples,
            best_index,
            degenerate_draws,
        };
        self.last = Some(search.clone());
        Ok(search)
    }
}

impl<R: Rng + Send> Allocator for MonteCarloSharpe<R> {
    fn name(&self) -> &str {
        "Sharpe Ratio"
    }

    fn allocate(&mut self, ctx: &AllocationContext) -> Result<Weights> {
        self.last = None;
        let search = self.search(ctx.stats)?;
        Ok(search.best_weights())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::test_support::wavy_prices;
    use crate::types::WEIGHT_TOLERANCE;
    use rand::rngs::mock::StepRng;

    fn stats() -> ReturnStats {
        ReturnStats::from_prices(&wavy_prices(&[0.0008, 0.0015, 0.0003], 120)).unwrap()
    }

    #[test]
    fn test_first_max_prefers_lowest_index() {
        assert_eq!(first_max([1.0, 3.0, 3.0, 2.0].into_iter()), Some(1));
        assert_eq!(first_max([f64::NAN, 0.5, f64::INFINITY, 0.5].into_iter()), Some(1));
        assert_eq!(first_max([f64::NAN].into_iter()), None);
    }

    #[test]
    fn test_single_draw_is_the_max() {
        let stats = stats();
        let search = MonteCarloSharpe::seeded(1, 7).search(&stats).unwrap();
        assert_eq!(search.samples.len(), 1);
        assert_eq!(search.best_index, 0);
        assert_eq!(search.best().weights, search.samples[0].weights);
    }

    #[test]
    fn test_duplicate_draws_keep_first_index() {
        let stats = stats();
        let mut mc = MonteCarloSharpe::with_rng(25, StepRng::new(1 << 62, 0));
        let search = mc.search(&stats).unwrap();

        let first = search.samples[0].sharpe;
        assert!(search.samples.iter().all(|s| s.sharpe == first));
        assert_eq!(search.best_index, 0);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let stats = stats();
        let a = MonteCarloSharpe::seeded(200, 42).search(&stats).unwrap();
        let b = MonteCarloSharpe::seeded(200, 42).search(&stats).unwrap();
        assert_eq!(a.best_index, b.best_index);
        assert_eq!(a.samples, b.samples);
    }

    #[test]
    fn test_samples_are_feasible_and_best_is_max() {
        let stats = stats();
        let search = MonteCarloSharpe::seeded(500, 3).search(&stats).unwrap();

        for s in &search.samples {
            let w = Weights::new(s.weights.clone());
            assert!(w.is_normalized(WEIGHT_TOLERANCE));
            assert!(w.is_long_only(0.0));
        }

        let best = search.best().sharpe;
        assert!(search.samples.iter().all(|s| s.sharpe <= best));
        assert_eq!(search.degenerate_draws, 0);
    }

    #[test]
    fn test_zero_portfolios_rejected() {
        let err = MonteCarloSharpe::seeded(0, 1).search(&stats()).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidInput(_)));
    }

    #[test]
    fn test_allocate_stores_last_search() {
        let prices = wavy_prices(&[0.0008, 0.0015], 60);
        let daily = crate::returns::daily_returns(&prices).unwrap();
        let stats = ReturnStats::from_prices(&prices).unwrap();
        let ctx = AllocationContext::new(&prices, &daily, &stats);

        let mut mc = MonteCarloSharpe::seeded(50, 11);
        let w = mc.allocate(&ctx).unwrap();
        assert_eq!(mc.name(), "Sharpe Ratio");
        assert_eq!(mc.last_search().unwrap().best_weights(), w);
    }
}

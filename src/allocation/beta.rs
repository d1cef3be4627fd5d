//! Beta-targeting allocation against a benchmark.
//!
//! Each asset's beta is `Cov(asset, benchmark) / Var(benchmark)` over the
//! dates both series share. Weights follow
//!
//! ```text
//! w_i = (β* - β_i) / (Σβ - β_i)
//! ```
//!
//! normalized by their sum. The formula is kept exactly as written and is
//! not bounded: when an asset's beta approaches the sum of all betas the
//! denominator goes to zero and the weight explodes, and weights may be
//! negative. Denominators below [`DEGENERATE_DENOMINATOR`] in magnitude are
//! reported as [`AllocationError::NumericNonConvergence`] so that the
//! strategy is scored as unusable instead of producing inf/NaN.

use super::{AllocationContext, Allocator};
use crate::error::{AllocationError, Result};
use crate::returns::{sample_covariance, sample_variance};
use crate::types::{ReturnSeries, Weights};
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Magnitude under which a beta-weight denominator is treated as zero.
pub const DEGENERATE_DENOMINATOR: f64 = 1e-10;

/// Beta of every asset column against the first column of `benchmark`.
pub fn calculate_betas(returns: &ReturnSeries, benchmark: &ReturnSeries) -> Result<Vec<f64>> {
    if benchmark.num_assets() == 0 {
        return Err(AllocationError::Unavailable(
            "Benchmark returns are empty".to_string(),
        ));
    }

    let bench_by_date: HashMap<NaiveDate, f64> = benchmark
        .dated_column(0)
        .into_iter()
        .filter(|(_, r)| r.is_finite())
        .collect();

    // Pairs of (asset row, benchmark value) on shared dates.
    let paired: Vec<(&Vec<f64>, f64)> = returns
        .dates()
        .iter()
        .zip(returns.rows().iter())
        .filter_map(|(d, row)| bench_by_date.get(d).map(|b| (row, *b)))
        .collect();

    if paired.len() < 2 {
        return Err(AllocationError::InsufficientData {
            needed: 2,
            available: paired.len(),
        });
    }

    let bench: Vec<f64> = paired.iter().map(|(_, b)| *b).collect();
    let variance = sample_variance(&bench);
    if !variance.is_finite() || variance <= 0.0 {
        return Err(AllocationError::ZeroVariance {
            what: format!("benchmark {} returns", benchmark.assets()[0]),
        });
    }

    let betas = (0..returns.num_assets())
        .map(|i| {
            let asset: Vec<f64> = paired.iter().map(|(row, _)| row[i]).collect();
            sample_covariance(&asset, &bench) / variance
        })
        .collect::<Vec<_>>();

    debug!(
        "Betas over {} shared observations: {:?}",
        paired.len(),
        betas
    );
    Ok(betas)
}

/// Beta-targeting weights for the given betas and target portfolio beta.
pub fn beta_weights(betas: &[f64], assets: &[String], target_beta: f64) -> Result<Weights> {
    if betas.is_empty() {
        return Err(AllocationError::invalid("No betas to weight"));
    }

    let beta_sum: f64 = betas.iter().sum();

    let raw = betas
        .iter()
        .zip(assets.iter())
        .map(|(beta, asset)| {
            let denominator = beta_sum - beta;
            if denominator.abs() < DEGENERATE_DENOMINATOR {
                warn!(
                    "Beta weight denominator for {} is {:.3e}; strategy unusable",
                    asset, denominator
                );
                return Err(AllocationError::NumericNonConvergence(format!(
                    "beta weight denominator for {} is zero (sum of betas {:.6} equals its beta)",
                    asset, beta_sum
                )));
            }
            Ok((target_beta - beta) / denominator)
        })
        .collect::<Result<Vec<f64>>>()?;

    let total: f64 = raw.iter().sum();
    if !total.is_finite() || total.abs() < DEGENERATE_DENOMINATOR {
        return Err(AllocationError::NumericNonConvergence(format!(
            "beta weights sum to {:.3e} and cannot be normalized",
            total
        )));
    }

    Ok(Weights::new(raw.into_iter().map(|w| w / total).collect()))
}

/// Beta-targeting allocator; requires a benchmark in the context.
#[derive(Debug, Clone)]
pub struct BetaAllocator {
    target_beta: f64,
    last_betas: Vec<f64>,
}

impl BetaAllocator {
    pub fn new(target_beta: f64) -> Self {
        Self {
            target_beta,
            last_betas: Vec::new(),
        }
    }

    pub fn target_beta(&self) -> f64 {
        self.target_beta
    }

    /// Betas computed by the most recent successful `allocate` call.
    pub fn last_betas(&self) -> &[f64] {
        &self.last_betas
    }
}

impl Default for BetaAllocator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Allocator for BetaAllocator {
    fn name(&self) -> &str {
        "Beta"
    }

    fn allocate(&mut self, ctx: &AllocationContext) -> Result<Weights> {
        let benchmark = ctx.benchmark.ok_or_else(|| {
            AllocationError::Unavailable("Benchmark returns not available".to_string())
        })?;

        self.last_betas.clear();
        let betas = calculate_betas(ctx.daily_returns, benchmark)?;
        self.last_betas = betas.clone();
        beta_weights(&betas, ctx.daily_returns.assets(), self.target_beta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WEIGHT_TOLERANCE;

    fn date(i: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i)
    }

    fn bench(values: &[f64]) -> ReturnSeries {
        ReturnSeries::single(
            "^GSPC",
            values.iter().enumerate().map(|(i, v)| (date(i as i64), *v)).collect(),
        )
    }

    fn assets(columns: Vec<Vec<f64>>) -> ReturnSeries {
        let len = columns[0].len();
        let names = (0..columns.len()).map(|i| format!("A{}", i)).collect();
        let rows = (0..len).map(|t| columns.iter().map(|c| c[t]).collect()).collect();
        ReturnSeries::from_parts(names, (0..len as i64).map(date).collect(), rows)
    }

    #[test]
    fn test_betas_are_scale_factors() {
        let market = vec![0.01, -0.02, 0.015, 0.003, -0.007];
        let half: Vec<f64> = market.iter().map(|r| r * 0.5).collect();
        let double: Vec<f64> = market.iter().map(|r| r * 2.0).collect();

        let betas = calculate_betas(&assets(vec![half, double]), &bench(&market)).unwrap();
        assert!((betas[0] - 0.5).abs() < 1e-12);
        assert!((betas[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_betas_align_on_dates() {
        let market = vec![0.01, -0.02, 0.015, 0.003, -0.007];
        // Benchmark shifted by one day: only four dates overlap.
        let shifted = ReturnSeries::single(
            "^GSPC",
            market.iter().enumerate().map(|(i, v)| (date(i as i64 + 1), *v)).collect(),
        );
        let asset = assets(vec![vec![0.0, 0.01, -0.02, 0.015, 0.003]]);
        let betas = calculate_betas(&asset, &shifted).unwrap();
        assert!((betas[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_beta_weight_formula() {
        let names = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let betas = [0.5, 1.5, 2.0];
        let w = beta_weights(&betas, &names, 1.0).unwrap();

        // Raw: (1-0.5)/(4-0.5), (1-1.5)/(4-1.5), (1-2)/(4-2)
        let raw = [0.5 / 3.5, -0.5 / 2.5, -1.0 / 2.0];
        let total: f64 = raw.iter().sum();
        for (wi, ri) in w.iter().zip(raw.iter()) {
            assert!((wi - ri / total).abs() < 1e-12);
        }
        assert!(w.is_normalized(WEIGHT_TOLERANCE));
        // Negative weights are not clamped.
        assert!(w.iter().any(|x| *x < 0.0));
    }

    #[test]
    fn test_degenerate_denominator_is_surfaced() {
        let names = vec!["A".to_string(), "B".to_string()];
        // Sum of betas equals A's beta.
        let err = beta_weights(&[1.2, 0.0], &names, 1.0).unwrap_err();
        assert!(matches!(err, AllocationError::NumericNonConvergence(_)));
    }

    #[test]
    fn test_zero_variance_benchmark() {
        let flat = vec![0.0; 5];
        let asset = assets(vec![vec![0.01, -0.01, 0.02, 0.0, 0.01]]);
        let err = calculate_betas(&asset, &bench(&flat)).unwrap_err();
        assert!(matches!(err, AllocationError::ZeroVariance { .. }));
    }

    #[test]
    fn test_missing_benchmark_is_unavailable() {
        let prices = crate::allocation::test_support::wavy_prices(&[0.001, 0.002], 30);
        let daily = crate::returns::daily_returns(&prices).unwrap();
        let stats = crate::returns::ReturnStats::from_prices(&prices).unwrap();
        let ctx = AllocationContext::new(&prices, &daily, &stats);

        let err = BetaAllocator::default().allocate(&ctx).unwrap_err();
        assert!(matches!(err, AllocationError::Unavailable(_)));
    }
}

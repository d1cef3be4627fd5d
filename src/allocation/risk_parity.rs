//! Risk parity allocation.

use super::{AllocationContext, Allocator};
use crate::error::{AllocationError, Result};
use crate::returns::std_dev;
use crate::types::{ReturnSeries, Weights};
use tracing::debug;

/// Weights that give every asset the same share of volatility.
///
/// With `σ_i` the sample standard deviation of asset `i`, the risk
/// contribution share is `c_i = σ_i / Σσ` and the unnormalized weight is
/// `(1/N) / c_i`. The result is normalized to sum to one.
///
/// An asset with zero (or non-finite) volatility has no defined share and is
/// reported as [`AllocationError::ZeroVariance`].
pub fn risk_parity_weights(returns: &ReturnSeries) -> Result<Weights> {
    let vols = std_dev(returns)?;

    if let Some(i) = vols.iter().position(|v| !v.is_finite() || *v <= 0.0) {
        return Err(AllocationError::ZeroVariance {
            what: format!("historical volatility of {}", returns.assets()[i]),
        });
    }

    let total_vol: f64 = vols.iter().sum();
    let target = 1.0 / vols.len() as f64;

    let raw: Vec<f64> = vols
        .iter()
        .map(|vol| {
            let contribution = vol / total_vol;
            target / contribution
        })
        .collect();

    debug!("Risk parity volatilities: {:?}", vols);
    Weights::new(raw).normalized()
}

/// Risk parity over the run's daily returns.
#[derive(Debug, Clone, Default)]
pub struct RiskParityAllocator;

impl RiskParityAllocator {
    pub fn new() -> Self {
        Self
    }
}

impl Allocator for RiskParityAllocator {
    fn name(&self) -> &str {
        "Risk Parity"
    }

    fn allocate(&mut self, ctx: &AllocationContext) -> Result<Weights> {
        risk_parity_weights(ctx.daily_returns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::test_support::wavy_prices;
    use crate::returns::daily_returns;
    use crate::types::WEIGHT_TOLERANCE;
    use chrono::NaiveDate;

    fn series(columns: Vec<Vec<f64>>) -> ReturnSeries {
        let len = columns[0].len();
        let dates = (0..len)
            .map(|i| NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64))
            .collect();
        let assets = (0..columns.len()).map(|i| format!("A{}", i)).collect();
        let rows = (0..len).map(|t| columns.iter().map(|c| c[t]).collect()).collect();
        ReturnSeries::from_parts(assets, dates, rows)
    }

    #[test]
    fn test_inverse_volatility_shape() {
        // B is exactly twice as volatile as A.
        let a = vec![0.01, -0.01, 0.02, -0.02];
        let b: Vec<f64> = a.iter().map(|r| r * 2.0).collect();
        let w = risk_parity_weights(&series(vec![a, b])).unwrap();

        assert!(w.is_normalized(WEIGHT_TOLERANCE));
        assert!((w[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((w[1] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_volatility_is_surfaced() {
        let flat = vec![0.0, 0.0, 0.0];
        let moving = vec![0.01, -0.02, 0.03];
        let err = risk_parity_weights(&series(vec![moving, flat])).unwrap_err();
        match err {
            AllocationError::ZeroVariance { what } => assert!(what.contains("A1")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_single_asset_gets_everything() {
        let w = risk_parity_weights(&series(vec![vec![0.01, -0.01, 0.005]])).unwrap();
        assert_eq!(w.as_slice(), &[1.0]);
    }

    #[test]
    fn test_allocator_uses_daily_returns() {
        let prices = wavy_prices(&[0.001, 0.002, 0.0005], 60);
        let daily = daily_returns(&prices).unwrap();
        let stats = crate::returns::ReturnStats::from_prices(&prices).unwrap();
        let ctx = AllocationContext::new(&prices, &daily, &stats);

        let w = RiskParityAllocator::new().allocate(&ctx).unwrap();
        assert_eq!(w.len(), 3);
        assert!(w.iter().all(|x| *x > 0.0));
        assert!(w.is_normalized(WEIGHT_TOLERANCE));
    }
}

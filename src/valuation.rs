//! Portfolio value evolution ("Profit Close").

use crate::data::PriceSource;
use crate::error::{AllocationError, Result};
use crate::types::{PriceTable, ValuePoint, Weights, WEIGHT_TOLERANCE};
use chrono::{Duration, NaiveDate};
use tracing::debug;

/// Produces the value series of a weighted portfolio over a horizon.
pub trait ValuationSource {
    /// Value of `weights` over `assets` for the last `horizon_years` years.
    fn value_series(&self, assets: &[String], weights: &Weights, horizon_years: u32) -> Result<Vec<ValuePoint>>;
}

/// Per date, `Σ w_i · price_i`.
///
/// Weights must sum to one within [`WEIGHT_TOLERANCE`]; they are never
/// renormalized here.
pub fn value_evolution(prices: &PriceTable, weights: &Weights) -> Result<Vec<ValuePoint>> {
    if weights.len() != prices.num_assets() {
        return Err(AllocationError::InvalidInput(format!(
            "Expected {} weights, got {}",
            prices.num_assets(),
            weights.len()
        )));
    }
    if !weights.is_normalized(WEIGHT_TOLERANCE) {
        return Err(AllocationError::InvalidWeights { sum: weights.sum() });
    }

    Ok(prices
        .dates()
        .iter()
        .zip(prices.rows().iter())
        .map(|(date, row)| ValuePoint {
            date: *date,
            value: weights.dot(row),
        })
        .collect())
}

/// Total return of a value series: `last / first - 1`.
///
/// Negative values are valid (short positions can make the Profit Close
/// negative). Fewer than two points is `Unavailable`; a zero or non-finite
/// endpoint leaves the ratio undefined and is `NumericNonConvergence`.
pub fn total_return(series: &[ValuePoint]) -> Result<f64> {
    if series.len() < 2 {
        return Err(AllocationError::Unavailable(format!(
            "value series has {} usable points",
            series.len()
        )));
    }
    let first = series[0].value;
    let last = series[series.len() - 1].value;
    if !first.is_finite() || !last.is_finite() || first == 0.0 {
        return Err(AllocationError::NumericNonConvergence(format!(
            "total return undefined for values {} -> {}",
            first, last
        )));
    }
    Ok(last / first - 1.0)
}

/// Values a portfolio over historical prices ending at `as_of`.
#[derive(Debug, Clone)]
pub struct HistoricalValuation<S> {
    source: S,
    as_of: NaiveDate,
}

impl<S: PriceSource> HistoricalValuation<S> {
    pub fn new(source: S, as_of: NaiveDate) -> Self {
        Self { source, as_of }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }
}

impl<S: PriceSource> ValuationSource for HistoricalValuation<S> {
    fn value_series(&self, assets: &[String], weights: &Weights, horizon_years: u32) -> Result<Vec<ValuePoint>> {
        let start = self.as_of - Duration::days(365 * i64::from(horizon_years));
        let prices = self.source.fetch_prices(assets, start, self.as_of)?;
        debug!(
            "Valuing {} assets over {} rows ({} to {})",
            assets.len(),
            prices.len(),
            start,
            self.as_of
        );
        value_evolution(&prices, weights)
    }
}

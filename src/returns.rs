//! Return series and the statistics shared by the allocators.
//!
//! Every function here is a pure transform of its input. Price tables with
//! fewer than two rows cannot produce a return and are rejected with
//! [`AllocationError::InsufficientData`].

use crate::error::{AllocationError, Result};
use crate::types::{PriceTable, ReturnSeries, Weights};
use serde::{Deserialize, Serialize};

fn require_rows(available: usize, needed: usize) -> Result<()> {
    if available < needed {
        return Err(AllocationError::InsufficientData { needed, available });
    }
    Ok(())
}

fn map_ratios(prices: &PriceTable, f: impl Fn(f64) -> f64) -> Result<ReturnSeries> {
    require_rows(prices.len(), 2)?;

    let rows = prices
        .rows()
        .windows(2)
        .map(|w| {
            w[1].iter()
                .zip(w[0].iter())
                .map(|(curr, prev)| f(curr / prev))
                .collect()
        })
        .collect();

    Ok(ReturnSeries::from_parts(
        prices.assets().to_vec(),
        prices.dates()[1..].to_vec(),
        rows,
    ))
}

/// Gross period returns `price[t] / price[t-1]`, first row dropped.
pub fn period_returns(prices: &PriceTable) -> Result<ReturnSeries> {
    map_ratios(prices, |r| r)
}

/// Natural log of the gross period returns.
pub fn log_returns(prices: &PriceTable) -> Result<ReturnSeries> {
    map_ratios(prices, f64::ln)
}

/// Simple daily returns `price[t] / price[t-1] - 1`.
pub fn daily_returns(prices: &PriceTable) -> Result<ReturnSeries> {
    map_ratios(prices, |r| r - 1.0)
}

/// Arithmetic mean of a slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample covariance of two equally long slices (n - 1 denominator).
pub fn sample_covariance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return f64::NAN;
    }
    let mean_a = mean(&a[..n]);
    let mean_b = mean(&b[..n]);
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum::<f64>()
        / (n - 1) as f64
}

/// Sample variance (n - 1 denominator).
pub fn sample_variance(values: &[f64]) -> f64 {
    sample_covariance(values, values)
}

/// Column-wise arithmetic mean.
pub fn mean_log_return(log_returns: &ReturnSeries) -> Result<Vec<f64>> {
    require_rows(log_returns.len(), 1)?;
    Ok(log_returns.columns().iter().map(|c| mean(c)).collect())
}

/// Sample covariance matrix over the columns.
pub fn covariance(returns: &ReturnSeries) -> Result<Vec<Vec<f64>>> {
    require_rows(returns.len(), 2)?;

    let columns = returns.columns();
    let n = columns.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let cov = sample_covariance(&columns[i], &columns[j]);
            matrix[i][j] = cov;
            matrix[j][i] = cov;
        }
    }
    Ok(matrix)
}

/// Column-wise sample standard deviation.
pub fn std_dev(returns: &ReturnSeries) -> Result<Vec<f64>> {
    require_rows(returns.len(), 2)?;
    Ok(returns
        .columns()
        .iter()
        .map(|c| sample_variance(c).sqrt())
        .collect())
}

/// Per-date portfolio return: dot product of each return row with the weights.
pub fn portfolio_returns(returns: &ReturnSeries, weights: &Weights) -> Result<Vec<f64>> {
    if weights.len() != returns.num_assets() {
        return Err(AllocationError::InvalidInput(format!(
            "Expected {} weights, got {}",
            returns.num_assets(),
            weights.len()
        )));
    }
    Ok(returns.rows().iter().map(|r| weights.dot(r)).collect())
}

/// Quadratic form `wᵀ Σ w`.
pub fn quadratic_form(weights: &[f64], matrix: &[Vec<f64>]) -> f64 {
    weights
        .iter()
        .zip(matrix.iter())
        .map(|(wi, row)| wi * row.iter().zip(weights.iter()).map(|(c, wj)| c * wj).sum::<f64>())
        .sum()
}

/// Mean log returns and covariance computed once per run.
///
/// Shared read-only by the Monte-Carlo search and the Markowitz optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStats {
    assets: Vec<String>,
    mean_log_return: Vec<f64>,
    covariance: Vec<Vec<f64>>,
    observations: usize,
}

impl ReturnStats {
    /// Build from explicit moments.
    pub fn new(assets: Vec<String>, mean_log_return: Vec<f64>, covariance: Vec<Vec<f64>>) -> Result<Self> {
        let n = assets.len();
        if n == 0 {
            return Err(AllocationError::invalid("Need at least one asset"));
        }
        if mean_log_return.len() != n {
            return Err(AllocationError::invalid(
                "Mean return length must match number of assets",
            ));
        }
        if covariance.len() != n || covariance.iter().any(|row| row.len() != n) {
            return Err(AllocationError::invalid(
                "Covariance matrix must be square and match number of assets",
            ));
        }

        Ok(Self {
            assets,
            mean_log_return,
            covariance,
            observations: 0,
        })
    }

    /// Compute log-return moments from a price table.
    pub fn from_prices(prices: &PriceTable) -> Result<Self> {
        let logs = log_returns(prices)?;
        let mut stats = Self::new(
            prices.assets().to_vec(),
            mean_log_return(&logs)?,
            covariance(&logs)?,
        )?;
        stats.observations = logs.len();
        Ok(stats)
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn num_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn mean_log_return(&self) -> &[f64] {
        &self.mean_log_return
    }

    pub fn covariance(&self) -> &[Vec<f64>] {
        &self.covariance
    }

    /// Number of return rows the moments were estimated from.
    pub fn observations(&self) -> usize {
        self.observations
    }

    /// Expected log return `Σ mean_i · w_i`.
    pub fn portfolio_return(&self, weights: &[f64]) -> f64 {
        weights
            .iter()
            .zip(self.mean_log_return.iter())
            .map(|(w, m)| w * m)
            .sum()
    }

    /// Volatility `sqrt(wᵀ Σ w)`; NaN when the quadratic form is negative
    /// beyond round-off.
    pub fn portfolio_volatility(&self, weights: &[f64]) -> f64 {
        let variance = quadratic_form(weights, &self.covariance);
        if variance < 0.0 {
            if variance > -1e-14 {
                return 0.0;
            }
            return f64::NAN;
        }
        variance.sqrt()
    }

    /// Sharpe ratio with a zero risk-free rate.
    pub fn sharpe_ratio(&self, weights: &[f64]) -> f64 {
        self.portfolio_return(weights) / self.portfolio_volatility(weights)
    }
}

//! Allocation strategies.
//!
//! Each allocator turns the shared market data of one run into a weight
//! vector aligned with the price table's asset ordering:
//!
//! - [`RiskParityAllocator`]: inverse volatility-contribution weighting
//! - [`BetaAllocator`]: beta-targeting weights against a benchmark
//! - [`MonteCarloSharpe`]: random search for the maximum Sharpe ratio
//! - [`MarkowitzOptimizer`]: constrained max-Sharpe program and efficient frontier
//! - [`FixedAllocation`]: caller-supplied weights (e.g. the user's portfolio)

mod beta;
mod markowitz;
mod risk_parity;
mod sharpe;

pub use beta::{calculate_betas, beta_weights, BetaAllocator, DEGENERATE_DENOMINATOR};
pub use markowitz::{
    project_to_simplex, FrontierPoint, MarkowitzOptimizer, OptimalWeights, SolveMethod,
    SolverSettings,
};
pub use risk_parity::{risk_parity_weights, RiskParityAllocator};
pub use sharpe::{MonteCarloSharpe, PortfolioSample, SharpeSearch};

use crate::error::Result;
use crate::returns::ReturnStats;
use crate::types::{PriceTable, ReturnSeries, Weights};

/// Market data shared by every allocator within one run.
#[derive(Debug, Clone, Copy)]
pub struct AllocationContext<'a> {
    /// Aligned adjusted closing prices.
    pub prices: &'a PriceTable,
    /// Simple daily returns of `prices`.
    pub daily_returns: &'a ReturnSeries,
    /// Log-return moments of `prices`.
    pub stats: &'a ReturnStats,
    /// Benchmark daily returns, when the benchmark could be fetched.
    pub benchmark: Option<&'a ReturnSeries>,
}

impl<'a> AllocationContext<'a> {
    pub fn new(
        prices: &'a PriceTable,
        daily_returns: &'a ReturnSeries,
        stats: &'a ReturnStats,
    ) -> Self {
        Self {
            prices,
            daily_returns,
            stats,
            benchmark: None,
        }
    }

    pub fn with_benchmark(mut self, benchmark: &'a ReturnSeries) -> Self {
        self.benchmark = Some(benchmark);
        self
    }

    pub fn num_assets(&self) -> usize {
        self.prices.num_assets()
    }
}

/// Trait implemented by every allocation strategy.
pub trait Allocator: Send {
    /// Strategy name, used as the comparator key.
    fn name(&self) -> &str;

    /// Compute weights for the assets in `ctx`.
    fn allocate(&mut self, ctx: &AllocationContext) -> Result<Weights>;
}

/// Weights supplied by the caller rather than computed.
#[derive(Debug, Clone)]
pub struct FixedAllocation {
    name: String,
    weights: Weights,
}

impl FixedAllocation {
    pub fn new(name: impl Into<String>, weights: Weights) -> Self {
        Self {
            name: name.into(),
            weights,
        }
    }
}

impl Allocator for FixedAllocation {
    fn name(&self) -> &str {
        &self.name
    }

    fn allocate(&mut self, ctx: &AllocationContext) -> Result<Weights> {
        if self.weights.len() != ctx.num_assets() {
            return Err(crate::error::AllocationError::InvalidInput(format!(
                "{} has {} weights for {} assets",
                self.name,
                self.weights.len(),
                ctx.num_assets()
            )));
        }
        Ok(self.weights.clone())
    }
}

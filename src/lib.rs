//! RoboPort - portfolio allocation strategies compared by backtest.
//!
//! # Overview
//!
//! Given a set of tickers and the weights a user currently holds, RoboPort
//! computes candidate allocations with several strategies, backtests each
//! one over a historical window and recommends the strategy with the highest
//! realized return:
//!
//! - **Risk parity**: every asset contributes the same share of volatility
//! - **Beta targeting**: weights driven by each asset's beta to a benchmark
//! - **Monte-Carlo Sharpe**: best Sharpe ratio among random portfolios
//! - **Markowitz**: constrained max-Sharpe program plus the efficient frontier
//! - **Comparison**: total return of each candidate over the evolution horizon
//!
//! # Quick Start
//!
//! ```no_run
//! use roboport::{
//!     data::{DataConfig, InMemoryPriceSource},
//!     pipeline::{AnalysisConfig, PortfolioAnalyzer},
//!     types::Holding,
//! };
//!
//! let source = InMemoryPriceSource::from_csv("data/prices.csv", &DataConfig::default()).unwrap();
//! let analyzer = PortfolioAnalyzer::new(source, AnalysisConfig::default());
//!
//! let holdings = vec![Holding::new("AAPL", 0.6), Holding::new("MSFT", 0.4)];
//! let report = analyzer.run(&holdings).unwrap();
//!
//! if let Some(best) = &report.comparison.best {
//!     println!("{}: {:.2}%", best.name, best.total_return * 100.0);
//! }
//! ```
//!
//! # Custom allocators
//!
//! Implement the [`Allocator`] trait to add another weighting strategy; the
//! weights it returns can then be scored with
//! [`StrategyComparator::evaluate`]:
//!
//! ```
//! use roboport::allocation::{AllocationContext, Allocator};
//! use roboport::error::Result;
//! use roboport::types::Weights;
//!
//! struct EqualWeight;
//!
//! impl Allocator for EqualWeight {
//!     fn name(&self) -> &str {
//!         "Equal Weight"
//!     }
//!
//!     fn allocate(&mut self, ctx: &AllocationContext) -> Result<Weights> {
//!         Ok(Weights::uniform(ctx.num_assets()))
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Price tables, return series, weights, holdings
//! - [`returns`]: Period/log/daily returns, covariance, portfolio statistics
//! - [`allocation`]: The allocators and the mean-variance optimizer
//! - [`valuation`]: Portfolio value evolution over historical prices
//! - [`comparator`]: Backtest and rank candidate allocations
//! - [`data`]: Price sources and CSV loading
//! - [`pipeline`]: End-to-end analysis of a user portfolio
//! - [`report`]: Terminal tables and JSON export
//! - [`config`]: TOML configuration file support

pub mod allocation;
pub mod comparator;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod returns;
pub mod types;
pub mod valuation;

// Re-exports for convenience
pub use allocation::{
    AllocationContext, Allocator, BetaAllocator, FixedAllocation, FrontierPoint,
    MarkowitzOptimizer, MonteCarloSharpe, OptimalWeights, RiskParityAllocator, SharpeSearch,
    SolverSettings,
};
pub use comparator::{ComparisonReport, Evaluation, StrategyComparator, StrategyResult};
pub use config::RoboPortConfig;
pub use data::{InMemoryPriceSource, PriceSource};
pub use error::{AllocationError, ErrorCategory, Result};
pub use pipeline::{AnalysisConfig, AnalysisReport, PortfolioAnalyzer};
pub use report::ReportFormatter;
pub use returns::ReturnStats;
pub use types::{Holding, PriceTable, ReturnSeries, ValuePoint, Weights};
pub use valuation::{value_evolution, HistoricalValuation, ValuationSource};

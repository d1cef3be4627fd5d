//! End-to-end analysis of a user portfolio.
//!
//! [`PortfolioAnalyzer::run`] fetches a year of history for the user's
//! tickers and the benchmark, runs every allocator on it, backtests each
//! candidate (and the user's own weights) over the evolution horizon and
//! returns everything in one [`AnalysisReport`].
//!
//! A failing strategy never aborts the run: it is recorded in the comparator
//! with a zero return and its error is kept in the report.

use crate::allocation::{
    AllocationContext, Allocator, BetaAllocator, FrontierPoint, MarkowitzOptimizer,
    MonteCarloSharpe, OptimalWeights, RiskParityAllocator, SharpeSearch, SolverSettings,
};
use crate::comparator::{ComparisonReport, StrategyComparator};
use crate::data::PriceSource;
use crate::error::{AllocationError, ErrorCategory, Result};
use crate::returns::{daily_returns, ReturnStats};
use crate::types::{Holding, PriceTable, ReturnSeries, Weights};
use crate::valuation::HistoricalValuation;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// Name under which the user's own weights are compared.
pub const USER_STRATEGY: &str = "User";

/// Settings of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub historical_period_days: u32,
    pub evolution_years: u32,
    pub benchmark: String,
    /// Analysis date; today when unset.
    pub as_of: Option<NaiveDate>,
    pub num_portfolios: usize,
    pub target_market_beta: f64,
    pub seed: Option<u64>,
    pub solver: SolverSettings,
    pub min_tickers: usize,
    pub max_tickers: usize,
    /// Allowed distance of the user's weight sum from one.
    pub weight_sum_tolerance: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            historical_period_days: 365,
            evolution_years: 3,
            benchmark: "^GSPC".to_string(),
            as_of: None,
            num_portfolios: 10_000,
            target_market_beta: 1.0,
            seed: None,
            solver: SolverSettings::default(),
            min_tickers: 1,
            max_tickers: 10,
            weight_sum_tolerance: 0.01,
        }
    }
}

/// Weights produced by one allocator, or why it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub name: String,
    pub weights: Option<Weights>,
    pub error: Option<String>,
    pub category: Option<ErrorCategory>,
}

impl StrategyOutcome {
    fn from_result(name: &str, result: &Result<Weights>) -> Self {
        match result {
            Ok(w) => Self {
                name: name.to_string(),
                weights: Some(w.clone()),
                error: None,
                category: None,
            },
            Err(e) => Self {
                name: name.to_string(),
                weights: None,
                error: Some(e.to_string()),
                category: Some(e.category()),
            },
        }
    }
}

/// The Monte-Carlo cloud without per-draw weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloCloud {
    pub returns: Vec<f64>,
    pub volatilities: Vec<f64>,
    pub sharpes: Vec<f64>,
    pub best_index: usize,
    pub degenerate_draws: usize,
}

impl From<&SharpeSearch> for MonteCarloCloud {
    fn from(search: &SharpeSearch) -> Self {
        Self {
            returns: search.returns(),
            volatilities: search.volatilities(),
            sharpes: search.sharpes(),
            best_index: search.best_index,
            degenerate_draws: search.degenerate_draws,
        }
    }
}

/// Everything produced by one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub as_of: NaiveDate,
    pub assets: Vec<String>,
    /// Weights as entered; valuation rejects them unless they sum to one.
    pub user_weights: Weights,
    /// Return rows the statistics were estimated from.
    pub observations: usize,
    pub betas: Option<Vec<f64>>,
    pub allocations: Vec<StrategyOutcome>,
    pub monte_carlo: Option<MonteCarloCloud>,
    pub max_sharpe: Option<OptimalWeights>,
    pub frontier: Vec<FrontierPoint>,
    pub comparison: ComparisonReport,
}

impl AnalysisReport {
    pub fn allocation(&self, name: &str) -> Option<&StrategyOutcome> {
        self.allocations.iter().find(|o| o.name == name)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Check ticker count, duplicates and the weight sum.
pub fn validate_holdings(holdings: &[Holding], config: &AnalysisConfig) -> Result<()> {
    if holdings.len() < config.min_tickers || holdings.len() > config.max_tickers {
        return Err(AllocationError::InvalidInput(format!(
            "Portfolio must hold between {} and {} tickers, got {}",
            config.min_tickers,
            config.max_tickers,
            holdings.len()
        )));
    }

    let mut seen = HashSet::new();
    for h in holdings {
        if h.ticker.trim().is_empty() {
            return Err(AllocationError::invalid("Empty ticker in portfolio"));
        }
        if !seen.insert(h.ticker.as_str()) {
            return Err(AllocationError::InvalidInput(format!(
                "Ticker {} appears more than once",
                h.ticker
            )));
        }
        if !h.weight.is_finite() {
            return Err(AllocationError::InvalidInput(format!(
                "Weight of {} is not a number",
                h.ticker
            )));
        }
    }

    let sum: f64 = holdings.iter().map(|h| h.weight).sum();
    if (sum - 1.0).abs() > config.weight_sum_tolerance {
        return Err(AllocationError::InvalidWeights { sum });
    }
    Ok(())
}

/// Market data derived from one history window.
struct History {
    prices: PriceTable,
    daily: ReturnSeries,
    stats: ReturnStats,
}

impl History {
    fn build(prices: PriceTable) -> Result<Self> {
        let daily = daily_returns(&prices)?;
        let stats = ReturnStats::from_prices(&prices)?;
        Ok(Self {
            prices,
            daily,
            stats,
        })
    }
}

/// Runs the full comparison for a portfolio against one price source.
pub struct PortfolioAnalyzer<S> {
    source: S,
    config: AnalysisConfig,
}

impl<S: PriceSource> PortfolioAnalyzer<S> {
    pub fn new(source: S, config: AnalysisConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn monte_carlo(&self) -> MonteCarloSharpe {
        match self.config.seed {
            Some(seed) => MonteCarloSharpe::seeded(self.config.num_portfolios, seed),
            None => MonteCarloSharpe::new(self.config.num_portfolios),
        }
    }

    /// Analyze `holdings` and compare every strategy.
    pub fn run(&self, holdings: &[Holding]) -> Result<AnalysisReport> {
        validate_holdings(holdings, &self.config)?;

        let assets: Vec<String> = holdings.iter().map(|h| h.ticker.clone()).collect();
        let user_weights = Weights::new(holdings.iter().map(|h| h.weight).collect());
        let as_of = self.config.as_of.unwrap_or_else(|| Utc::now().date_naive());
        let start = as_of - Duration::days(i64::from(self.config.historical_period_days));

        info!(
            "Analyzing {} tickers from {} to {}",
            assets.len(),
            start,
            as_of
        );

        let history = self
            .source
            .fetch_prices(&assets, start, as_of)
            .and_then(History::build);
        if let Err(e) = &history {
            warn!("No usable price history: {}", e);
        }

        let benchmark = self
            .source
            .fetch_prices(&[self.config.benchmark.clone()], start, as_of)
            .and_then(|p| daily_returns(&p));
        let benchmark = match benchmark {
            Ok(b) => Some(b),
            Err(e) => {
                warn!("Benchmark {} unavailable: {}", self.config.benchmark, e);
                None
            }
        };

        let mut risk_parity = RiskParityAllocator::new();
        let mut beta = BetaAllocator::new(self.config.target_market_beta);
        let mut sharpe = self.monte_carlo();
        let mut markowitz = MarkowitzOptimizer::new(self.config.solver);

        let mut outcomes: Vec<(String, Result<Weights>)> = Vec::new();
        {
            let allocators: [&mut dyn Allocator; 4] =
                [&mut risk_parity, &mut beta, &mut sharpe, &mut markowitz];
            for allocator in allocators {
                let name = allocator.name().to_string();
                let result = match &history {
                    Ok(h) => {
                        let mut ctx = AllocationContext::new(&h.prices, &h.daily, &h.stats);
                        if let Some(b) = &benchmark {
                            ctx = ctx.with_benchmark(b);
                        }
                        allocator.allocate(&ctx)
                    }
                    Err(e) => Err(AllocationError::Unavailable(format!(
                        "price history unavailable: {}",
                        e
                    ))),
                };
                if let Err(e) = &result {
                    warn!("{} allocation failed: {}", name, e);
                }
                outcomes.push((name, result));
            }
        }

        let monte_carlo = sharpe.last_search();
        let frontier = match (&history, monte_carlo) {
            (Ok(h), Some(search)) => markowitz
                .efficient_frontier(&h.stats, &search.returns())
                .unwrap_or_else(|e| {
                    warn!("Efficient frontier skipped: {}", e);
                    Vec::new()
                }),
            _ => Vec::new(),
        };

        let valuation = HistoricalValuation::new(&self.source, as_of);
        let mut comparator =
            StrategyComparator::new(valuation, assets.clone(), self.config.evolution_years);
        comparator.evaluate(USER_STRATEGY, &user_weights);
        for (name, result) in &outcomes {
            match result {
                Ok(w) => comparator.evaluate(name, w),
                Err(e) => comparator.record_failure(name, e),
            };
        }
        let comparison = comparator.finalize();

        let betas = Some(beta.last_betas().to_vec()).filter(|b| !b.is_empty());

        Ok(AnalysisReport {
            as_of,
            assets,
            user_weights,
            observations: history.as_ref().map(|h| h.stats.observations()).unwrap_or(0),
            betas,
            allocations: outcomes
                .iter()
                .map(|(name, result)| StrategyOutcome::from_result(name, result))
                .collect(),
            monte_carlo: monte_carlo.map(MonteCarloCloud::from),
            max_sharpe: markowitz.last_solution().cloned(),
            frontier,
            comparison,
        })
    }
}

//! Configuration file support for analysis runs.
//!
//! Allows loading analysis settings and a portfolio from TOML files for
//! reproducibility.

use crate::allocation::SolverSettings;
use crate::error::{AllocationError, Result};
use crate::pipeline::AnalysisConfig;
use crate::types::Holding;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Complete analysis configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoboPortConfig {
    /// Historical window and benchmark.
    #[serde(default)]
    pub analysis: AnalysisSettings,
    /// Optimizer settings.
    #[serde(default)]
    pub optimization: OptimizationSettings,
    /// The portfolio to analyze.
    #[serde(default)]
    pub portfolio: PortfolioSettings,
    /// Price files.
    #[serde(default)]
    pub data: DataSettings,
}

/// Historical window and benchmark settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Days of history used to estimate returns and betas.
    #[serde(default = "default_historical_period_days")]
    pub historical_period_days: u32,
    /// Years over which each strategy is backtested.
    #[serde(default = "default_evolution_years")]
    pub evolution_years: u32,
    /// Benchmark ticker for beta estimation.
    #[serde(default = "default_benchmark")]
    pub benchmark: String,
    /// Analysis date (YYYY-MM-DD); defaults to the last date with prices.
    #[serde(default)]
    pub as_of: Option<String>,
}

fn default_historical_period_days() -> u32 { 365 }
fn default_evolution_years() -> u32 { 3 }
fn default_benchmark() -> String { "^GSPC".to_string() }

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            historical_period_days: 365,
            evolution_years: 3,
            benchmark: "^GSPC".to_string(),
            as_of: None,
        }
    }
}

/// Optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationSettings {
    /// Random portfolios drawn by the Monte-Carlo search.
    #[serde(default = "default_num_portfolios")]
    pub num_portfolios: usize,
    /// Target portfolio beta for the beta allocator.
    #[serde(default = "default_target_beta")]
    pub target_market_beta: f64,
    /// Target returns on the efficient frontier grid.
    #[serde(default = "default_frontier_points")]
    pub frontier_points: usize,
    /// Iteration cap per solver call.
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,
    /// Time limit per solver call, in seconds.
    #[serde(default = "default_time_limit")]
    pub time_limit_secs: f64,
    /// Seed for the Monte-Carlo search; random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_num_portfolios() -> usize { 10_000 }
fn default_target_beta() -> f64 { 1.0 }
fn default_frontier_points() -> usize { 50 }
fn default_max_iter() -> u32 { 200 }
fn default_time_limit() -> f64 { 5.0 }

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            num_portfolios: 10_000,
            target_market_beta: 1.0,
            frontier_points: 50,
            max_iter: 200,
            time_limit_secs: 5.0,
            seed: None,
        }
    }
}

/// Portfolio settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSettings {
    /// Total dollar amount of the portfolio.
    #[serde(default)]
    pub amount: f64,
    /// Current holdings.
    #[serde(default)]
    pub holdings: Vec<Holding>,
    #[serde(default = "default_min_tickers")]
    pub min_tickers: usize,
    #[serde(default = "default_max_tickers")]
    pub max_tickers: usize,
}

fn default_min_tickers() -> usize { 1 }
fn default_max_tickers() -> usize { 10 }

impl Default for PortfolioSettings {
    fn default() -> Self {
        Self {
            amount: 0.0,
            holdings: Vec::new(),
            min_tickers: 1,
            max_tickers: 10,
        }
    }
}

/// Price file settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSettings {
    /// Wide price file (`Date,TICKER1,TICKER2,...`).
    pub prices: Option<String>,
    /// Benchmark price file (`Date,Close`).
    pub benchmark: Option<String>,
    /// Date format in CSV.
    pub date_format: Option<String>,
    /// CSV delimiter; auto-detected when unset.
    pub delimiter: Option<char>,
}

impl RoboPortConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: RoboPortConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AllocationError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(AllocationError::ConfigError(msg.to_string()));

        if self.analysis.historical_period_days < 2 {
            return fail("historical_period_days must be at least 2");
        }
        if self.analysis.evolution_years == 0 {
            return fail("evolution_years must be at least 1");
        }
        if self.analysis.benchmark.trim().is_empty() {
            return fail("benchmark must not be empty");
        }
        if self.optimization.num_portfolios == 0 {
            return fail("num_portfolios must be at least 1");
        }
        if !self.optimization.target_market_beta.is_finite() {
            return fail("target_market_beta must be finite");
        }
        if self.optimization.frontier_points == 0 {
            return fail("frontier_points must be at least 1");
        }
        if self.optimization.max_iter == 0 {
            return fail("max_iter must be at least 1");
        }
        let limit = self.optimization.time_limit_secs;
        if !limit.is_finite() || limit <= 0.0 {
            return fail("time_limit_secs must be positive");
        }
        if self.portfolio.min_tickers == 0 || self.portfolio.min_tickers > self.portfolio.max_tickers {
            return fail("min_tickers must be between 1 and max_tickers");
        }
        if self.portfolio.amount < 0.0 {
            return fail("amount must not be negative");
        }
        Ok(())
    }

    /// Parsed analysis date, if configured.
    pub fn as_of(&self) -> Result<Option<NaiveDate>> {
        self.analysis
            .as_of
            .as_deref()
            .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
            .transpose()
            .map_err(AllocationError::from)
    }

    /// Convert to the pipeline's run settings.
    pub fn to_analysis_config(&self) -> Result<AnalysisConfig> {
        self.validate()?;
        Ok(AnalysisConfig {
            historical_period_days: self.analysis.historical_period_days,
            evolution_years: self.analysis.evolution_years,
            benchmark: self.analysis.benchmark.clone(),
            as_of: self.as_of()?,
            num_portfolios: self.optimization.num_portfolios,
            target_market_beta: self.optimization.target_market_beta,
            seed: self.optimization.seed,
            solver: SolverSettings {
                max_iter: self.optimization.max_iter,
                time_limit_secs: self.optimization.time_limit_secs,
                frontier_points: self.optimization.frontier_points,
            },
            min_tickers: self.portfolio.min_tickers,
            max_tickers: self.portfolio.max_tickers,
            ..AnalysisConfig::default()
        })
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# RoboPort Configuration File
# This file configures a portfolio analysis run

[analysis]
historical_period_days = 365
evolution_years = 3
benchmark = "^GSPC"
# as_of = "2024-06-28"

[optimization]
num_portfolios = 10000
target_market_beta = 1.0
frontier_points = 50
max_iter = 200
time_limit_secs = 5.0
# seed = 42

[portfolio]
amount = 10000.0
min_tickers = 1
max_tickers = 10

[[portfolio.holdings]]
ticker = "AAPL"
weight = 0.4

[[portfolio.holdings]]
ticker = "MSFT"
weight = 0.35

[[portfolio.holdings]]
ticker = "JNJ"
weight = 0.25

[data]
prices = "data/prices.csv"
benchmark = "data/gspc.csv"
# date_format = "%Y-%m-%d"
"#
        .to_string()
    }
}

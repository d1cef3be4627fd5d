//! Backtest and rank candidate allocations.
//!
//! The comparator is an owned state object created per run. While
//! accumulating, each [`StrategyComparator::evaluate`] call values one weight
//! vector through a [`ValuationSource`] and stores its total return under the
//! strategy name. [`StrategyComparator::finalize`] freezes the results into a
//! [`ComparisonReport`].
//!
//! Invalid weights, upstream failures and empty value series never raise:
//! they record a zero return and come back as [`Evaluation::Rejected`].

use crate::error::{AllocationError, ErrorCategory};
use crate::types::{ValuePoint, Weights, WEIGHT_TOLERANCE};
use crate::valuation::{total_return, ValuationSource};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Lifecycle of a comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparatorState {
    Accumulating,
    Finalized,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Scored { total_return: f64 },
    Rejected { reason: String, category: ErrorCategory },
}

impl Evaluation {
    pub fn is_scored(&self) -> bool {
        matches!(self, Evaluation::Scored { .. })
    }
}

/// Stored result of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    pub name: String,
    pub weights: Weights,
    pub total_return: f64,
    pub value_series: Option<Vec<ValuePoint>>,
    /// Why the strategy was not scored; `None` when it was.
    pub rejection: Option<String>,
}

impl StrategyResult {
    pub fn is_scored(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Best strategy by total return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestStrategy {
    pub name: String,
    pub total_return: f64,
}

/// Frozen results of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub assets: Vec<String>,
    pub horizon_years: u32,
    pub results: Vec<StrategyResult>,
    pub best: Option<BestStrategy>,
    /// (asset, weight) pairs of the best strategy.
    pub recommendation: Vec<(String, f64)>,
}

/// Strategy comparator over a fixed asset list.
pub struct StrategyComparator<V> {
    valuation: V,
    assets: Vec<String>,
    horizon_years: u32,
    results: IndexMap<String, StrategyResult>,
    state: ComparatorState,
}

impl<V: ValuationSource> StrategyComparator<V> {
    pub fn new(valuation: V, assets: Vec<String>, horizon_years: u32) -> Self {
        Self {
            valuation,
            assets,
            horizon_years,
            results: IndexMap::new(),
            state: ComparatorState::Accumulating,
        }
    }

    pub fn state(&self) -> ComparatorState {
        self.state
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    fn reject(&mut self, name: &str, weights: Weights, error: &AllocationError) -> Evaluation {
        warn!("Strategy {} not scored: {}", name, error);
        self.results.insert(
            name.to_string(),
            StrategyResult {
                name: name.to_string(),
                weights,
                total_return: 0.0,
                value_series: None,
                rejection: Some(error.to_string()),
            },
        );
        Evaluation::Rejected {
            reason: error.to_string(),
            category: error.category(),
        }
    }

    /// Backtest `weights` over the comparator's horizon and store the result.
    pub fn evaluate(&mut self, name: &str, weights: &Weights) -> Evaluation {
        if self.state == ComparatorState::Finalized {
            let error = AllocationError::InvalidState(format!(
                "comparator is finalized; {} not evaluated",
                name
            ));
            warn!("{}", error);
            return Evaluation::Rejected {
                reason: error.to_string(),
                category: error.category(),
            };
        }

        if !weights.is_normalized(WEIGHT_TOLERANCE) {
            let error = AllocationError::InvalidWeights { sum: weights.sum() };
            return self.reject(name, weights.clone(), &error);
        }

        let series = match self
            .valuation
            .value_series(&self.assets, weights, self.horizon_years)
        {
            Ok(series) => series,
            Err(e) => return self.reject(name, weights.clone(), &e),
        };

        let ret = match total_return(&series) {
            Ok(ret) => ret,
            Err(e) => return self.reject(name, weights.clone(), &e),
        };

        info!("Strategy {} total return {:.4}", name, ret);
        self.results.insert(
            name.to_string(),
            StrategyResult {
                name: name.to_string(),
                weights: weights.clone(),
                total_return: ret,
                value_series: Some(series),
                rejection: None,
            },
        );
        Evaluation::Scored { total_return: ret }
    }

    /// Record a zero return for a strategy whose allocator failed.
    pub fn record_failure(&mut self, name: &str, error: &AllocationError) -> Evaluation {
        if self.state == ComparatorState::Finalized {
            return Evaluation::Rejected {
                reason: "comparator is finalized".to_string(),
                category: ErrorCategory::Internal,
            };
        }
        self.reject(name, Weights::default(), error)
    }

    /// Strategy with the highest total return; ties keep the first inserted.
    pub fn best(&self) -> Option<(&str, f64)> {
        best_of(self.results.values())
    }

    /// Snapshot of every stored result in insertion order.
    pub fn all_results(&self) -> IndexMap<String, f64> {
        self.results
            .iter()
            .map(|(name, r)| (name.clone(), r.total_return))
            .collect()
    }

    pub fn result(&self, name: &str) -> Option<&StrategyResult> {
        self.results.get(name)
    }

    /// (asset, weight) pairs of the best strategy.
    pub fn recommendation(&self) -> Vec<(String, f64)> {
        self.best()
            .and_then(|(name, _)| self.results.get(name))
            .map(|r| {
                self.assets
                    .iter()
                    .cloned()
                    .zip(r.weights.iter().copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stop accumulating and return the frozen results.
    pub fn finalize(&mut self) -> ComparisonReport {
        self.state = ComparatorState::Finalized;
        let best = self.best().map(|(name, total_return)| BestStrategy {
            name: name.to_string(),
            total_return,
        });
        if let Some(b) = &best {
            info!("Best strategy: {} ({:.2}%)", b.name, b.total_return * 100.0);
        }
        ComparisonReport {
            assets: self.assets.clone(),
            horizon_years: self.horizon_years,
            recommendation: self.recommendation(),
            results: self.results.values().cloned().collect(),
            best,
        }
    }
}

fn best_of<'a>(results: impl Iterator<Item = &'a StrategyResult>) -> Option<(&'a str, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for r in results {
        match best {
            Some((_, b)) if r.total_return <= b => {}
            _ => best = Some((r.name.as_str(), r.total_return)),
        }
    }
    best
}

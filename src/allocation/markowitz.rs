//! Mean-variance (Markowitz) optimization.
//!
//! Two problems share the long-only simplex `Σw = 1, 0 ≤ w ≤ 1`:
//!
//! - maximum Sharpe ratio `R(w) / V(w)` with `R(w) = Σ mean_i · w_i` and
//!   `V(w) = sqrt(wᵀ Σ w)`;
//! - the efficient frontier: minimum `V(w)` subject to `R(w) = r` for an
//!   evenly spaced grid of targets `r`.
//!
//! Both are solved as quadratic programs with clarabel. The Sharpe problem
//! uses the usual homogenization (minimize `yᵀ Σ y` with `meanᵀ y = 1`,
//! `y ≥ 0`, then `w = y / Σy`), which needs at least one positive mean
//! return. When it does not apply or does not converge, a projected
//! gradient ascent on the Sharpe ratio from the uniform portfolio is used.
//!
//! Every solve is capped by [`SolverSettings::max_iter`] and
//! [`SolverSettings::time_limit_secs`]. A solve that does not reach an
//! optimal status is returned flagged (`converged = false`) rather than as an
//! error; frontier points record NaN volatility so callers can plot gaps.

use super::{AllocationContext, Allocator};
use crate::error::{AllocationError, Result};
use crate::returns::ReturnStats;
use crate::types::Weights;
use clarabel::algebra::*;
use clarabel::solver::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Iteration and time budget for each solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Iteration cap per solve.
    pub max_iter: u32,
    /// Wall-clock limit per solve, in seconds.
    pub time_limit_secs: f64,
    /// Number of target returns on the frontier grid.
    pub frontier_points: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iter: 200,
            time_limit_secs: 5.0,
            frontier_points: 50,
        }
    }
}

/// How a solution was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveMethod {
    /// Interior-point QP (clarabel).
    Conic,
    /// Projected gradient ascent on the simplex.
    ProjectedGradient,
}

/// Optimizer output with solver metadata.
///
/// A non-converged result is still returned; treat it as unreliable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalWeights {
    pub weights: Weights,
    pub converged: bool,
    /// Objective value: the negative Sharpe ratio of `weights`.
    pub objective: f64,
    pub status: String,
    pub iterations: u32,
    pub method: SolveMethod,
}

impl OptimalWeights {
    /// Sharpe ratio of the solution.
    pub fn sharpe(&self) -> f64 {
        -self.objective
    }
}

/// One point of the efficient frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub target_return: f64,
    /// Minimal volatility at `target_return`; NaN if the solve failed.
    pub volatility: f64,
    pub converged: bool,
    pub status: String,
    /// Minimizing weights when the solve converged.
    pub weights: Option<Vec<f64>>,
}

/// Euclidean projection onto the probability simplex `{w ≥ 0, Σw = 1}`.
pub fn project_to_simplex(v: &[f64]) -> Vec<f64> {
    if v.is_empty() {
        return Vec::new();
    }

    let mut sorted = v.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (j, u) in sorted.iter().enumerate() {
        cumulative += u;
        let candidate = (cumulative - 1.0) / (j + 1) as f64;
        if u - candidate > 0.0 {
            theta = candidate;
        }
    }

    v.iter().map(|x| (x - theta).max(0.0)).collect()
}

/// Evenly spaced values from `start` to `end` inclusive.
fn linspace(start: f64, end: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (points - 1) as f64;
            (0..points).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Upper triangle of a scaled covariance matrix in CSC form.
fn covariance_csc(covariance: &[Vec<f64>], scale: f64) -> CscMatrix<f64> {
    let n = covariance.len();
    let mut data = Vec::new();
    let mut indices = Vec::new();
    let mut indptr = vec![0];

    for j in 0..n {
        for (i, row) in covariance.iter().enumerate().take(j + 1) {
            let val = row[j] * scale;
            if val != 0.0 {
                data.push(val);
                indices.push(i);
            }
        }
        indptr.push(data.len());
    }

    CscMatrix::new(n, n, indptr, indices, data)
}

/// Scale that brings the covariance diagonal to unit average.
fn covariance_scale(covariance: &[Vec<f64>]) -> f64 {
    let n = covariance.len();
    let trace: f64 = (0..n).map(|i| covariance[i][i]).sum();
    if trace.is_finite() && trace > 0.0 {
        n as f64 / trace
    } else {
        1.0
    }
}

/// Largest absolute mean return, used to scale return constraints.
fn return_scale(means: &[f64]) -> f64 {
    let max_abs = means.iter().fold(0.0f64, |m, r| m.max(r.abs()));
    if max_abs.is_finite() && max_abs > 0.0 {
        1.0 / max_abs
    } else {
        1.0
    }
}

struct QpSolution {
    x: Vec<f64>,
    solved: bool,
    status: String,
    iterations: u32,
}

/// Minimize `½ xᵀ P x` subject to equality rows `A_eq x = b_eq` and `x ≥ 0`.
fn solve_qp(
    covariance: &[Vec<f64>],
    equalities: &[(Vec<f64>, f64)],
    settings: &SolverSettings,
) -> Result<QpSolution> {
    let n = covariance.len();
    let m_eq = equalities.len();
    let p = covariance_csc(covariance, covariance_scale(covariance));
    let q = vec![0.0; n];

    // Column by column (CSC): equality rows first, then -x_j <= 0.
    let mut a_data = Vec::new();
    let mut a_indices = Vec::new();
    let mut a_indptr = vec![0];
    for j in 0..n {
        for (row, (coeffs, _)) in equalities.iter().enumerate() {
            if coeffs[j] != 0.0 {
                a_data.push(coeffs[j]);
                a_indices.push(row);
            }
        }
        a_data.push(-1.0);
        a_indices.push(m_eq + j);
        a_indptr.push(a_data.len());
    }
    let a = CscMatrix::new(m_eq + n, n, a_indptr, a_indices, a_data);

    let mut b: Vec<f64> = equalities.iter().map(|(_, rhs)| *rhs).collect();
    b.extend(vec![0.0; n]);

    let cones = [ZeroConeT(m_eq), NonnegativeConeT(n)];

    let solver_settings = DefaultSettingsBuilder::default()
        .max_iter(settings.max_iter)
        .time_limit(settings.time_limit_secs)
        .verbose(false)
        .build()
        .map_err(|e| {
            AllocationError::NumericNonConvergence(format!("Failed to build solver settings: {}", e))
        })?;

    let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, solver_settings).map_err(|e| {
        AllocationError::NumericNonConvergence(format!("Failed to create solver: {:?}", e))
    })?;

    solver.solve();

    Ok(QpSolution {
        x: solver.solution.x.clone(),
        solved: matches!(solver.solution.status, SolverStatus::Solved),
        status: format!("{:?}", solver.solution.status),
        iterations: solver.solution.iterations,
    })
}

/// Gradient of `R(w) / V(w)`.
fn sharpe_gradient(stats: &ReturnStats, w: &[f64]) -> Option<Vec<f64>> {
    let ret = stats.portfolio_return(w);
    let vol = stats.portfolio_volatility(w);
    if !vol.is_finite() || vol <= 0.0 {
        return None;
    }
    let vol_cubed = vol * vol * vol;
    let grad = stats
        .covariance()
        .iter()
        .zip(stats.mean_log_return().iter())
        .map(|(row, mean)| {
            let sigma_w: f64 = row.iter().zip(w.iter()).map(|(c, wj)| c * wj).sum();
            mean / vol - ret * sigma_w / vol_cubed
        })
        .collect();
    Some(grad)
}

/// Constrained mean-variance optimizer.
#[derive(Debug, Clone, Default)]
pub struct MarkowitzOptimizer {
    settings: SolverSettings,
    last: Option<OptimalWeights>,
}

impl MarkowitzOptimizer {
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            last: None,
        }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Result of the most recent [`Allocator::allocate`] call.
    pub fn last_solution(&self) -> Option<&OptimalWeights> {
        self.last.as_ref()
    }

    /// Maximum Sharpe ratio weights.
    pub fn max_sharpe(&self, stats: &ReturnStats) -> Result<OptimalWeights> {
        let n = stats.num_assets();
        if n == 0 {
            return Err(AllocationError::invalid("Optimizer needs at least one asset"));
        }

        if stats.mean_log_return().iter().any(|m| *m > 0.0) {
            match self.max_sharpe_conic(stats) {
                Ok(solution) if solution.converged => return Ok(solution),
                Ok(solution) => warn!(
                    "Max-Sharpe QP ended with {}; falling back to projected gradient",
                    solution.status
                ),
                Err(e) => warn!("Max-Sharpe QP failed: {}; falling back to projected gradient", e),
            }
        } else {
            debug!("No positive mean return; using projected gradient for max Sharpe");
        }

        Ok(self.max_sharpe_gradient(stats))
    }

    fn max_sharpe_conic(&self, stats: &ReturnStats) -> Result<OptimalWeights> {
        let scale = return_scale(stats.mean_log_return());
        let scaled_means: Vec<f64> = stats.mean_log_return().iter().map(|m| m * scale).collect();

        let solution = solve_qp(stats.covariance(), &[(scaled_means, 1.0)], &self.settings)?;

        let y: Vec<f64> = solution.x.iter().map(|v| v.max(0.0)).collect();
        let total: f64 = y.iter().sum();
        if !solution.solved || !total.is_finite() || total <= 0.0 {
            return Ok(OptimalWeights {
                weights: Weights::uniform(stats.num_assets()),
                converged: false,
                objective: f64::NAN,
                status: solution.status,
                iterations: solution.iterations,
                method: SolveMethod::Conic,
            });
        }

        let weights: Vec<f64> = y.iter().map(|v| v / total).collect();
        let objective = -stats.sharpe_ratio(&weights);
        debug!(
            "Max-Sharpe QP solved in {} iterations, Sharpe {:.4}",
            solution.iterations, -objective
        );

        Ok(OptimalWeights {
            weights: Weights::new(weights),
            converged: objective.is_finite(),
            objective,
            status: solution.status,
            iterations: solution.iterations,
            method: SolveMethod::Conic,
        })
    }

    fn max_sharpe_gradient(&self, stats: &ReturnStats) -> OptimalWeights {
        let started = Instant::now();
        let n = stats.num_assets();
        let mut w = vec![1.0 / n as f64; n];
        let mut sharpe = stats.sharpe_ratio(&w);
        let mut step = 1.0;
        let mut converged = false;
        let mut status = "MaxIterations".to_string();
        let mut iterations = 0;

        if !sharpe.is_finite() {
            return OptimalWeights {
                weights: Weights::new(w),
                converged: false,
                objective: f64::NAN,
                status: "UndefinedObjective".to_string(),
                iterations: 0,
                method: SolveMethod::ProjectedGradient,
            };
        }

        while iterations < self.settings.max_iter {
            if started.elapsed().as_secs_f64() > self.settings.time_limit_secs {
                status = "MaxTime".to_string();
                break;
            }
            iterations += 1;

            let Some(grad) = sharpe_gradient(stats, &w) else {
                status = "UndefinedGradient".to_string();
                break;
            };

            let mut moved = None;
            while step > 1e-14 {
                let trial: Vec<f64> = w.iter().zip(grad.iter()).map(|(wi, gi)| wi + step * gi).collect();
                let candidate = project_to_simplex(&trial);
                let candidate_sharpe = stats.sharpe_ratio(&candidate);
                if candidate_sharpe.is_finite() && candidate_sharpe >= sharpe {
                    moved = Some((candidate, candidate_sharpe));
                    break;
                }
                step *= 0.5;
            }

            match moved {
                Some((candidate, candidate_sharpe)) => {
                    let delta = candidate
                        .iter()
                        .zip(w.iter())
                        .fold(0.0f64, |m, (a, b)| m.max((a - b).abs()));
                    w = candidate;
                    sharpe = candidate_sharpe;
                    step *= 2.0;
                    if delta < 1e-10 {
                        converged = true;
                        status = "Solved".to_string();
                        break;
                    }
                }
                None => {
                    // No ascent direction left on the simplex.
                    converged = true;
                    status = "Solved".to_string();
                    break;
                }
            }
        }

        debug!(
            "Projected gradient stopped after {} iterations ({}), Sharpe {:.4}",
            iterations, status, sharpe
        );

        OptimalWeights {
            weights: Weights::new(w),
            converged,
            objective: -sharpe,
            status,
            iterations,
            method: SolveMethod::ProjectedGradient,
        }
    }

    /// Minimum-volatility portfolio with expected return `target`.
    pub fn min_volatility_for(&self, stats: &ReturnStats, target: f64) -> FrontierPoint {
        let n = stats.num_assets();
        let scale = return_scale(stats.mean_log_return());
        let scaled_means: Vec<f64> = stats.mean_log_return().iter().map(|m| m * scale).collect();
        let equalities = [(vec![1.0; n], 1.0), (scaled_means, target * scale)];

        let failed = |status: String| FrontierPoint {
            target_return: target,
            volatility: f64::NAN,
            converged: false,
            status,
            weights: None,
        };

        let solution = match solve_qp(stats.covariance(), &equalities, &self.settings) {
            Ok(s) => s,
            Err(e) => return failed(e.to_string()),
        };

        if !solution.solved {
            debug!(
                "Frontier target {:.6} not solved: {}",
                target, solution.status
            );
            return failed(solution.status);
        }

        let weights: Vec<f64> = solution.x.iter().map(|v| v.clamp(0.0, 1.0)).collect();
        let volatility = stats.portfolio_volatility(&weights);
        if !volatility.is_finite() {
            return failed("UndefinedObjective".to_string());
        }

        FrontierPoint {
            target_return: target,
            volatility,
            converged: true,
            status: solution.status,
            weights: Some(weights),
        }
    }

    /// Efficient frontier over targets from 0 to the largest sampled return.
    ///
    /// Grid points are solved in parallel and returned in grid order.
    pub fn efficient_frontier(
        &self,
        stats: &ReturnStats,
        sampled_returns: &[f64],
    ) -> Result<Vec<FrontierPoint>> {
        if stats.num_assets() == 0 {
            return Err(AllocationError::invalid("Optimizer needs at least one asset"));
        }

        let max_return = sampled_returns
            .iter()
            .copied()
            .filter(|r| r.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if !max_return.is_finite() {
            return Err(AllocationError::invalid(
                "Frontier needs at least one finite sampled return",
            ));
        }

        let targets = linspace(0.0, max_return, self.settings.frontier_points);
        info!(
            "Solving efficient frontier at {} targets up to {:.6}",
            targets.len(),
            max_return
        );

        let points: Vec<FrontierPoint> = targets
            .par_iter()
            .map(|&target| self.min_volatility_for(stats, target))
            .collect();

        let failed = points.iter().filter(|p| !p.converged).count();
        if failed > 0 {
            warn!("{} of {} frontier points did not converge", failed, points.len());
        }

        Ok(points)
    }
}

impl Allocator for MarkowitzOptimizer {
    fn name(&self) -> &str {
        "Markowitz"
    }

    fn allocate(&mut self, ctx: &AllocationContext) -> Result<Weights> {
        self.last = None;
        let solution = self.max_sharpe(ctx.stats)?;
        if !solution.converged {
            warn!(
                "Markowitz max-Sharpe did not converge ({}); weights are unreliable",
                solution.status
            );
        }
        let weights = solution.weights.clone();
        self.last = Some(solution);
        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WEIGHT_TOLERANCE;

    fn stats(means: Vec<f64>, covariance: Vec<Vec<f64>>) -> ReturnStats {
        let assets = (0..means.len()).map(|i| format!("A{}", i)).collect();
        ReturnStats::new(assets, means, covariance).unwrap()
    }

    fn diagonal() -> ReturnStats {
        stats(
            vec![0.0010, 0.0020, 0.0005],
            vec![
                vec![0.00010, 0.00002, 0.00001],
                vec![0.00002, 0.00040, 0.00002],
                vec![0.00001, 0.00002, 0.00005],
            ],
        )
    }

    #[test]
    fn test_projection_onto_simplex() {
        let p = project_to_simplex(&[0.2, 0.3, 0.5]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((p[2] - 0.5).abs() < 1e-12);

        let q = project_to_simplex(&[2.0, -1.0, 0.0]);
        assert_eq!(q, vec![1.0, 0.0, 0.0]);

        let r = project_to_simplex(&[0.0, 0.0]);
        assert_eq!(r, vec![0.5, 0.5]);
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(0.0, 1.0, 1), vec![0.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_max_sharpe_respects_constraints() {
        let stats = diagonal();
        let solution = MarkowitzOptimizer::default().max_sharpe(&stats).unwrap();

        assert!(solution.converged, "status: {}", solution.status);
        assert!(solution.weights.is_normalized(WEIGHT_TOLERANCE));
        assert!(solution.weights.is_long_only(1e-9));
        assert!((solution.sharpe() - stats.sharpe_ratio(solution.weights.as_slice())).abs() < 1e-12);
    }

    #[test]
    fn test_max_sharpe_beats_uniform_and_random() {
        let stats = diagonal();
        let solution = MarkowitzOptimizer::default().max_sharpe(&stats).unwrap();
        let uniform = stats.sharpe_ratio(&[1.0 / 3.0; 3]);
        assert!(solution.sharpe() >= uniform - 1e-9);

        let mut mc = super::super::MonteCarloSharpe::seeded(2000, 5);
        let search = mc.search(&stats).unwrap();
        assert!(solution.sharpe() >= search.best().sharpe - 1e-6);
    }

    #[test]
    fn test_gradient_fallback_for_negative_means() {
        let stats = stats(
            vec![-0.0010, -0.0002],
            vec![vec![0.0001, 0.0], vec![0.0, 0.0004]],
        );
        let solution = MarkowitzOptimizer::default().max_sharpe(&stats).unwrap();
        assert_eq!(solution.method, SolveMethod::ProjectedGradient);
        assert!(solution.weights.is_normalized(WEIGHT_TOLERANCE));
        assert!(solution.weights.is_long_only(0.0));
        assert!(solution.sharpe() >= stats.sharpe_ratio(&[0.5, 0.5]) - 1e-12);
    }

    #[test]
    fn test_frontier_shape() {
        let stats = diagonal();
        let optimizer = MarkowitzOptimizer::default();
        let frontier = optimizer.efficient_frontier(&stats, &[0.0012, 0.0019]).unwrap();

        assert_eq!(frontier.len(), 50);
        assert_eq!(frontier[0].target_return, 0.0);
        assert!((frontier[49].target_return - 0.0019).abs() < 1e-15);
        assert!(frontier.windows(2).all(|w| w[0].target_return < w[1].target_return));

        // Targets below the smallest mean return are infeasible: recorded, not fatal.
        assert!(!frontier[0].converged);
        assert!(frontier[0].volatility.is_nan());

        for p in frontier.iter().filter(|p| p.converged) {
            let w = p.weights.as_ref().unwrap();
            let achieved = stats.portfolio_return(w);
            assert!((achieved - p.target_return).abs() < 1e-6);
        }
    }

    #[test]
    fn test_frontier_needs_samples() {
        let optimizer = MarkowitzOptimizer::default();
        assert!(optimizer.efficient_frontier(&diagonal(), &[]).is_err());
        assert!(optimizer
            .efficient_frontier(&diagonal(), &[f64::NAN])
            .is_err());
    }

    #[test]
    fn test_allocator_records_solution() {
        let prices = crate::allocation::test_support::wavy_prices(&[0.001, 0.002, 0.0015], 90);
        let daily = crate::returns::daily_returns(&prices).unwrap();
        let stats = ReturnStats::from_prices(&prices).unwrap();
        let ctx = AllocationContext::new(&prices, &daily, &stats);

        let mut optimizer = MarkowitzOptimizer::default();
        let weights = optimizer.allocate(&ctx).unwrap();
        assert_eq!(optimizer.last_solution().unwrap().weights, weights);
    }
}

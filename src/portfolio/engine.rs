//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Solve}\big(f_{\text{mode}},\ \mathbf 1^\top\mathbf w=1,\ N\bar{\mathbf r}^\top\mathbf w\ge r_{\min},\ 0\le\mathbf w\le1\big)
//! $$
//!
//! High-level entry point: return statistics are derived once from a price
//! history, then each optimization call returns a fresh result.

use ndarray::ArrayView1;
use rayon::prelude::*;
use tracing::info;

use super::data::PriceMatrix;
use super::data::ReturnStatistics;
use super::objectives::Objective;
use super::performance::PerformanceEvaluator;
use super::performance::PerformanceSnapshot;
use super::types::OptimizationMode;
use super::types::OptimizationResult;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::optimize::Bounds;
use crate::optimize::ConstrainedProblem;
use crate::optimize::ConstrainedSolver;
use crate::optimize::ConstraintKind;
use crate::optimize::LinearConstraint;
use crate::optimize::ScalarObjective;
use crate::optimize::SolverOptions;
use crate::optimize::SolverOutcome;
use crate::optimize::SqpSolver;

/// Slack allowed when comparing the return floor with the best single asset.
const FEASIBILITY_SLACK: f64 = 1e-12;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug)]
pub struct PortfolioEngineConfig {
  /// Risk-free rate used in Sharpe computations.
  pub risk_free_rate: f64,
  /// Trading periods per year used to annualize.
  pub periods_per_year: f64,
  /// Options of the default SQP solver.
  pub solver: SolverOptions,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      risk_free_rate: 0.0,
      periods_per_year: 252.0,
      solver: SolverOptions::default(),
    }
  }
}

/// Solve a long-only, fully-invested allocation with an annualized return floor.
///
/// Starts from the uniform allocation. Fails with [`PortfolioError::Infeasible`]
/// before solving when no asset reaches `min_required_return`. The returned
/// point is clamped into `[0, 1]` and renormalized to sum to one.
pub fn solve_allocation<S, O>(
  solver: &S,
  objective: &O,
  mean_returns: ArrayView1<'_, f64>,
  min_required_return: f64,
  periods_per_year: f64,
) -> Result<SolverOutcome>
where
  S: ConstrainedSolver,
  O: ScalarObjective + ?Sized,
{
  let n = mean_returns.len();
  if n == 0 {
    return Err(PortfolioError::invalid("no assets to allocate"));
  }

  let annual: Vec<f64> = mean_returns.iter().map(|m| m * periods_per_year).collect();
  let max_achievable = annual.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  if max_achievable < min_required_return - FEASIBILITY_SLACK {
    return Err(PortfolioError::Infeasible {
      mode: String::new(),
      required: min_required_return,
      max_achievable,
    });
  }

  let problem = ConstrainedProblem::new(objective, Bounds::uniform(n, 0.0, 1.0), vec![1.0 / n as f64; n])
    .subject_to(LinearConstraint::new(vec![1.0; n], 1.0, ConstraintKind::Equality))
    .subject_to(LinearConstraint::new(annual, min_required_return, ConstraintKind::Inequality));

  let mut outcome = solver.solve(&problem)?;

  problem.bounds.clamp(&mut outcome.x);
  let total: f64 = outcome.x.iter().sum();
  if total > 0.0 {
    outcome.x.iter_mut().for_each(|w| *w /= total);
  }
  outcome.violation = problem.violation(&outcome.x);

  Ok(outcome)
}

/// Optimizes allocations over one price history.
#[derive(Clone, Debug)]
pub struct PortfolioEngine<S: ConstrainedSolver = SqpSolver> {
  stats: ReturnStatistics,
  config: PortfolioEngineConfig,
  solver: S,
}

impl PortfolioEngine<SqpSolver> {
  /// Derive return statistics from `prices` and use the SQP solver.
  pub fn new(prices: &PriceMatrix, config: PortfolioEngineConfig) -> Result<Self> {
    let solver = SqpSolver::new(config.solver.clone());
    Self::with_solver(prices, config, solver)
  }
}

impl<S: ConstrainedSolver> PortfolioEngine<S> {
  /// Same as [`PortfolioEngine::new`] with a caller-supplied solver.
  pub fn with_solver(prices: &PriceMatrix, config: PortfolioEngineConfig, solver: S) -> Result<Self> {
    if !(config.periods_per_year.is_finite() && config.periods_per_year > 0.0) {
      return Err(PortfolioError::invalid(format!(
        "periods per year must be positive, got {}",
        config.periods_per_year
      )));
    }
    if !config.risk_free_rate.is_finite() {
      return Err(PortfolioError::invalid("risk-free rate must be finite"));
    }

    Ok(Self {
      stats: ReturnStatistics::from_prices(prices)?,
      config,
      solver,
    })
  }

  pub fn statistics(&self) -> &ReturnStatistics {
    &self.stats
  }

  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  pub fn solver(&self) -> &S {
    &self.solver
  }

  pub fn evaluator(&self) -> PerformanceEvaluator<'_> {
    PerformanceEvaluator::new(
      &self.stats,
      self.config.risk_free_rate,
      self.config.periods_per_year,
    )
  }

  /// Metrics of arbitrary weights on this engine's statistics.
  pub fn evaluate(&self, weights: &[f64]) -> Result<PerformanceSnapshot> {
    self.evaluator().evaluate(weights)
  }

  /// Optimize for the mode named `mode`.
  pub fn optimize(&self, mode: &str, min_required_return: f64) -> Result<OptimizationResult> {
    let mode: OptimizationMode = mode.parse()?;
    self.optimize_mode(mode, min_required_return)
  }

  pub fn optimize_mode(
    &self,
    mode: OptimizationMode,
    min_required_return: f64,
  ) -> Result<OptimizationResult> {
    let label = mode.as_str();
    let context = |e: PortfolioError| e.with_context(label, min_required_return);

    if !min_required_return.is_finite() {
      return Err(PortfolioError::invalid(format!(
        "minimum return must be finite, got {min_required_return}"
      )));
    }
    if mode.uses_covariance() {
      self.stats.ensure_positive_semidefinite().map_err(context)?;
    }
    // A zero-variance mix sends the Sharpe ratio's gradient to infinity.
    if mode == OptimizationMode::MaxSharpe {
      self.stats.ensure_nonsingular_covariance().map_err(context)?;
    }

    let eval = self.evaluator();
    let objective = Objective::for_mode(mode, eval);

    let outcome = solve_allocation(
      &self.solver,
      &objective,
      self.stats.mean_returns().view(),
      min_required_return,
      self.config.periods_per_year,
    )
    .map_err(context)?;

    let performance = eval.evaluate(&outcome.x)?;
    let objective_value = objective.value(&outcome.x).map_err(context)?;

    info!(
      mode = label,
      iterations = outcome.iterations,
      objective = objective_value,
      termination = ?outcome.termination,
      "optimization finished"
    );

    Ok(OptimizationResult {
      mode,
      assets: self.stats.assets().to_vec(),
      converged: outcome.converged(),
      weights: outcome.x,
      performance,
      objective: objective_value,
      iterations: outcome.iterations,
    })
  }

  /// Optimize several modes in parallel. Results follow the order of `modes`.
  pub fn optimize_many(
    &self,
    modes: &[OptimizationMode],
    min_required_return: f64,
  ) -> Vec<Result<OptimizationResult>> {
    modes
      .par_iter()
      .map(|&mode| self.optimize_mode(mode, min_required_return))
      .collect()
  }
}

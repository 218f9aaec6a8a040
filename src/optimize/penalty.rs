//! # Penalty Nelder-Mead
//!
//! $$
//! \min_{\mathbf{x}} f(\Pi(\mathbf{x})) + \lambda_k\Big(\sum_i v_i(\Pi(\mathbf{x}))^2 + \|\mathbf{x}-\Pi(\mathbf{x})\|^2\Big),
//! \quad \lambda_k\uparrow
//! $$
//!
//! Derivative-free alternative to the SQP solver: a quadratic-penalty sequence
//! minimised with argmin's Nelder-Mead, each stage warm-started from the last.

use std::cell::RefCell;

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::solver::neldermead::NelderMead;
use tracing::debug;

use super::problem::ConstrainedProblem;
use super::problem::ConstrainedSolver;
use super::problem::ScalarObjective;
use super::problem::SolverOptions;
use super::problem::SolverOutcome;
use super::problem::Termination;
use crate::error::PortfolioError;
use crate::error::Result;

/// Quadratic-penalty Nelder-Mead solver.
#[derive(Clone, Debug)]
pub struct PenaltyNelderMead {
  pub options: SolverOptions,
  /// Penalty weights applied in turn.
  pub penalties: Vec<f64>,
  /// Edge length of the initial simplex around the start point.
  pub initial_step: f64,
  /// Simplex standard-deviation tolerance per stage.
  pub sd_tolerance: f64,
  /// Nelder-Mead iteration cap per stage.
  pub stage_iters: u64,
}

impl Default for PenaltyNelderMead {
  fn default() -> Self {
    Self {
      options: SolverOptions {
        constraint_tol: 1e-6,
        ..SolverOptions::default()
      },
      penalties: vec![1e2, 1e4, 1e6, 1e8],
      initial_step: 0.05,
      sd_tolerance: 1e-12,
      stage_iters: 5000,
    }
  }
}

/// Penalised cost. Objective errors cannot cross argmin's simplex setup, so
/// the first one is parked in `error` and the point scores `+inf`.
struct PenaltyCost<'p, 'a, O: ScalarObjective + ?Sized> {
  problem: &'p ConstrainedProblem<'a, O>,
  weight: f64,
  error: &'p RefCell<Option<PortfolioError>>,
}

impl<O: ScalarObjective + ?Sized> CostFunction for PenaltyCost<'_, '_, O> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let mut w = x.clone();
    self.problem.bounds.clamp(&mut w);

    let f = match self.problem.objective.value(&w) {
      Ok(f) => f,
      Err(e) => {
        if self.error.borrow().is_none() {
          self.error.replace(Some(e));
        }
        return Ok(f64::INFINITY);
      }
    };

    let outside: f64 = x.iter().zip(&w).map(|(a, b)| (a - b).powi(2)).sum();
    let broken: f64 = self
      .problem
      .constraints
      .iter()
      .map(|c| c.violation(&w).powi(2))
      .sum();

    Ok(f + self.weight * (broken + outside))
  }
}

fn start_simplex(x0: &[f64], step: f64) -> Vec<Vec<f64>> {
  let mut simplex = Vec::with_capacity(x0.len() + 1);
  simplex.push(x0.to_vec());
  for i in 0..x0.len() {
    let mut point = x0.to_vec();
    point[i] += step;
    simplex.push(point);
  }
  simplex
}

fn from_argmin(err: argmin::core::Error, iterations: usize) -> PortfolioError {
  match err.downcast::<PortfolioError>() {
    Ok(inner) => inner,
    Err(other) => {
      debug!(%other, "nelder-mead backend error");
      PortfolioError::Convergence {
        mode: String::new(),
        iterations,
        violation: f64::NAN,
        min_return: f64::NAN,
      }
    }
  }
}

impl PenaltyNelderMead {
  pub fn new(options: SolverOptions) -> Self {
    Self {
      options,
      ..Self::default()
    }
  }
}

impl ConstrainedSolver for PenaltyNelderMead {
  fn solve<O: ScalarObjective + ?Sized>(
    &self,
    problem: &ConstrainedProblem<'_, O>,
  ) -> Result<SolverOutcome> {
    let n = problem.dim();
    if n == 0 || problem.bounds.len() != n {
      return Err(PortfolioError::invalid(format!(
        "problem dimension {n} does not match {} bounds",
        problem.bounds.len()
      )));
    }

    let mut x = problem.x0.clone();
    problem.bounds.clamp(&mut x);
    let mut iterations = 0usize;
    let mut capped = false;

    for &weight in &self.penalties {
      problem.objective.value(&x)?;

      let closure_err: RefCell<Option<PortfolioError>> = RefCell::new(None);
      let cost = PenaltyCost {
        problem,
        weight,
        error: &closure_err,
      };
      let solver = NelderMead::new(start_simplex(&x, self.initial_step))
        .with_sd_tolerance(self.sd_tolerance)
        .map_err(|e| from_argmin(e, iterations))?;

      let run = Executor::new(cost, solver)
        .configure(|state| state.max_iters(self.stage_iters))
        .run();
      if let Some(err) = closure_err.take() {
        return Err(err);
      }
      let res = run.map_err(|e| from_argmin(e, iterations))?;

      let stage_iters = res.state.iter as usize;
      iterations += stage_iters;
      capped = stage_iters as u64 >= self.stage_iters;

      if let Some(best) = res.state.best_param {
        x = best;
      }
      problem.bounds.clamp(&mut x);

      debug!(weight, stage_iters, violation = problem.violation(&x), "penalty stage");
    }

    let violation = problem.violation(&x);
    if violation > self.options.constraint_tol {
      return Err(PortfolioError::Convergence {
        mode: String::new(),
        iterations,
        violation,
        min_return: f64::NAN,
      });
    }

    Ok(SolverOutcome {
      objective: problem.objective.value(&x)?,
      x,
      iterations,
      termination: if capped {
        Termination::MaxIters
      } else {
        Termination::Converged
      },
      violation,
    })
  }
}

//! # Constrained Problem
//!
//! $$
//! \min_{\mathbf{x}} f(\mathbf{x})\quad\text{s.t.}\quad c_E(\mathbf{x})=0,\ c_I(\mathbf{x})\ge 0,\ \mathbf{l}\le\mathbf{x}\le\mathbf{u}
//! $$
//!
//! The narrow interface shared by every solver: an objective, box bounds,
//! equality/inequality constraints and an initial guess in, a point out.

use impl_new_derive::ImplNew;

use super::finite_diff;
use crate::error::Result;

/// A scalar objective posed as a minimisation problem.
pub trait ScalarObjective: Sync {
  /// Objective value at `x`.
  fn value(&self, x: &[f64]) -> Result<f64>;

  /// Gradient at `x`. Central finite differences unless overridden.
  fn gradient(&self, x: &[f64]) -> Result<Vec<f64>> {
    finite_diff::gradient(x, |p| self.value(p))
  }
}

/// Whether a constraint is `c(x) = 0` or `c(x) >= 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
  Equality,
  Inequality,
}

/// A general constraint in `c(x) = 0` / `c(x) >= 0` form.
pub trait Constraint: Sync {
  fn kind(&self) -> ConstraintKind;

  fn value(&self, x: &[f64]) -> f64;

  fn gradient(&self, x: &[f64]) -> Vec<f64> {
    finite_diff::plain_gradient(x, |p| self.value(p))
  }

  /// Amount by which `x` breaks this constraint.
  fn violation(&self, x: &[f64]) -> f64 {
    let c = self.value(x);
    match self.kind() {
      ConstraintKind::Equality => c.abs(),
      ConstraintKind::Inequality => (-c).max(0.0),
    }
  }
}

/// `coefficients · x - rhs` compared against zero.
#[derive(ImplNew, Clone, Debug)]
pub struct LinearConstraint {
  pub coefficients: Vec<f64>,
  pub rhs: f64,
  pub kind: ConstraintKind,
}

impl Constraint for LinearConstraint {
  fn kind(&self) -> ConstraintKind {
    self.kind
  }

  fn value(&self, x: &[f64]) -> f64 {
    self
      .coefficients
      .iter()
      .zip(x.iter())
      .map(|(a, b)| a * b)
      .sum::<f64>()
      - self.rhs
  }

  fn gradient(&self, _x: &[f64]) -> Vec<f64> {
    self.coefficients.clone()
  }
}

/// Box bounds `lower <= x <= upper`.
#[derive(Clone, Debug)]
pub struct Bounds {
  pub lower: Vec<f64>,
  pub upper: Vec<f64>,
}

impl Bounds {
  /// Same interval for every coordinate.
  pub fn uniform(n: usize, lower: f64, upper: f64) -> Self {
    Self {
      lower: vec![lower; n],
      upper: vec![upper; n],
    }
  }

  pub fn len(&self) -> usize {
    self.lower.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lower.is_empty()
  }

  /// Clamp `x` into the box in place.
  pub fn clamp(&self, x: &mut [f64]) {
    for ((xi, &lo), &hi) in x.iter_mut().zip(&self.lower).zip(&self.upper) {
      *xi = xi.clamp(lo, hi);
    }
  }

  pub fn violation(&self, x: &[f64]) -> f64 {
    x.iter()
      .zip(&self.lower)
      .zip(&self.upper)
      .map(|((&xi, &lo), &hi)| (lo - xi).max(xi - hi).max(0.0))
      .fold(0.0, f64::max)
  }
}

/// Everything a [`ConstrainedSolver`] needs.
pub struct ConstrainedProblem<'a, O: ScalarObjective + ?Sized> {
  pub objective: &'a O,
  pub bounds: Bounds,
  pub constraints: Vec<Box<dyn Constraint + 'a>>,
  pub x0: Vec<f64>,
}

impl<'a, O: ScalarObjective + ?Sized> ConstrainedProblem<'a, O> {
  pub fn new(objective: &'a O, bounds: Bounds, x0: Vec<f64>) -> Self {
    Self {
      objective,
      bounds,
      constraints: Vec::new(),
      x0,
    }
  }

  /// Add a constraint.
  pub fn subject_to(mut self, constraint: impl Constraint + 'a) -> Self {
    self.constraints.push(Box::new(constraint));
    self
  }

  pub fn dim(&self) -> usize {
    self.x0.len()
  }

  /// Largest violation across bounds and constraints.
  pub fn violation(&self, x: &[f64]) -> f64 {
    self
      .constraints
      .iter()
      .map(|c| c.violation(x))
      .fold(self.bounds.violation(x), f64::max)
  }
}

/// Tolerances and caps shared by the solvers.
#[derive(Clone, Debug)]
pub struct SolverOptions {
  /// Outer iteration cap.
  pub max_iters: usize,
  /// Stop when the objective changes by less than `ftol * (1 + |f|)`.
  pub ftol: f64,
  /// Stop when the step's max-norm falls below this.
  pub xtol: f64,
  /// Largest constraint violation accepted at termination.
  pub constraint_tol: f64,
  /// Iteration cap of the QP subproblem.
  pub qp_max_iters: usize,
  /// Residual tolerance of the QP subproblem.
  pub qp_tol: f64,
  /// Backtracking steps tried per line search.
  pub line_search_steps: usize,
}

impl Default for SolverOptions {
  fn default() -> Self {
    Self {
      max_iters: 100,
      ftol: 1e-10,
      xtol: 1e-9,
      constraint_tol: 1e-8,
      qp_max_iters: 4000,
      qp_tol: 1e-10,
      line_search_steps: 30,
    }
  }
}

/// Why a solver stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
  /// Step or objective change fell below tolerance.
  Converged,
  /// No step along the search direction reduced the merit function.
  LineSearchStalled,
  /// Iteration cap reached.
  MaxIters,
}

/// Result of a successful solve. The point always satisfies the constraints
/// within `SolverOptions::constraint_tol`.
#[derive(Clone, Debug)]
pub struct SolverOutcome {
  pub x: Vec<f64>,
  pub objective: f64,
  pub iterations: usize,
  pub termination: Termination,
  pub violation: f64,
}

impl SolverOutcome {
  pub fn converged(&self) -> bool {
    self.termination == Termination::Converged
  }
}

/// A local solver for [`ConstrainedProblem`]s.
pub trait ConstrainedSolver: Sync {
  fn solve<O: ScalarObjective + ?Sized>(
    &self,
    problem: &ConstrainedProblem<'_, O>,
  ) -> Result<SolverOutcome>;
}

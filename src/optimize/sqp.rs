//! # SQP
//!
//! $$
//! \mathbf{d}_k=\arg\min_{\mathbf{d}}\ \tfrac12\mathbf{d}^\top B_k\mathbf{d}+\nabla f_k^\top\mathbf{d}
//! \quad\text{s.t.}\quad c_k+J_k\mathbf{d}\ \{=,\ge\}\ 0,\ \mathbf{l}\le\mathbf{x}_k+\mathbf{d}\le\mathbf{u}
//! $$
//!
//! Sequential quadratic programming in the style of SLSQP: a damped BFGS
//! approximation of the Lagrangian Hessian, QP subproblems over the
//! linearised constraints and bounds, and a backtracking line search on the
//! L1 merit function `f + mu * sum(violations)`.

use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::debug;
use tracing::warn;

use super::problem::ConstrainedProblem;
use super::problem::ConstrainedSolver;
use super::problem::ConstraintKind;
use super::problem::ScalarObjective;
use super::problem::SolverOptions;
use super::problem::SolverOutcome;
use super::problem::Termination;
use super::qp::AdmmQp;
use super::qp::QpProblem;
use crate::error::PortfolioError;
use crate::error::Result;

const ARMIJO: f64 = 1e-4;
const PENALTY_MARGIN: f64 = 1.5;

/// SLSQP-style local solver.
#[derive(Clone, Debug, Default)]
pub struct SqpSolver {
  pub options: SolverOptions,
}

/// Constraint rows scaled to unit gradient norm at the current point.
struct Linearization {
  kinds: Vec<ConstraintKind>,
  values: Vec<f64>,
  jacobian: DMatrix<f64>,
}

impl Linearization {
  fn at<O: ScalarObjective + ?Sized>(problem: &ConstrainedProblem<'_, O>, x: &[f64]) -> Self {
    let n = x.len();
    let m = problem.constraints.len();
    let mut kinds = Vec::with_capacity(m);
    let mut values = Vec::with_capacity(m);
    let mut jacobian = DMatrix::zeros(m, n);

    for (i, c) in problem.constraints.iter().enumerate() {
      let grad = c.gradient(x);
      let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
      let scale = if norm > 1e-12 { 1.0 / norm } else { 1.0 };

      kinds.push(c.kind());
      values.push(c.value(x) * scale);
      for (j, g) in grad.iter().enumerate() {
        jacobian[(i, j)] = g * scale;
      }
    }

    Self {
      kinds,
      values,
      jacobian,
    }
  }

  fn violation(&self) -> f64 {
    self
      .kinds
      .iter()
      .zip(&self.values)
      .map(|(kind, &c)| match kind {
        ConstraintKind::Equality => c.abs(),
        ConstraintKind::Inequality => (-c).max(0.0),
      })
      .sum()
  }
}

fn inf_norm(v: &DVector<f64>) -> f64 {
  v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

fn finite_gradient(grad: Vec<f64>, iter: usize) -> Result<DVector<f64>> {
  match grad.iter().position(|g| !g.is_finite()) {
    Some(i) => Err(PortfolioError::NumericEdgeCase(format!(
      "objective gradient component {i} is {} at iteration {iter}",
      grad[i]
    ))),
    None => Ok(DVector::from_vec(grad)),
  }
}

impl SqpSolver {
  pub fn new(options: SolverOptions) -> Self {
    Self { options }
  }

  fn subproblem<O: ScalarObjective + ?Sized>(
    problem: &ConstrainedProblem<'_, O>,
    x: &[f64],
    grad: &DVector<f64>,
    hessian: &DMatrix<f64>,
    lin: &Linearization,
  ) -> QpProblem {
    let n = x.len();
    let m = lin.values.len();
    let mut a = DMatrix::zeros(m + n, n);
    let mut lower = DVector::zeros(m + n);
    let mut upper = DVector::zeros(m + n);

    for i in 0..m {
      for j in 0..n {
        a[(i, j)] = lin.jacobian[(i, j)];
      }
      lower[i] = -lin.values[i];
      upper[i] = match lin.kinds[i] {
        ConstraintKind::Equality => -lin.values[i],
        ConstraintKind::Inequality => f64::INFINITY,
      };
    }

    for j in 0..n {
      a[(m + j, j)] = 1.0;
      lower[m + j] = problem.bounds.lower[j] - x[j];
      upper[m + j] = problem.bounds.upper[j] - x[j];
    }

    QpProblem {
      p: hessian.clone(),
      q: grad.clone(),
      a,
      lower,
      upper,
    }
  }

  /// Powell-damped BFGS update, keeping `b` positive definite. An update that
  /// would leave `b` non-finite or indefinite is skipped; returns whether `b`
  /// changed.
  fn update_hessian(b: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>, first: bool) -> bool {
    if !s.iter().chain(y.iter()).all(|v| v.is_finite()) {
      return false;
    }

    let sy = s.dot(y);
    let mut candidate = if first && sy > 1e-16 {
      // Shanno-Phua scaling of the identity before the first update.
      DMatrix::identity(s.len(), s.len()) * (y.dot(y) / sy)
    } else {
      b.clone()
    };

    let bs = &candidate * s;
    let sbs = s.dot(&bs);
    if sbs <= 1e-16 {
      return false;
    }

    let y = if sy < 0.2 * sbs {
      let theta = 0.8 * sbs / (sbs - sy);
      y * theta + &bs * (1.0 - theta)
    } else {
      y.clone()
    };

    let sy = s.dot(&y);
    if sy <= 1e-16 {
      return false;
    }

    candidate += &y * y.transpose() / sy - &bs * bs.transpose() / sbs;
    if !candidate.iter().all(|v| v.is_finite()) || candidate.clone().cholesky().is_none() {
      return false;
    }

    *b = candidate;
    true
  }

  /// Pull `x` back onto the linearised feasible set with a few projection
  /// QPs. Returns the remaining violation.
  fn restore_feasibility<O: ScalarObjective + ?Sized>(
    &self,
    problem: &ConstrainedProblem<'_, O>,
    qp_solver: &AdmmQp,
    x: &mut Vec<f64>,
  ) -> Result<f64> {
    let n = x.len();
    let identity = DMatrix::<f64>::identity(n, n);
    let zero = DVector::<f64>::zeros(n);

    for _ in 0..3 {
      let lin = Linearization::at(problem, x);
      let qp = Self::subproblem(problem, x, &zero, &identity, &lin);
      let d = qp_solver.solve(&qp)?.x;

      let mut candidate: Vec<f64> = x.iter().zip(d.iter()).map(|(xi, di)| xi + di).collect();
      problem.bounds.clamp(&mut candidate);

      if problem.violation(&candidate) < problem.violation(x) {
        *x = candidate;
      } else {
        break;
      }
      if problem.violation(x) <= self.options.constraint_tol {
        break;
      }
    }

    Ok(problem.violation(x))
  }

  fn lagrangian_gradient(grad: &DVector<f64>, jacobian: &DMatrix<f64>, y: &DVector<f64>) -> DVector<f64> {
    if jacobian.nrows() == 0 {
      grad.clone()
    } else {
      grad + jacobian.transpose() * y
    }
  }
}

impl ConstrainedSolver for SqpSolver {
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

    let opts = &self.options;
    let qp_solver = AdmmQp::new(opts.qp_max_iters, opts.qp_tol);
    let m = problem.constraints.len();

    let mut x = problem.x0.clone();
    problem.bounds.clamp(&mut x);

    let mut f = problem.objective.value(&x)?;
    let mut grad = finite_gradient(problem.objective.gradient(&x)?, 0)?;
    let mut lin = Linearization::at(problem, &x);
    let mut hessian = DMatrix::<f64>::identity(n, n);
    let mut penalty = 0.0_f64;
    let mut first_update = true;

    let mut termination = Termination::MaxIters;
    let mut iterations = 0;

    for iter in 1..=opts.max_iters {
      iterations = iter;

      let qp = Self::subproblem(problem, &x, &grad, &hessian, &lin);
      let sol = qp_solver.solve(&qp)?;
      let d = sol.x;
      let multipliers = sol.y.rows(0, m).into_owned();

      let step_norm = inf_norm(&d);
      let violation = lin.violation();
      if step_norm < opts.xtol && violation <= opts.constraint_tol {
        termination = Termination::Converged;
        break;
      }

      let max_multiplier = inf_norm(&multipliers);
      penalty = penalty.max(PENALTY_MARGIN * max_multiplier + 1e-8);

      let merit = f + penalty * violation;
      let slope = grad.dot(&d) - penalty * violation;

      let mut alpha = 1.0;
      let mut accepted = None;
      let mut last_err = None;

      for _ in 0..opts.line_search_steps {
        let mut trial: Vec<f64> = x.iter().zip(d.iter()).map(|(xi, di)| xi + alpha * di).collect();
        problem.bounds.clamp(&mut trial);

        match problem.objective.value(&trial) {
          Ok(f_trial) if f_trial.is_finite() => {
            let lin_trial = Linearization::at(problem, &trial);
            let merit_trial = f_trial + penalty * lin_trial.violation();

            if merit_trial <= merit + ARMIJO * alpha * slope.min(0.0) {
              accepted = Some((trial, f_trial, lin_trial));
              break;
            }
          }
          Ok(_) => {}
          Err(e) => last_err = Some(e),
        }

        alpha *= 0.5;
      }

      let Some((x_new, f_new, lin_new)) = accepted else {
        if let Some(err) = last_err {
          if violation > opts.constraint_tol {
            return Err(err);
          }
        }
        termination = Termination::LineSearchStalled;
        break;
      };

      let grad_new = finite_gradient(problem.objective.gradient(&x_new)?, iter)?;

      let s = DVector::from_iterator(n, x_new.iter().zip(&x).map(|(a, b)| a - b));
      let y = Self::lagrangian_gradient(&grad_new, &lin_new.jacobian, &multipliers)
        - Self::lagrangian_gradient(&grad, &lin.jacobian, &multipliers);
      if Self::update_hessian(&mut hessian, &s, &y, first_update) {
        first_update = false;
      } else {
        debug!(iter, "skipped quasi-Newton update");
      }

      let f_change = (f_new - f).abs();
      let s_norm = inf_norm(&s);

      debug!(
        iter,
        objective = f_new,
        violation = lin_new.violation(),
        step = s_norm,
        alpha,
        qp_iters = sol.iterations,
        "sqp iteration"
      );

      x = x_new;
      f = f_new;
      grad = grad_new;
      lin = lin_new;

      if lin.violation() <= opts.constraint_tol
        && (f_change < opts.ftol * (1.0 + f.abs()) || s_norm < opts.xtol)
      {
        termination = Termination::Converged;
        break;
      }
    }

    let mut violation = problem.violation(&x);
    if violation > opts.constraint_tol {
      violation = self.restore_feasibility(problem, &qp_solver, &mut x)?;
      f = problem.objective.value(&x)?;
    }

    if violation > opts.constraint_tol {
      return Err(PortfolioError::Convergence {
        mode: String::new(),
        iterations,
        violation,
        min_return: f64::NAN,
      });
    }

    if termination != Termination::Converged {
      warn!(
        iterations,
        objective = f,
        ?termination,
        "sqp stopped before meeting its tolerances; returning the feasible iterate"
      );
    }

    Ok(SolverOutcome {
      x,
      objective: f,
      iterations,
      termination,
      violation,
    })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::optimize::problem::Bounds;
  use crate::optimize::problem::LinearConstraint;

  struct Quadratic {
    center: Vec<f64>,
  }

  impl ScalarObjective for Quadratic {
    fn value(&self, x: &[f64]) -> Result<f64> {
      Ok(
        x.iter()
          .zip(&self.center)
          .map(|(a, c)| (a - c).powi(2))
          .sum(),
      )
    }
  }

  #[test]
  fn projects_point_onto_simplex() {
    let objective = Quadratic {
      center: vec![0.8, 0.6, -0.2],
    };
    let problem = ConstrainedProblem::new(&objective, Bounds::uniform(3, 0.0, 1.0), vec![1.0 / 3.0; 3])
      .subject_to(LinearConstraint::new(vec![1.0; 3], 1.0, ConstraintKind::Equality));

    let out = SqpSolver::default().solve(&problem).unwrap();

    assert_abs_diff_eq!(out.x[0], 0.6, epsilon = 1e-6);
    assert_abs_diff_eq!(out.x[1], 0.4, epsilon = 1e-6);
    assert_abs_diff_eq!(out.x[2], 0.0, epsilon = 1e-6);
  }

  #[test]
  fn respects_inequality_floor() {
    // Pull toward the origin but require x0 + 2 x1 >= 1.
    let objective = Quadratic {
      center: vec![0.0, 0.0],
    };
    let problem = ConstrainedProblem::new(&objective, Bounds::uniform(2, -5.0, 5.0), vec![2.0, 2.0])
      .subject_to(LinearConstraint::new(vec![1.0, 2.0], 1.0, ConstraintKind::Inequality));

    let out = SqpSolver::default().solve(&problem).unwrap();

    assert_abs_diff_eq!(out.x[0], 0.2, epsilon = 1e-6);
    assert_abs_diff_eq!(out.x[1], 0.4, epsilon = 1e-6);
    assert!(out.violation <= 1e-8);
  }

  #[test]
  fn bounds_only_problem_stops_on_the_box() {
    let objective = Quadratic {
      center: vec![2.0, -1.0],
    };
    let problem = ConstrainedProblem::new(&objective, Bounds::uniform(2, 0.0, 1.0), vec![0.5, 0.5]);

    let out = SqpSolver::default().solve(&problem).unwrap();

    assert_abs_diff_eq!(out.x[0], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(out.x[1], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(out.objective, 2.0, epsilon = 1e-6);
  }

  #[test]
  fn non_finite_gradient_is_a_numeric_edge_case() {
    struct Cliff;

    impl ScalarObjective for Cliff {
      fn value(&self, x: &[f64]) -> Result<f64> {
        Ok(x.iter().sum())
      }

      fn gradient(&self, x: &[f64]) -> Result<Vec<f64>> {
        Ok(vec![f64::INFINITY; x.len()])
      }
    }

    let problem = ConstrainedProblem::new(&Cliff, Bounds::uniform(2, 0.0, 1.0), vec![0.5, 0.5]);

    match SqpSolver::default().solve(&problem) {
      Err(PortfolioError::NumericEdgeCase(msg)) => assert!(msg.contains("gradient")),
      other => panic!("expected NumericEdgeCase, got {other:?}"),
    }
  }

  #[test]
  fn hessian_update_rejects_non_finite_curvature() {
    let mut b = DMatrix::<f64>::identity(2, 2);
    let s = DVector::from_vec(vec![1e-3, -2e-3]);

    let y = DVector::from_vec(vec![f64::NAN, 1.0]);
    assert!(!SqpSolver::update_hessian(&mut b, &s, &y, true));
    assert_eq!(b, DMatrix::identity(2, 2));

    let y = DVector::from_vec(vec![1e308, -1e308]);
    assert!(!SqpSolver::update_hessian(&mut b, &s, &y, false));
    assert_eq!(b, DMatrix::identity(2, 2));

    let y = DVector::from_vec(vec![2e-3, -4e-3]);
    assert!(SqpSolver::update_hessian(&mut b, &s, &y, true));
    assert!(b.clone().cholesky().is_some());
  }

  #[test]
  fn unreachable_equality_reports_convergence_failure() {
    let objective = Quadratic {
      center: vec![0.0, 0.0],
    };
    // x0 + x1 = 5 cannot hold inside [0, 1]^2.
    let problem = ConstrainedProblem::new(&objective, Bounds::uniform(2, 0.0, 1.0), vec![0.5, 0.5])
      .subject_to(LinearConstraint::new(vec![1.0, 1.0], 5.0, ConstraintKind::Equality));
    let solver = SqpSolver::new(SolverOptions {
      max_iters: 20,
      qp_max_iters: 500,
      ..SolverOptions::default()
    });

    match solver.solve(&problem) {
      Err(PortfolioError::Convergence { violation, .. }) => assert!(violation > 1.0),
      other => panic!("expected convergence failure, got {other:?}"),
    }
  }
}

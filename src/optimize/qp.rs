//! # Convex QP
//!
//! $$
//! \min_{\mathbf{d}} \tfrac12\mathbf{d}^\top P\mathbf{d}+\mathbf{q}^\top\mathbf{d}
//! \quad\text{s.t.}\quad \mathbf{l}\le A\mathbf{d}\le\mathbf{u}
//! $$
//!
//! Operator-splitting (ADMM) solver for the dense, small QP subproblems of the
//! SQP iteration. Equality rows are expressed as `l == u`.

use nalgebra::Cholesky;
use nalgebra::DMatrix;
use nalgebra::DVector;
use nalgebra::Dyn;

use crate::error::PortfolioError;
use crate::error::Result;

const RHO_EQ_SCALE: f64 = 1e3;
const RHO_MIN: f64 = 1e-6;
const RHO_MAX: f64 = 1e6;
const ADAPT_EVERY: usize = 25;

/// Dense QP in `l <= A d <= u` form. `P` must be symmetric positive semi-definite.
#[derive(Clone, Debug)]
pub struct QpProblem {
  pub p: DMatrix<f64>,
  pub q: DVector<f64>,
  pub a: DMatrix<f64>,
  pub lower: DVector<f64>,
  pub upper: DVector<f64>,
}

/// Primal point and row multipliers of a QP solve.
///
/// Multipliers follow `P d + q + Aᵀ y = 0`.
#[derive(Clone, Debug)]
pub struct QpSolution {
  pub x: DVector<f64>,
  pub y: DVector<f64>,
  pub iterations: usize,
  pub solved: bool,
  pub primal_residual: f64,
  pub dual_residual: f64,
}

/// ADMM settings.
#[derive(Clone, Debug)]
pub struct AdmmQp {
  pub rho: f64,
  pub sigma: f64,
  pub alpha: f64,
  pub max_iters: usize,
  pub eps_abs: f64,
  pub eps_rel: f64,
}

impl Default for AdmmQp {
  fn default() -> Self {
    Self {
      rho: 0.1,
      sigma: 1e-6,
      alpha: 1.6,
      max_iters: 4000,
      eps_abs: 1e-10,
      eps_rel: 1e-10,
    }
  }
}

fn inf_norm(v: &DVector<f64>) -> f64 {
  v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

fn project(v: &DVector<f64>, lower: &DVector<f64>, upper: &DVector<f64>) -> DVector<f64> {
  DVector::from_fn(v.len(), |i, _| v[i].max(lower[i]).min(upper[i]))
}

impl AdmmQp {
  pub fn new(max_iters: usize, tol: f64) -> Self {
    Self {
      max_iters,
      eps_abs: tol,
      eps_rel: tol,
      ..Self::default()
    }
  }

  fn row_rho(&self, rho: f64, qp: &QpProblem) -> DVector<f64> {
    DVector::from_fn(qp.a.nrows(), |i, _| {
      let (lo, hi) = (qp.lower[i], qp.upper[i]);
      if lo == f64::NEG_INFINITY && hi == f64::INFINITY {
        RHO_MIN
      } else if (hi - lo).abs() < 1e-12 {
        RHO_EQ_SCALE * rho
      } else {
        rho
      }
    })
  }

  fn factor(&self, qp: &QpProblem, rho_vec: &DVector<f64>) -> Result<Cholesky<f64, Dyn>> {
    let n = qp.p.nrows();
    let scaled_a = DMatrix::from_fn(qp.a.nrows(), n, |i, j| rho_vec[i] * qp.a[(i, j)]);
    let kkt = &qp.p + DMatrix::identity(n, n) * self.sigma + qp.a.transpose() * scaled_a;

    kkt.cholesky().ok_or_else(|| {
      PortfolioError::NumericEdgeCase("QP system matrix is not positive definite".into())
    })
  }

  /// Solve `qp`. Returns the last iterate with `solved == false` when the
  /// iteration cap is hit before the residuals meet tolerance.
  pub fn solve(&self, qp: &QpProblem) -> Result<QpSolution> {
    let n = qp.p.nrows();
    let m = qp.a.nrows();

    if qp.q.len() != n || qp.a.ncols() != n || qp.lower.len() != m || qp.upper.len() != m {
      return Err(PortfolioError::invalid("QP dimensions do not agree"));
    }

    let mut rho = self.rho;
    let mut rho_vec = self.row_rho(rho, qp);
    let mut chol = self.factor(qp, &rho_vec)?;

    let mut x = DVector::<f64>::zeros(n);
    let mut z = project(&(&qp.a * &x), &qp.lower, &qp.upper);
    let mut y = DVector::<f64>::zeros(m);

    let mut primal_residual = f64::INFINITY;
    let mut dual_residual = f64::INFINITY;

    for iter in 1..=self.max_iters {
      let rhs = &x * self.sigma - &qp.q + qp.a.transpose() * (rho_vec.component_mul(&z) - &y);
      let x_tilde = chol.solve(&rhs);
      let z_tilde = &qp.a * &x_tilde;

      let x_next = &x_tilde * self.alpha + &x * (1.0 - self.alpha);
      let z_relaxed = &z_tilde * self.alpha + &z * (1.0 - self.alpha);
      let z_next = project(
        &(&z_relaxed + y.component_div(&rho_vec)),
        &qp.lower,
        &qp.upper,
      );
      y += rho_vec.component_mul(&(&z_relaxed - &z_next));
      x = x_next;
      z = z_next;

      let ax = &qp.a * &x;
      let px = &qp.p * &x;
      let aty = qp.a.transpose() * &y;

      primal_residual = inf_norm(&(&ax - &z));
      dual_residual = inf_norm(&(&px + &qp.q + &aty));

      let primal_scale = inf_norm(&ax).max(inf_norm(&z));
      let dual_scale = inf_norm(&px).max(inf_norm(&aty)).max(inf_norm(&qp.q));
      let eps_primal = self.eps_abs + self.eps_rel * primal_scale;
      let eps_dual = self.eps_abs + self.eps_rel * dual_scale;

      if primal_residual <= eps_primal && dual_residual <= eps_dual {
        return Ok(QpSolution {
          x,
          y,
          iterations: iter,
          solved: true,
          primal_residual,
          dual_residual,
        });
      }

      if iter % ADAPT_EVERY == 0 {
        let ratio = ((primal_residual / (primal_scale + 1e-30))
          / (dual_residual / (dual_scale + 1e-30) + 1e-30))
          .sqrt();
        let new_rho = (rho * ratio).clamp(RHO_MIN, RHO_MAX);

        if new_rho > 5.0 * rho || new_rho < 0.2 * rho {
          rho = new_rho;
          rho_vec = self.row_rho(rho, qp);
          chol = self.factor(qp, &rho_vec)?;
        }
      }
    }

    tracing::debug!(
      primal_residual,
      dual_residual,
      "QP subproblem hit its iteration cap"
    );

    Ok(QpSolution {
      x,
      y,
      iterations: self.max_iters,
      solved: false,
      primal_residual,
      dual_residual,
    })
  }
}

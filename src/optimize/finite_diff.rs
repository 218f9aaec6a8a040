//! # Finite Differences
//!
//! $$
//! \partial_i f(\mathbf{x})\approx\frac{f(\mathbf{x}+h\mathbf{e}_i)-f(\mathbf{x}-h\mathbf{e}_i)}{2h}
//! $$
//!
//! Central-difference gradients for objectives and constraints that do not
//! supply an analytic one.

use std::cell::RefCell;

use finitediff::FiniteDiff;

use crate::error::PortfolioError;
use crate::error::Result;

/// Central-difference gradient of a fallible function.
///
/// The first error raised by `f` while differencing is returned as-is; a
/// non-finite component is reported as a numeric edge case.
pub fn gradient<F>(x: &[f64], f: F) -> Result<Vec<f64>>
where
  F: Fn(&[f64]) -> Result<f64>,
{
  let closure_err: RefCell<Option<PortfolioError>> = RefCell::new(None);
  let point = x.to_vec();

  let grad = point.central_diff(&|p: &Vec<f64>| match f(p) {
    Ok(v) => v,
    Err(e) => {
      if closure_err.borrow().is_none() {
        closure_err.replace(Some(e));
      }
      f64::NAN
    }
  });

  if let Some(err) = closure_err.into_inner() {
    return Err(err);
  }

  if let Some(i) = grad.iter().position(|g| !g.is_finite()) {
    return Err(PortfolioError::NumericEdgeCase(format!(
      "non-finite gradient component {i} ({})",
      grad[i]
    )));
  }

  Ok(grad)
}

/// Central-difference gradient of an infallible function.
pub fn plain_gradient<F>(x: &[f64], f: F) -> Vec<f64>
where
  F: Fn(&[f64]) -> f64,
{
  x.to_vec().central_diff(&|p: &Vec<f64>| f(p))
}

//! # Errors
//!
//! Error taxonomy surfaced by [`crate::portfolio::PortfolioEngine::optimize`].

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PortfolioError>;

/// Every failure an optimisation can report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortfolioError {
  /// Malformed or insufficient price data.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// The requested optimisation mode is not in the catalog.
  #[error("unknown optimization mode '{mode}' (expected one of: {expected})")]
  UnknownMode { mode: String, expected: String },

  /// The solver ran out of iterations without satisfying its constraints.
  #[error(
    "solver did not converge for '{mode}' after {iterations} iterations \
     (constraint violation {violation:.3e}, min return {min_return})"
  )]
  Convergence {
    mode: String,
    iterations: usize,
    violation: f64,
    min_return: f64,
  },

  /// No long-only fully-invested allocation reaches the return floor.
  #[error(
    "minimum return {required} is unreachable for '{mode}': best single-asset \
     annualized return is {max_achievable}"
  )]
  Infeasible {
    mode: String,
    required: f64,
    max_achievable: f64,
  },

  /// A metric or objective is undefined at the point being evaluated.
  #[error("numeric edge case: {0}")]
  NumericEdgeCase(String),
}

impl PortfolioError {
  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    Self::InvalidInput(msg.into())
  }

  /// Attach the optimisation mode and return floor to errors raised below the facade.
  pub(crate) fn with_context(self, label: &str, min_return: f64) -> Self {
    match self {
      Self::Convergence {
        iterations,
        violation,
        ..
      } => Self::Convergence {
        mode: label.to_string(),
        iterations,
        violation,
        min_return,
      },
      Self::Infeasible {
        required,
        max_achievable,
        ..
      } => Self::Infeasible {
        mode: label.to_string(),
        required,
        max_achievable,
      },
      Self::NumericEdgeCase(msg) => Self::NumericEdgeCase(format!("{label}: {msg}")),
      other => other,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn with_context_fills_in_mode_and_floor() {
    let err = PortfolioError::Convergence {
      mode: String::new(),
      iterations: 100,
      violation: 1e-3,
      min_return: f64::NAN,
    }
    .with_context("min_var", 0.2);

    match err {
      PortfolioError::Convergence {
        mode,
        iterations,
        min_return,
        ..
      } => {
        assert_eq!(mode, "min_var");
        assert_eq!(iterations, 100);
        assert_eq!(min_return, 0.2);
      }
      other => panic!("unexpected error {other:?}"),
    }
  }

  #[test]
  fn messages_carry_context() {
    let err = PortfolioError::Infeasible {
      mode: "min_var".into(),
      required: 0.5,
      max_achievable: 0.12,
    };
    let msg = err.to_string();
    assert!(msg.contains("0.5"));
    assert!(msg.contains("0.12"));
  }
}

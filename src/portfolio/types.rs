//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\min_{\mathbf w\in\Delta,\ N\bar{\mathbf r}^\top\mathbf w\ge r_{\min}} f_{\text{mode}}(\mathbf w)
//! $$
//!
//! Optimization modes and result containers.

use std::fmt;
use std::str::FromStr;

use super::performance::PerformanceSnapshot;
use crate::error::PortfolioError;

/// Supported optimization objectives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptimizationMode {
  /// Maximize the Sharpe ratio.
  MaxSharpe,
  /// Minimize annualized variance.
  MinVariance,
  /// Minimize annualized mean absolute deviation.
  MinAbsoluteDeviation,
  /// Maximize the worst single-period return.
  Minimax,
}

impl OptimizationMode {
  pub const ALL: [OptimizationMode; 4] = [
    Self::MaxSharpe,
    Self::MinVariance,
    Self::MinAbsoluteDeviation,
    Self::Minimax,
  ];

  /// Catalog key of the mode.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::MaxSharpe => "max_sharpe",
      Self::MinVariance => "min_var",
      Self::MinAbsoluteDeviation => "min_abs_dev",
      Self::Minimax => "min_max",
    }
  }

  /// Whether the objective reads the covariance matrix.
  pub fn uses_covariance(&self) -> bool {
    matches!(self, Self::MaxSharpe | Self::MinVariance)
  }

  fn catalog() -> String {
    Self::ALL
      .iter()
      .map(|m| m.as_str())
      .collect::<Vec<_>>()
      .join(", ")
  }
}

impl fmt::Display for OptimizationMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OptimizationMode {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "max_sharpe" => Ok(Self::MaxSharpe),
      "min_var" => Ok(Self::MinVariance),
      "min_abs_dev" => Ok(Self::MinAbsoluteDeviation),
      "min_max" | "minimax" => Ok(Self::Minimax),
      _ => Err(PortfolioError::UnknownMode {
        mode: s.to_string(),
        expected: Self::catalog(),
      }),
    }
  }
}

/// Output of one optimization run.
#[derive(Clone, Debug)]
pub struct OptimizationResult {
  pub mode: OptimizationMode,
  /// Asset names, aligned with `weights`.
  pub assets: Vec<String>,
  /// Long-only weights summing to one.
  pub weights: Vec<f64>,
  /// Metrics recomputed at `weights`.
  pub performance: PerformanceSnapshot,
  /// Objective value at `weights`.
  pub objective: f64,
  pub iterations: usize,
  /// `false` when the solver stopped on its iteration cap or a stalled line
  /// search; the weights are still feasible.
  pub converged: bool,
}

impl OptimizationResult {
  /// `(asset, weight)` pairs in asset order.
  pub fn allocation(&self) -> Vec<(&str, f64)> {
    self
      .assets
      .iter()
      .map(String::as_str)
      .zip(self.weights.iter().copied())
      .collect()
  }
}

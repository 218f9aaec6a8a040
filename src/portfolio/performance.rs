//! # Portfolio Performance
//!
//! $$
//! R_p=N\,\bar{\mathbf r}^\top\mathbf w,\qquad
//! \sigma_p=\sqrt{N\,\mathbf w^\top\Sigma\mathbf w},\qquad
//! S=\frac{R_p-r_f}{\sigma_p}
//! $$
//!
//! Annualized metrics of a weight vector over a fixed set of return statistics.

use ndarray::Array1;
use ndarray::ArrayView1;

use super::data::ReturnStatistics;
use crate::error::PortfolioError;
use crate::error::Result;

/// Volatility at or below this is treated as zero when forming the Sharpe ratio.
pub(super) const ZERO_VOLATILITY: f64 = 1e-15;

/// Metrics of one weight vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerformanceSnapshot {
  pub annual_return: f64,
  pub annual_volatility: f64,
  /// Mean absolute deviation of the period returns, annualized.
  pub annual_abs_deviation: f64,
  /// Worst single-period return. Not annualized.
  pub min_return: f64,
  /// `None` when the volatility is zero.
  pub sharpe: Option<f64>,
}

impl PerformanceSnapshot {
  pub fn annual_variance(&self) -> f64 {
    self.annual_volatility * self.annual_volatility
  }
}

/// Pure metric functions of weights, borrowing the statistics they read.
#[derive(Clone, Copy, Debug)]
pub struct PerformanceEvaluator<'a> {
  stats: &'a ReturnStatistics,
  risk_free_rate: f64,
  periods_per_year: f64,
}

impl<'a> PerformanceEvaluator<'a> {
  pub fn new(stats: &'a ReturnStatistics, risk_free_rate: f64, periods_per_year: f64) -> Self {
    Self {
      stats,
      risk_free_rate,
      periods_per_year,
    }
  }

  pub fn statistics(&self) -> &'a ReturnStatistics {
    self.stats
  }

  pub fn risk_free_rate(&self) -> f64 {
    self.risk_free_rate
  }

  pub fn periods_per_year(&self) -> f64 {
    self.periods_per_year
  }

  /// Fail unless `weights` has one entry per asset.
  pub fn check_weights(&self, weights: &[f64]) -> Result<()> {
    if weights.len() != self.stats.num_assets() {
      return Err(PortfolioError::invalid(format!(
        "expected {} weights, got {}",
        self.stats.num_assets(),
        weights.len()
      )));
    }
    Ok(())
  }

  /// Per-period portfolio returns, undefined cells counted as zero.
  pub fn daily_returns(&self, weights: &[f64]) -> Array1<f64> {
    self.stats.filled_returns().dot(&ArrayView1::from(weights))
  }

  pub fn annual_return(&self, weights: &[f64]) -> f64 {
    self.stats.mean_returns().dot(&ArrayView1::from(weights)) * self.periods_per_year
  }

  /// Per-period variance `wᵀΣw`, floored at zero.
  pub fn period_variance(&self, weights: &[f64]) -> f64 {
    let w = ArrayView1::from(weights);
    w.dot(&self.stats.covariance().dot(&w)).max(0.0)
  }

  pub fn annual_volatility(&self, weights: &[f64]) -> f64 {
    (self.period_variance(weights) * self.periods_per_year).sqrt()
  }

  pub fn annual_abs_deviation(&self, weights: &[f64]) -> f64 {
    abs_deviation(&self.daily_returns(weights)) * self.periods_per_year
  }

  pub fn min_return(&self, weights: &[f64]) -> f64 {
    self
      .daily_returns(weights)
      .iter()
      .copied()
      .fold(f64::INFINITY, f64::min)
  }

  pub fn sharpe(&self, weights: &[f64]) -> Option<f64> {
    sharpe_ratio(
      self.annual_return(weights),
      self.annual_volatility(weights),
      self.risk_free_rate,
    )
  }

  /// Full snapshot for `weights`. Weights are used as given, unnormalized.
  pub fn evaluate(&self, weights: &[f64]) -> Result<PerformanceSnapshot> {
    self.check_weights(weights)?;

    let daily = self.daily_returns(weights);
    let annual_return = self.annual_return(weights);
    let annual_volatility = self.annual_volatility(weights);

    Ok(PerformanceSnapshot {
      annual_return,
      annual_volatility,
      annual_abs_deviation: abs_deviation(&daily) * self.periods_per_year,
      min_return: daily.iter().copied().fold(f64::INFINITY, f64::min),
      sharpe: sharpe_ratio(annual_return, annual_volatility, self.risk_free_rate),
    })
  }
}

fn abs_deviation(xs: &Array1<f64>) -> f64 {
  let Some(mean) = xs.mean() else {
    return 0.0;
  };
  xs.iter().map(|x| (x - mean).abs()).sum::<f64>() / xs.len() as f64
}

fn sharpe_ratio(annual_return: f64, annual_volatility: f64, risk_free_rate: f64) -> Option<f64> {
  if annual_volatility <= ZERO_VOLATILITY {
    None
  } else {
    Some((annual_return - risk_free_rate) / annual_volatility)
  }
}

//! # Objective Catalog
//!
//! $$
//! f_{\text{sharpe}}=-S(\mathbf w),\quad f_{\text{var}}=\sigma_p^2,\quad
//! f_{\text{mad}}=N\cdot\operatorname{MAD}(R\mathbf w),\quad f_{\text{minimax}}=-\min_t (R\mathbf w)_t
//! $$
//!
//! Scalar objectives for each optimization mode, all posed for minimization.

use ndarray::ArrayView1;

use super::performance::PerformanceEvaluator;
use super::performance::ZERO_VOLATILITY;
use super::types::OptimizationMode;
use crate::error::PortfolioError;
use crate::error::Result;
pub use crate::optimize::ScalarObjective;

/// Negative Sharpe ratio.
#[derive(Clone, Copy, Debug)]
pub struct MaxSharpe<'a> {
  eval: PerformanceEvaluator<'a>,
}

impl<'a> MaxSharpe<'a> {
  pub fn new(eval: PerformanceEvaluator<'a>) -> Self {
    Self { eval }
  }
}

impl ScalarObjective for MaxSharpe<'_> {
  fn value(&self, weights: &[f64]) -> Result<f64> {
    self.eval.check_weights(weights)?;
    self
      .eval
      .sharpe(weights)
      .map(|s| -s)
      .ok_or_else(|| PortfolioError::NumericEdgeCase("Sharpe ratio undefined at zero volatility".into()))
  }

  fn gradient(&self, weights: &[f64]) -> Result<Vec<f64>> {
    self.eval.check_weights(weights)?;
    let n = self.eval.periods_per_year();
    let stats = self.eval.statistics();
    let w = ArrayView1::from(weights);

    let vol = self.eval.annual_volatility(weights);
    if vol <= ZERO_VOLATILITY {
      return Err(PortfolioError::NumericEdgeCase(
        "Sharpe ratio undefined at zero volatility".into(),
      ));
    }
    let excess = self.eval.annual_return(weights) - self.eval.risk_free_rate();
    let sigma_w = stats.covariance().dot(&w);

    // dS/dw = N mu / vol - excess * N Sigma w / vol^3
    Ok(
      stats
        .mean_returns()
        .iter()
        .zip(sigma_w.iter())
        .map(|(mu, sw)| -(n * mu / vol - excess * n * sw / vol.powi(3)))
        .collect(),
    )
  }
}

/// Annualized variance.
#[derive(Clone, Copy, Debug)]
pub struct MinVariance<'a> {
  eval: PerformanceEvaluator<'a>,
}

impl<'a> MinVariance<'a> {
  pub fn new(eval: PerformanceEvaluator<'a>) -> Self {
    Self { eval }
  }
}

impl ScalarObjective for MinVariance<'_> {
  fn value(&self, weights: &[f64]) -> Result<f64> {
    self.eval.check_weights(weights)?;
    Ok(self.eval.period_variance(weights) * self.eval.periods_per_year())
  }

  fn gradient(&self, weights: &[f64]) -> Result<Vec<f64>> {
    self.eval.check_weights(weights)?;
    let n = self.eval.periods_per_year();
    let sigma_w = self
      .eval
      .statistics()
      .covariance()
      .dot(&ArrayView1::from(weights));
    Ok(sigma_w.iter().map(|v| 2.0 * n * v).collect())
  }
}

/// Annualized mean absolute deviation. Non-smooth, so the gradient is numerical.
#[derive(Clone, Copy, Debug)]
pub struct MinAbsoluteDeviation<'a> {
  eval: PerformanceEvaluator<'a>,
}

impl<'a> MinAbsoluteDeviation<'a> {
  pub fn new(eval: PerformanceEvaluator<'a>) -> Self {
    Self { eval }
  }
}

impl ScalarObjective for MinAbsoluteDeviation<'_> {
  fn value(&self, weights: &[f64]) -> Result<f64> {
    self.eval.check_weights(weights)?;
    Ok(self.eval.annual_abs_deviation(weights))
  }
}

/// Negative worst single-period return.
#[derive(Clone, Copy, Debug)]
pub struct Minimax<'a> {
  eval: PerformanceEvaluator<'a>,
}

impl<'a> Minimax<'a> {
  pub fn new(eval: PerformanceEvaluator<'a>) -> Self {
    Self { eval }
  }
}

impl ScalarObjective for Minimax<'_> {
  fn value(&self, weights: &[f64]) -> Result<f64> {
    self.eval.check_weights(weights)?;
    Ok(-self.eval.min_return(weights))
  }
}

/// The objective selected by an [`OptimizationMode`].
#[derive(Clone, Copy, Debug)]
pub enum Objective<'a> {
  MaxSharpe(MaxSharpe<'a>),
  MinVariance(MinVariance<'a>),
  MinAbsoluteDeviation(MinAbsoluteDeviation<'a>),
  Minimax(Minimax<'a>),
}

impl<'a> Objective<'a> {
  pub fn for_mode(mode: OptimizationMode, eval: PerformanceEvaluator<'a>) -> Self {
    match mode {
      OptimizationMode::MaxSharpe => Self::MaxSharpe(MaxSharpe::new(eval)),
      OptimizationMode::MinVariance => Self::MinVariance(MinVariance::new(eval)),
      OptimizationMode::MinAbsoluteDeviation => {
        Self::MinAbsoluteDeviation(MinAbsoluteDeviation::new(eval))
      }
      OptimizationMode::Minimax => Self::Minimax(Minimax::new(eval)),
    }
  }
}

impl ScalarObjective for Objective<'_> {
  fn value(&self, weights: &[f64]) -> Result<f64> {
    match self {
      Self::MaxSharpe(o) => o.value(weights),
      Self::MinVariance(o) => o.value(weights),
      Self::MinAbsoluteDeviation(o) => o.value(weights),
      Self::Minimax(o) => o.value(weights),
    }
  }

  fn gradient(&self, weights: &[f64]) -> Result<Vec<f64>> {
    match self {
      Self::MaxSharpe(o) => o.gradient(weights),
      Self::MinVariance(o) => o.gradient(weights),
      Self::MinAbsoluteDeviation(o) => o.gradient(weights),
      Self::Minimax(o) => o.gradient(weights),
    }
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::NaiveDate;
  use ndarray::array;

  use super::*;
  use crate::optimize::finite_diff;
  use crate::portfolio::data::PriceMatrix;
  use crate::portfolio::data::ReturnStatistics;

  fn stats() -> ReturnStatistics {
    let start = NaiveDate::from_ymd_opt(2019, 6, 3).unwrap();
    let dates = (0..6).map(|i| start + chrono::Days::new(i)).collect();
    let prices = array![
      [100.0, 40.0, 10.0],
      [101.0, 39.0, 10.4],
      [99.5, 40.5, 10.1],
      [102.0, 41.0, 9.8],
      [103.5, 40.2, 10.3],
      [103.0, 41.5, 10.6]
    ];
    let assets = vec!["X".into(), "Y".into(), "Z".into()];
    ReturnStatistics::from_prices(&PriceMatrix::new(dates, assets, prices).unwrap()).unwrap()
  }

  #[test]
  fn objectives_match_the_evaluator() {
    let stats = stats();
    let eval = PerformanceEvaluator::new(&stats, 0.02, 252.0);
    let w = [0.3, 0.3, 0.4];
    let snap = eval.evaluate(&w).unwrap();

    let sharpe = Objective::for_mode(OptimizationMode::MaxSharpe, eval);
    assert_abs_diff_eq!(sharpe.value(&w).unwrap(), -snap.sharpe.unwrap(), epsilon = 1e-12);

    let var = Objective::for_mode(OptimizationMode::MinVariance, eval);
    assert_abs_diff_eq!(var.value(&w).unwrap(), snap.annual_variance(), epsilon = 1e-12);

    let mad = Objective::for_mode(OptimizationMode::MinAbsoluteDeviation, eval);
    assert_abs_diff_eq!(mad.value(&w).unwrap(), snap.annual_abs_deviation, epsilon = 1e-12);

    let minimax = Objective::for_mode(OptimizationMode::Minimax, eval);
    assert_abs_diff_eq!(minimax.value(&w).unwrap(), -snap.min_return, epsilon = 1e-12);
  }

  #[test]
  fn analytic_gradients_agree_with_finite_differences() {
    let stats = stats();
    let eval = PerformanceEvaluator::new(&stats, 0.01, 252.0);
    let w = [0.2, 0.5, 0.3];

    for mode in [OptimizationMode::MaxSharpe, OptimizationMode::MinVariance] {
      let obj = Objective::for_mode(mode, eval);
      let analytic = obj.gradient(&w).unwrap();
      let numeric = finite_diff::gradient(&w, |x| obj.value(x)).unwrap();

      for (a, b) in analytic.iter().zip(&numeric) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-5 * (1.0 + b.abs()));
      }
    }
  }

  #[test]
  fn sharpe_fails_at_zero_volatility() {
    let start = NaiveDate::from_ymd_opt(2019, 6, 3).unwrap();
    let dates = (0..3).map(|i| start + chrono::Days::new(i)).collect();
    let prices = array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]];
    let flat = ReturnStatistics::from_prices(
      &PriceMatrix::new(dates, vec!["A".into(), "B".into()], prices).unwrap(),
    )
    .unwrap();
    let obj = MaxSharpe::new(PerformanceEvaluator::new(&flat, 0.0, 252.0));

    assert!(matches!(
      obj.value(&[0.5, 0.5]),
      Err(PortfolioError::NumericEdgeCase(_))
    ));
    assert!(obj.gradient(&[0.5, 0.5]).is_err());
  }
}

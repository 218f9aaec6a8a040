//! # Portfolio Data
//!
//! $$
//! r_{t,a}=\frac{p_{t,a}}{p_{t-1,a}}-1,\qquad
//! \Sigma_{ij}=\frac{1}{n_{ij}-1}\sum_{t\in T_{ij}}(r_{t,i}-\bar r_i)(r_{t,j}-\bar r_j)
//! $$
//!
//! Price history container and the return statistics derived from it.
//! Missing prices are `NaN`; they produce undefined (`NaN`) returns which the
//! mean and covariance skip and which count as zero in portfolio return series.

use chrono::NaiveDate;
use nalgebra::DMatrix;
use nalgebra::SymmetricEigen;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;

use crate::error::PortfolioError;
use crate::error::Result;

/// Eigenvalues at or below this fraction of the largest variance count as zero.
const SINGULAR_RATIO: f64 = 1e-12;

/// Dates × assets price table. `NaN` marks a missing price.
#[derive(Clone, Debug)]
pub struct PriceMatrix {
  dates: Vec<NaiveDate>,
  assets: Vec<String>,
  prices: Array2<f64>,
}

impl PriceMatrix {
  /// Validate and wrap a price table.
  ///
  /// Requires strictly increasing dates, at least two dates and two distinct
  /// asset names, and prices that are either `NaN` or finite and positive.
  pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, prices: Array2<f64>) -> Result<Self> {
    let (rows, cols) = prices.dim();

    if rows != dates.len() || cols != assets.len() {
      return Err(PortfolioError::invalid(format!(
        "price table is {rows}x{cols} but {} dates and {} assets were given",
        dates.len(),
        assets.len()
      )));
    }
    if cols < 2 {
      return Err(PortfolioError::invalid(format!(
        "at least 2 assets are required, got {cols}"
      )));
    }
    if rows < 2 {
      return Err(PortfolioError::invalid(format!(
        "at least 2 dates are required, got {rows}"
      )));
    }
    if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
      return Err(PortfolioError::invalid(format!(
        "dates must be strictly increasing ({} is followed by {})",
        w[0], w[1]
      )));
    }
    for (i, name) in assets.iter().enumerate() {
      if assets[..i].contains(name) {
        return Err(PortfolioError::invalid(format!("duplicate asset '{name}'")));
      }
    }
    if let Some(((t, a), p)) = prices
      .indexed_iter()
      .find(|(_, p)| !p.is_nan() && !(p.is_finite() && **p > 0.0))
    {
      return Err(PortfolioError::invalid(format!(
        "price of '{}' on {} must be positive and finite, got {p}",
        assets[a], dates[t]
      )));
    }

    Ok(Self {
      dates,
      assets,
      prices,
    })
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn prices(&self) -> ArrayView2<'_, f64> {
    self.prices.view()
  }

  pub fn num_dates(&self) -> usize {
    self.dates.len()
  }

  pub fn num_assets(&self) -> usize {
    self.assets.len()
  }

  /// Split into `[.., date]` and `[date, ..]`. A row dated exactly `date`
  /// lands in both halves.
  pub fn split_at(&self, date: NaiveDate) -> Result<(PriceMatrix, PriceMatrix)> {
    let head_end = self.dates.partition_point(|d| *d <= date);
    let tail_start = self.dates.partition_point(|d| *d < date);

    let head = self.slice_rows(0, head_end)?;
    let tail = self.slice_rows(tail_start, self.dates.len())?;
    Ok((head, tail))
  }

  fn slice_rows(&self, start: usize, end: usize) -> Result<PriceMatrix> {
    PriceMatrix::new(
      self.dates[start..end].to_vec(),
      self.assets.clone(),
      self.prices.slice(ndarray::s![start..end, ..]).to_owned(),
    )
  }

  /// Drop assets with fewer than `min_observations` defined prices.
  pub fn drop_sparse_assets(&self, min_observations: usize) -> Result<PriceMatrix> {
    let keep: Vec<usize> = (0..self.num_assets())
      .filter(|&a| {
        self
          .prices
          .column(a)
          .iter()
          .filter(|p| !p.is_nan())
          .count()
          >= min_observations
      })
      .collect();

    PriceMatrix::new(
      self.dates.clone(),
      keep.iter().map(|&a| self.assets[a].clone()).collect(),
      self.prices.select(Axis(1), &keep),
    )
  }
}

fn defined_mean(xs: ArrayView1<'_, f64>) -> Option<f64> {
  let (sum, count) = xs
    .iter()
    .filter(|x| !x.is_nan())
    .fold((0.0, 0usize), |(s, c), x| (s + x, c + 1));
  if count == 0 {
    None
  } else {
    Some(sum / count as f64)
  }
}

/// Sample covariance over the periods where both series are defined.
fn pairwise_covariance(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> f64 {
  let pairs: Vec<(f64, f64)> = x
    .iter()
    .zip(y.iter())
    .filter(|(a, b)| !a.is_nan() && !b.is_nan())
    .map(|(a, b)| (*a, *b))
    .collect();

  let n = pairs.len();
  if n < 2 {
    return 0.0;
  }

  let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
  let my = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;
  let acc: f64 = pairs.iter().map(|(a, b)| (a - mx) * (b - my)).sum();
  acc / (n - 1) as f64
}

/// Periodic returns, mean-return vector and covariance matrix of a [`PriceMatrix`].
#[derive(Clone, Debug)]
pub struct ReturnStatistics {
  assets: Vec<String>,
  returns: Array2<f64>,
  filled_returns: Array2<f64>,
  mean_returns: Array1<f64>,
  covariance: Array2<f64>,
}

impl ReturnStatistics {
  /// Derive simple returns and their statistics. The input is not modified.
  pub fn from_prices(prices: &PriceMatrix) -> Result<Self> {
    let p = prices.prices();
    let (rows, cols) = p.dim();

    for (a, name) in prices.assets().iter().enumerate() {
      if p.column(a).iter().all(|v| v.is_nan()) {
        return Err(PortfolioError::invalid(format!(
          "asset '{name}' has no numeric prices"
        )));
      }
    }

    // NaN on either side propagates, which is exactly the undefined-return rule.
    let returns = Array2::from_shape_fn((rows - 1, cols), |(t, a)| p[[t + 1, a]] / p[[t, a]] - 1.0);
    let filled_returns = returns.mapv(|r| if r.is_nan() { 0.0 } else { r });

    let mut mean_returns = Array1::zeros(cols);
    for (a, name) in prices.assets().iter().enumerate() {
      mean_returns[a] = defined_mean(returns.column(a)).ok_or_else(|| {
        PortfolioError::invalid(format!(
          "asset '{name}' has no two consecutive prices to form a return"
        ))
      })?;
    }

    let mut covariance = Array2::zeros((cols, cols));
    for i in 0..cols {
      for j in i..cols {
        let c = pairwise_covariance(returns.column(i), returns.column(j));
        covariance[[i, j]] = c;
        covariance[[j, i]] = c;
      }
    }

    Ok(Self {
      assets: prices.assets().to_vec(),
      returns,
      filled_returns,
      mean_returns,
      covariance,
    })
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn num_assets(&self) -> usize {
    self.assets.len()
  }

  pub fn num_periods(&self) -> usize {
    self.returns.nrows()
  }

  /// Returns with undefined cells left as `NaN`.
  pub fn returns(&self) -> ArrayView2<'_, f64> {
    self.returns.view()
  }

  /// Returns with undefined cells replaced by zero.
  pub fn filled_returns(&self) -> ArrayView2<'_, f64> {
    self.filled_returns.view()
  }

  pub fn mean_returns(&self) -> &Array1<f64> {
    &self.mean_returns
  }

  pub fn covariance(&self) -> &Array2<f64> {
    &self.covariance
  }

  /// Smallest eigenvalue of the covariance matrix.
  pub fn min_covariance_eigenvalue(&self) -> f64 {
    let n = self.num_assets();
    let m = DMatrix::from_fn(n, n, |i, j| self.covariance[[i, j]]);
    SymmetricEigen::new(m)
      .eigenvalues
      .iter()
      .copied()
      .fold(f64::INFINITY, f64::min)
  }

  /// Fail when the covariance matrix is not positive semi-definite beyond
  /// round-off, which can happen with pairwise-complete estimates.
  pub fn ensure_positive_semidefinite(&self) -> Result<()> {
    let scale = self
      .covariance
      .diag()
      .iter()
      .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let min_eig = self.min_covariance_eigenvalue();

    if min_eig < -1e-10 * scale.max(f64::MIN_POSITIVE) {
      return Err(PortfolioError::NumericEdgeCase(format!(
        "covariance matrix is not positive semi-definite (min eigenvalue {min_eig:.3e})"
      )));
    }
    Ok(())
  }

  /// Fail when some weight vector has (numerically) zero variance, i.e. the
  /// covariance matrix is singular relative to its largest diagonal entry.
  pub fn ensure_nonsingular_covariance(&self) -> Result<()> {
    let scale = self
      .covariance
      .diag()
      .iter()
      .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let min_eig = self.min_covariance_eigenvalue();

    if min_eig <= SINGULAR_RATIO * scale {
      return Err(PortfolioError::NumericEdgeCase(format!(
        "covariance matrix is singular (min eigenvalue {min_eig:.3e}), so some allocation has zero volatility"
      )));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use ndarray::s;

  use super::*;

  fn dates(n: usize) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    (0..n).map(|i| start + chrono::Days::new(i as u64)).collect()
  }

  fn names(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn simple_returns_mean_and_covariance() {
    let prices = PriceMatrix::new(
      dates(4),
      names(&["A", "B"]),
      array![[100.0, 50.0], [110.0, 45.0], [99.0, 54.0], [108.9, 54.0]],
    )
    .unwrap();
    let stats = ReturnStatistics::from_prices(&prices).unwrap();

    let r = stats.returns();
    assert_eq!(r.dim(), (3, 2));
    assert_abs_diff_eq!(r[[0, 0]], 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(r[[1, 0]], -0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(r[[2, 0]], 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(r[[1, 1]], 0.2, epsilon = 1e-12);

    let mean = stats.mean_returns();
    assert_abs_diff_eq!(mean[0], 0.1 / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(mean[1], (-0.1 + 0.2 + 0.0) / 3.0, epsilon = 1e-12);

    let cov = stats.covariance();
    let var_a = ((0.1 - 0.1 / 3.0_f64).powi(2) * 2.0 + (-0.1 - 0.1 / 3.0_f64).powi(2)) / 2.0;
    assert_abs_diff_eq!(cov[[0, 0]], var_a, epsilon = 1e-12);
    assert_eq!(cov[[0, 1]], cov[[1, 0]]);
  }

  #[test]
  fn missing_prices_yield_undefined_returns() {
    let prices = PriceMatrix::new(
      dates(4),
      names(&["A", "B"]),
      array![[100.0, 10.0], [f64::NAN, 11.0], [120.0, 12.1], [132.0, 12.1]],
    )
    .unwrap();
    let stats = ReturnStatistics::from_prices(&prices).unwrap();

    assert!(stats.returns()[[0, 0]].is_nan());
    assert!(stats.returns()[[1, 0]].is_nan());
    assert_eq!(stats.filled_returns()[[0, 0]], 0.0);
    // only the last return of A is defined
    assert_abs_diff_eq!(stats.mean_returns()[0], 0.1, epsilon = 1e-12);
    // a single defined observation has no variance
    assert_eq!(stats.covariance()[[0, 0]], 0.0);
  }

  #[test]
  fn rederiving_statistics_is_deterministic() {
    let prices = PriceMatrix::new(
      dates(5),
      names(&["A", "B", "C"]),
      array![
        [10.0, 20.0, 30.0],
        [10.5, 19.0, 30.3],
        [10.2, 19.5, 29.9],
        [10.8, 20.5, 30.6],
        [11.0, 20.1, 31.0]
      ],
    )
    .unwrap();
    let before = prices.prices().to_owned();

    let a = ReturnStatistics::from_prices(&prices).unwrap();
    let b = ReturnStatistics::from_prices(&prices).unwrap();

    assert_eq!(a.mean_returns(), b.mean_returns());
    assert_eq!(a.covariance(), b.covariance());
    assert_eq!(prices.prices(), before.view());
  }

  #[test]
  fn rejects_malformed_tables() {
    let one_asset = PriceMatrix::new(dates(3), names(&["A"]), array![[1.0], [2.0], [3.0]]);
    assert!(matches!(one_asset, Err(PortfolioError::InvalidInput(_))));

    let one_date = PriceMatrix::new(dates(1), names(&["A", "B"]), array![[1.0, 2.0]]);
    assert!(matches!(one_date, Err(PortfolioError::InvalidInput(_))));

    let mut unordered = dates(2);
    unordered.reverse();
    let bad_order = PriceMatrix::new(unordered, names(&["A", "B"]), array![[1.0, 2.0], [1.0, 2.0]]);
    assert!(matches!(bad_order, Err(PortfolioError::InvalidInput(_))));

    let negative = PriceMatrix::new(dates(2), names(&["A", "B"]), array![[1.0, -2.0], [1.0, 2.0]]);
    assert!(matches!(negative, Err(PortfolioError::InvalidInput(_))));

    let empty_column = PriceMatrix::new(
      dates(3),
      names(&["A", "B"]),
      array![[1.0, f64::NAN], [1.1, f64::NAN], [1.2, f64::NAN]],
    )
    .unwrap();
    assert!(matches!(
      ReturnStatistics::from_prices(&empty_column),
      Err(PortfolioError::InvalidInput(_))
    ));
  }

  #[test]
  fn split_keeps_cutoff_on_both_sides() {
    let prices = PriceMatrix::new(
      dates(5),
      names(&["A", "B"]),
      array![[1.0, 2.0], [1.1, 2.1], [1.2, 2.2], [1.3, 2.3], [1.4, 2.4]],
    )
    .unwrap();
    let cutoff = prices.dates()[2];

    let (train, test) = prices.split_at(cutoff).unwrap();

    assert_eq!(train.num_dates(), 3);
    assert_eq!(test.num_dates(), 3);
    assert_eq!(train.dates().last(), Some(&cutoff));
    assert_eq!(test.dates().first(), Some(&cutoff));
  }

  #[test]
  fn drops_assets_with_short_history() {
    let prices = PriceMatrix::new(
      dates(4),
      names(&["A", "B", "C"]),
      array![
        [1.0, f64::NAN, 3.0],
        [1.1, f64::NAN, 3.1],
        [1.2, 2.0, 3.2],
        [1.3, 2.1, 3.3]
      ],
    )
    .unwrap();

    let kept = prices.drop_sparse_assets(3).unwrap();
    assert_eq!(kept.assets(), &["A".to_string(), "C".to_string()]);
    assert_eq!(kept.prices().column(1)[0], 3.0);

    assert!(matches!(
      prices.drop_sparse_assets(4).map(|p| p.num_assets()),
      Ok(2)
    ));
    assert!(matches!(
      prices.drop_sparse_assets(5),
      Err(PortfolioError::InvalidInput(_))
    ));
  }

  #[test]
  fn complete_data_covariance_is_positive_semidefinite() {
    let prices = PriceMatrix::new(
      dates(4),
      names(&["A", "B"]),
      array![[1.0, 2.0], [1.1, 2.2], [1.0, 2.0], [1.1, 2.1]],
    )
    .unwrap();
    let stats = ReturnStatistics::from_prices(&prices).unwrap();

    assert!(stats.ensure_positive_semidefinite().is_ok());
    assert!(stats.min_covariance_eigenvalue() > -1e-12);
  }

  #[test]
  fn duplicated_asset_makes_covariance_singular() {
    let prices = PriceMatrix::new(
      dates(5),
      names(&["A", "B", "A2"]),
      array![
        [10.0, 20.0, 10.0],
        [10.5, 19.0, 10.5],
        [10.2, 19.5, 10.2],
        [10.8, 20.5, 10.8],
        [11.0, 20.1, 11.0]
      ],
    )
    .unwrap();
    let stats = ReturnStatistics::from_prices(&prices).unwrap();

    assert!(stats.ensure_positive_semidefinite().is_ok());
    assert!(matches!(
      stats.ensure_nonsingular_covariance(),
      Err(PortfolioError::NumericEdgeCase(msg)) if msg.contains("zero volatility")
    ));

    let two = PriceMatrix::new(
      dates(5),
      names(&["A", "B"]),
      prices.prices().slice(s![.., 0..2]).to_owned(),
    )
    .unwrap();
    assert!(
      ReturnStatistics::from_prices(&two)
        .unwrap()
        .ensure_nonsingular_covariance()
        .is_ok()
    );
  }

  #[test]
  fn psd_check_flags_inconsistent_pairwise_covariance() {
    // A~B move together, A~C opposite, B~C together, each on disjoint periods.
    let nan = f64::NAN;
    let prices = PriceMatrix::new(
      dates(7),
      names(&["A", "B", "C"]),
      array![
        [100.0, 100.0, 100.0],
        [110.0, 110.0, nan],
        [99.0, 99.0, 100.0],
        [108.9, nan, 90.0],
        [98.01, 100.0, 99.0],
        [nan, 110.0, 108.9],
        [100.0, 99.0, 98.01]
      ],
    )
    .unwrap();
    let stats = ReturnStatistics::from_prices(&prices).unwrap();

    assert!(stats.min_covariance_eigenvalue() < 0.0);
    assert!(matches!(
      stats.ensure_positive_semidefinite(),
      Err(PortfolioError::NumericEdgeCase(_))
    ));
  }
}

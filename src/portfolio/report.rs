//! # Portfolio Report
//!
//! $$
//! \big(R_p,\ \sigma_p^2,\ \operatorname{MAD}_p,\ \min_t r_{p,t},\ S\big)
//! $$
//!
//! Tabular summaries of optimization results for terminal output.

use prettytable::Cell;
use prettytable::Row;
use prettytable::Table;
use prettytable::format;

use super::performance::PerformanceSnapshot;
use super::types::OptimizationResult;

fn fmt_sharpe(sharpe: Option<f64>) -> String {
  sharpe.map_or_else(|| "n/a".to_string(), |s| format!("{s:.4}"))
}

const METRICS: [&str; 5] = [
  "Annualized Return",
  "Annualized Variance",
  "Absolute Deviation",
  "Minimax",
  "Sharpe Ratio",
];

fn metric_values(p: &PerformanceSnapshot) -> [String; 5] {
  [
    format!("{:.4}", p.annual_return),
    format!("{:.4}", p.annual_variance()),
    format!("{:.4}", p.annual_abs_deviation),
    format!("{:.4}", p.min_return),
    fmt_sharpe(p.sharpe),
  ]
}

/// Metrics of `result` followed by its allocation rounded to 3 decimals.
pub fn summary_table(result: &OptimizationResult) -> Table {
  let mut table = Table::new();
  table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
  table.set_titles(Row::new(vec![
    Cell::new(result.mode.as_str()),
    Cell::new("Value"),
  ]));

  for (name, value) in METRICS.iter().zip(metric_values(&result.performance)) {
    table.add_row(Row::new(vec![Cell::new(name), Cell::new(&value)]));
  }
  for (asset, weight) in result.allocation() {
    table.add_row(Row::new(vec![
      Cell::new(asset),
      Cell::new(&format!("{weight:.3}")),
    ]));
  }

  table
}

/// Side-by-side metrics, one column per labelled snapshot.
pub fn comparison_table(columns: &[(&str, &PerformanceSnapshot)]) -> Table {
  let mut table = Table::new();
  table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);

  let mut titles = vec![Cell::new("Metric")];
  titles.extend(columns.iter().map(|(label, _)| Cell::new(label)));
  table.set_titles(Row::new(titles));

  let per_column: Vec<_> = columns.iter().map(|(_, p)| metric_values(p)).collect();
  for (i, name) in METRICS.iter().enumerate() {
    let mut cells = vec![Cell::new(name)];
    cells.extend(per_column.iter().map(|values| Cell::new(&values[i])));
    table.add_row(Row::new(cells));
  }

  table
}

/// Weights of several results, one column per mode.
pub fn allocation_table(results: &[&OptimizationResult]) -> Table {
  let mut table = Table::new();
  table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);

  let mut titles = vec![Cell::new("Asset")];
  titles.extend(results.iter().map(|r| Cell::new(r.mode.as_str())));
  table.set_titles(Row::new(titles));

  let Some(first) = results.first() else {
    return table;
  };
  for (i, asset) in first.assets.iter().enumerate() {
    let mut cells = vec![Cell::new(asset)];
    cells.extend(results.iter().map(|r| {
      let w = r.weights.get(i).copied().unwrap_or(f64::NAN);
      Cell::new(&format!("{w:.3}"))
    }));
    table.add_row(Row::new(cells));
  }

  table
}

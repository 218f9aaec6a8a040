use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::bail;
use chrono::NaiveDate;
use clap::Parser;
use ndarray::Array2;
use portopt::OptimizationMode;
use portopt::OptimizationResult;
use portopt::PortfolioEngine;
use portopt::PortfolioEngineConfig;
use portopt::PriceMatrix;
use portopt::portfolio::report;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "portopt")]
#[command(about = "Optimize long-only portfolio allocations over a price history")]
struct Cli {
  /// CSV with a `date,<asset>,...` header; blank or non-numeric cells are missing
  #[arg(long)]
  prices: PathBuf,

  /// Minimum annualized return
  #[arg(long, default_value_t = 0.2)]
  min_return: f64,

  /// Optimization modes, comma separated or repeated
  #[arg(long = "mode", value_delimiter = ',', default_value = "min_var,min_abs_dev,min_max")]
  modes: Vec<String>,

  #[arg(long, default_value_t = 0.0)]
  risk_free: f64,

  #[arg(long, default_value_t = 252.0)]
  periods_per_year: f64,

  /// Optimize on prices up to this date and evaluate on prices from it (YYYY-MM-DD)
  #[arg(long)]
  split_date: Option<NaiveDate>,

  /// Drop assets with fewer defined prices than this
  #[arg(long)]
  min_observations: Option<usize>,
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();
  let modes = cli
    .modes
    .iter()
    .map(|m| m.parse::<OptimizationMode>())
    .collect::<Result<Vec<_>, _>>()?;

  let file = File::open(&cli.prices).with_context(|| format!("opening {}", cli.prices.display()))?;
  let mut prices = read_prices(BufReader::new(file))
    .with_context(|| format!("reading {}", cli.prices.display()))?;

  if let Some(min_obs) = cli.min_observations {
    let before = prices.num_assets();
    prices = prices.drop_sparse_assets(min_obs)?;
    info!(dropped = before - prices.num_assets(), min_obs, "filtered short histories");
  }

  let config = PortfolioEngineConfig {
    risk_free_rate: cli.risk_free,
    periods_per_year: cli.periods_per_year,
    ..PortfolioEngineConfig::default()
  };

  let (train, test) = match cli.split_date {
    Some(date) => {
      let (train, test) = prices.split_at(date)?;
      (train, Some(test))
    }
    None => (prices, None),
  };

  let engine = PortfolioEngine::new(&train, config.clone())?;
  let test_engine = test
    .as_ref()
    .map(|t| PortfolioEngine::new(t, config.clone()))
    .transpose()?;

  let mut solved: Vec<OptimizationResult> = Vec::new();
  for (mode, outcome) in modes.iter().zip(engine.optimize_many(&modes, cli.min_return)) {
    match outcome {
      Ok(result) => solved.push(result),
      Err(err) => warn!(%mode, %err, "optimization failed"),
    }
  }

  for result in &solved {
    println!();
    report::summary_table(result).printstd();

    if let Some(test_engine) = &test_engine {
      let out_of_sample = test_engine.evaluate(&result.weights)?;
      println!();
      report::comparison_table(&[
        ("train", &result.performance),
        ("test", &out_of_sample),
      ])
      .printstd();
    }
  }

  if solved.is_empty() {
    bail!("no optimization mode succeeded");
  }
  if solved.len() > 1 {
    println!();
    report::allocation_table(&solved.iter().collect::<Vec<_>>()).printstd();
  }

  Ok(())
}

fn read_prices<R: BufRead>(reader: R) -> anyhow::Result<PriceMatrix> {
  let mut lines = reader.lines();
  let header = lines.next().context("empty price file")??;
  let assets: Vec<String> = header
    .split(',')
    .skip(1)
    .map(|s| s.trim().to_string())
    .collect();

  let mut dates = Vec::new();
  let mut values = Vec::new();

  for (i, line) in lines.enumerate() {
    let line = line?;
    if line.trim().is_empty() {
      continue;
    }

    let mut cells = line.split(',');
    let date_cell = cells.next().unwrap_or_default().trim();
    let date = NaiveDate::parse_from_str(date_cell, "%Y-%m-%d")
      .with_context(|| format!("line {}: bad date '{date_cell}'", i + 2))?;

    let row: Vec<f64> = cells
      .map(|c| c.trim().parse::<f64>().unwrap_or(f64::NAN))
      .collect();
    if row.len() != assets.len() {
      bail!("line {}: expected {} prices, found {}", i + 2, assets.len(), row.len());
    }

    dates.push(date);
    values.extend(row);
  }

  let prices = Array2::from_shape_vec((dates.len(), assets.len()), values)?;
  Ok(PriceMatrix::new(dates, assets, prices)?)
}

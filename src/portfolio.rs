//! # Portfolio
//!
//! $$
//! \min_{\mathbf w\ge0,\ \mathbf 1^\top\mathbf w=1} f(\mathbf w)\quad\text{s.t.}\quad N\bar{\mathbf r}^\top\mathbf w\ge r_{\min}
//! $$
//!
//! Historical return statistics, performance metrics and the allocation engine.

pub mod data;
pub mod engine;
pub mod objectives;
pub mod performance;
pub mod report;
pub mod types;

pub use data::PriceMatrix;
pub use data::ReturnStatistics;
pub use engine::solve_allocation;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use objectives::MaxSharpe;
pub use objectives::MinAbsoluteDeviation;
pub use objectives::MinVariance;
pub use objectives::Minimax;
pub use objectives::Objective;
pub use performance::PerformanceEvaluator;
pub use performance::PerformanceSnapshot;
pub use types::OptimizationMode;
pub use types::OptimizationResult;

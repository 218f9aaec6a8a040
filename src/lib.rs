//! # portopt
//!
//! $$
//! \mathbf{w}^\*=\arg\min_{\mathbf w\in\Delta} f_{\text{mode}}(\mathbf w)
//! $$
//!
//! Long-only portfolio allocation over a historical price series, solved with
//! a sequential quadratic programming method.

pub mod error;
pub mod optimize;
pub mod portfolio;

pub use error::PortfolioError;
pub use error::Result;
pub use portfolio::OptimizationMode;
pub use portfolio::OptimizationResult;
pub use portfolio::PerformanceSnapshot;
pub use portfolio::PortfolioEngine;
pub use portfolio::PortfolioEngineConfig;
pub use portfolio::PriceMatrix;

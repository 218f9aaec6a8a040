//! # Optimize
//!
//! $$
//! \min_{\mathbf{l}\le\mathbf{x}\le\mathbf{u}} f(\mathbf{x})\quad\text{s.t.}\quad c_E(\mathbf{x})=0,\ c_I(\mathbf{x})\ge0
//! $$
//!
//! Constrained nonlinear programming: the solver interface and its
//! implementations.

pub mod finite_diff;
pub mod penalty;
pub mod problem;
pub mod qp;
pub mod sqp;

pub use penalty::PenaltyNelderMead;
pub use problem::Bounds;
pub use problem::ConstrainedProblem;
pub use problem::ConstrainedSolver;
pub use problem::Constraint;
pub use problem::ConstraintKind;
pub use problem::LinearConstraint;
pub use problem::ScalarObjective;
pub use problem::SolverOptions;
pub use problem::SolverOutcome;
pub use problem::Termination;
pub use sqp::SqpSolver;

//! quadnmpc planner
//!
//! Nonlinear model predictive control for flying vehicles.
//!
//! # Architecture
//!
//! At every control tick the controller solves a finite-horizon optimal
//! control problem by direct multiple shooting:
//!
//! ```text
//! minimize    Σₖ ‖xₖ₊₁ − rₖ‖²_Q + ‖uₖ − u_hover‖²_R
//! subject to  x₀ = x_cur
//!             xₖ₊₁ = F(xₖ, uₖ)          (RK4, M sub-steps)
//!             u_min ≤ uₖ ≤ u_max
//! ```
//!
//! applies the first control and warm-starts the next solve with the
//! shifted solution.
//!
//! # Components
//!
//! - [`config`]: Controller configuration (TOML)
//! - [`ocp`]: Decision layout, parameter packing, cost and constraints
//! - [`solver`]: NLP backend trait and the SQP/Clarabel implementation
//! - [`trajectory`]: Predicted trajectories and the warm-start cache
//! - [`controller`]: The NMPC controller
//! - [`executor`]: Receding-horizon loop against a [`Vehicle`]
//! - [`reference`]: Hover and moving-gate reference sources
//! - [`integration`]: quadnmpc-core simulator as a [`Vehicle`]

pub mod config;
pub mod error;
pub mod ocp;
pub mod solver;
pub mod trajectory;
pub mod controller;
pub mod executor;
pub mod reference;
pub mod integration;

// Re-exports
pub use config::{CostWeights, FailurePolicy, HorizonConfig, MpcConfig, SolverConfig};
pub use controller::{MpcSolution, NmpcController};
pub use error::{ConfigurationError, MpcError, OptimizationFailure};
pub use executor::{
    ExecutionReport, ExecutorError, RecedingHorizonExecutor, ReferenceSource, Termination, TickRecord,
    Vehicle, VehicleStep,
};
pub use ocp::{DecisionLayout, NlpBuilder, NlpProblem, REFERENCE_AUX};
pub use reference::{GateMotion, HoverReference, MovingGate};
pub use solver::{NlpBackend, NlpSolution, SolveStatistics, SqpSolver};
pub use trajectory::{BoundViolation, PredictedTrajectory, WarmStart};

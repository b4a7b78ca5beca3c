//! Ground-truth vehicle simulation
//!
//! Advances any [`Dynamics`](crate::dynamics::Dynamics) model with a finer
//! integration step than the optimizer uses and reports whether the
//! vehicle is still inside its flight envelope.

pub mod simulator;
pub mod config;

pub use simulator::*;
pub use config::*;

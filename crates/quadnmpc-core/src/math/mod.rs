//! Mathematical utilities
//!
//! Quaternion kinematics, Euler-angle rotations and fixed-step
//! Runge-Kutta integrators.

pub mod quaternion;
pub mod rotation;
pub mod integrator;

pub use quaternion::*;
pub use rotation::*;
pub use integrator::*;

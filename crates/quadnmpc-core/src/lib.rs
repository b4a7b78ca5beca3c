//! # quadnmpc core
//!
//! Vehicle models and numerics shared by the NMPC planner.
//!
//! ## Modules
//!
//! - [`math`]: RK4 integrators, quaternion kinematics, Euler rotations
//! - [`dynamics`]: Continuous-time vehicle models and their discrete transition maps
//! - [`simulation`]: Ground-truth vehicle simulator

pub mod math;
pub mod dynamics;
pub mod simulation;

use nalgebra::{DMatrix, DVector, Vector3};

/// Dynamically sized state / control vector
pub type VecX = DVector<f64>;

/// Dynamically sized matrix
pub type MatX = DMatrix<f64>;

/// 3D vector type
pub type Vec3 = Vector3<f64>;

/// Gravity constant [m/s²]
pub const GRAVITY: f64 = 9.81;

//! Physical constants shared by the vehicle models

use serde::{Deserialize, Serialize};

use crate::GRAVITY;

/// Immutable physical constants handed to a model at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalConstants {
    /// Gravity magnitude [m/s²]
    pub gravity: f64,
    /// Vehicle mass [kg] (simplified quadrotor and fixed-wing)
    pub mass: f64,
    /// Normalized thrust command → newtons: `thrust·scale + offset`
    pub thrust_scale: f64,
    pub thrust_offset: f64,
    /// Neutral value of a normalized body-rate command
    pub rate_offset: f64,
    /// Fixed-wing lift coefficient [N·s²/m²]
    pub lift_coefficient: f64,
    /// Fixed-wing drag coefficient [N·s²/m²]
    pub drag_coefficient: f64,
    /// Fixed-wing pitch-rate response time constant [s]
    pub pitch_time_constant: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            gravity: GRAVITY,
            mass: 0.5,
            // thrust·10 − 5 + 7
            thrust_scale: 10.0,
            thrust_offset: 2.0,
            rate_offset: 0.5,
            lift_coefficient: 0.05,
            drag_coefficient: 0.01,
            pitch_time_constant: 0.2,
        }
    }
}

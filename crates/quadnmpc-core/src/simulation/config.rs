//! Simulation configuration

use serde::{Deserialize, Serialize};

use crate::dynamics::PhysicalConstants;

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Control period advanced by one [`step`](super::Simulator::step) [s]
    pub dt: f64,
    /// RK4 sub-steps per control period
    pub substeps: usize,
    /// Physical parameters of the simulated vehicle
    pub physics: PhysicalConstants,
    /// Stability envelope
    pub envelope: EnvelopeConfig,
    /// Initial state; `None` starts at the model's hover state
    pub initial_state: Option<Vec<f64>>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dt: 0.1,
            substeps: 20,
            physics: PhysicalConstants::default(),
            envelope: EnvelopeConfig::default(),
            initial_state: None,
        }
    }
}

/// Limits outside which the vehicle is reported unstable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Maximum distance of the position from the origin [m]
    pub max_position: f64,
    /// Maximum speed [m/s]
    pub max_speed: f64,
    /// Maximum tilt of the thrust axis [rad] (quaternion models only)
    pub max_tilt: f64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            max_position: 100.0,
            max_speed: 50.0,
            max_tilt: 1.5,
        }
    }
}

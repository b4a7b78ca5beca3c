//! Simplified quadrotor model
//!
//! State `[px, py, pz, roll, pitch, yaw, vx, vy, vz, p, q, r]`, control
//! `[thrust, ωx, ωy, ωz]` normalized to `[0, 1]`.
//!
//! The transition is a closed-form discrete update rather than an
//! integrated ODE:
//!
//! ```text
//! a  = R(roll, pitch, yaw) e₃ · (thrust·scale + offset) / m − g e₃
//! p' = p + ½ dt² a + ½ dt v
//! v' = v + dt a
//! ```
//!
//! Attitude and angular velocity pass through unchanged. Body-rate
//! commands have no effect on the state.

use nalgebra::Vector3;

use super::{ControlBounds, Dynamics, ModelVariant, PhysicalConstants};
use crate::math::thrust_direction_from_euler;
use crate::VecX;

pub const SIMPLE_STATE_DIM: usize = 12;
pub const SIMPLE_CONTROL_DIM: usize = 4;

/// Euler-attitude quadrotor with normalized commands
#[derive(Debug, Clone)]
pub struct SimplifiedQuadrotor {
    constants: PhysicalConstants,
}

impl SimplifiedQuadrotor {
    pub fn new(constants: PhysicalConstants) -> Self {
        Self { constants }
    }

    /// Normalized thrust command converted to newtons
    pub fn thrust_newtons(&self, command: f64) -> f64 {
        command * self.constants.thrust_scale + self.constants.thrust_offset
    }

    /// World-frame linear acceleration for the given state and command
    pub fn acceleration(&self, state: &VecX, control: &VecX) -> Vector3<f64> {
        let axis = thrust_direction_from_euler(state[3], state[4], state[5]);
        let specific = self.thrust_newtons(control[0]) / self.constants.mass;
        axis * specific - Vector3::new(0.0, 0.0, self.constants.gravity)
    }
}

impl Dynamics for SimplifiedQuadrotor {
    fn variant(&self) -> ModelVariant {
        ModelVariant::Simplified
    }

    fn state_dim(&self) -> usize {
        SIMPLE_STATE_DIM
    }

    fn control_dim(&self) -> usize {
        SIMPLE_CONTROL_DIM
    }

    /// Continuous counterpart of the closed-form step (angular part frozen)
    fn derivative(&self, state: &VecX, control: &VecX) -> VecX {
        let acc = self.acceleration(state, control);
        let mut xdot = VecX::zeros(SIMPLE_STATE_DIM);
        xdot[0] = state[6];
        xdot[1] = state[7];
        xdot[2] = state[8];
        xdot[6] = acc.x;
        xdot[7] = acc.y;
        xdot[8] = acc.z;
        xdot
    }

    fn closed_form_step(&self, state: &VecX, control: &VecX, dt: f64) -> Option<VecX> {
        let acc = self.acceleration(state, control);
        let mut next = state.clone();
        for i in 0..3 {
            let v = state[6 + i];
            next[i] = state[i] + 0.5 * dt * dt * acc[i] + 0.5 * dt * v;
            next[6 + i] = v + dt * acc[i];
        }
        Some(next)
    }

    fn hover_state(&self) -> VecX {
        VecX::zeros(SIMPLE_STATE_DIM)
    }

    fn hover_control(&self) -> VecX {
        let c = &self.constants;
        let thrust = (c.mass * c.gravity - c.thrust_offset) / c.thrust_scale;
        VecX::from_vec(vec![thrust, c.rate_offset, c.rate_offset, c.rate_offset])
    }

    fn control_bounds(&self) -> ControlBounds {
        ControlBounds::new(vec![0.0; 4], vec![1.0; 4])
    }
}

//! Full quadrotor model
//!
//! State `[px, py, pz, qw, qx, qy, qz, vx, vy, vz]`, control
//! `[T, ωx, ωy, ωz]` with `T` the mass-normalized collective thrust:
//!
//! ```text
//! ṗ = v
//! q̇ = ½ q ⊗ [0; ω]
//! v̇ = T · R(q) e₃ − g e₃
//! ```
//!
//! The quaternion is integrated as four free components. Its norm is not
//! constrained, so the rotation term scales with ‖q‖² away from unit norm.

use std::ops::Range;

use nalgebra::{Vector3, Vector4};

use super::{ControlBounds, Dynamics, ModelVariant, PhysicalConstants};
use crate::math::{body_z_axis, quaternion_derivative};
use crate::VecX;

pub const FULL_STATE_DIM: usize = 10;
pub const FULL_CONTROL_DIM: usize = 4;

/// Thrust limits [m/s²]
pub const FULL_THRUST_MIN: f64 = 2.0;
pub const FULL_THRUST_MAX: f64 = 20.0;
/// Body-rate limits [rad/s]
pub const FULL_RATE_MAX: f64 = 6.0;

/// Quaternion-attitude quadrotor driven by thrust and body rates
#[derive(Debug, Clone)]
pub struct FullQuadrotor {
    constants: PhysicalConstants,
}

impl FullQuadrotor {
    pub fn new(constants: PhysicalConstants) -> Self {
        Self { constants }
    }

    pub fn constants(&self) -> &PhysicalConstants {
        &self.constants
    }
}

impl Dynamics for FullQuadrotor {
    fn variant(&self) -> ModelVariant {
        ModelVariant::Full
    }

    fn state_dim(&self) -> usize {
        FULL_STATE_DIM
    }

    fn control_dim(&self) -> usize {
        FULL_CONTROL_DIM
    }

    fn derivative(&self, state: &VecX, control: &VecX) -> VecX {
        let q = Vector4::new(state[3], state[4], state[5], state[6]);
        let v = Vector3::new(state[7], state[8], state[9]);
        let thrust = control[0];
        let omega = Vector3::new(control[1], control[2], control[3]);

        let q_dot = quaternion_derivative(&q, &omega);
        let acc = body_z_axis(&q) * thrust - Vector3::new(0.0, 0.0, self.constants.gravity);

        VecX::from_vec(vec![
            v.x, v.y, v.z,
            q_dot[0], q_dot[1], q_dot[2], q_dot[3],
            acc.x, acc.y, acc.z,
        ])
    }

    fn hover_state(&self) -> VecX {
        let mut x = VecX::zeros(FULL_STATE_DIM);
        x[3] = 1.0;
        x
    }

    fn hover_control(&self) -> VecX {
        VecX::from_vec(vec![self.constants.gravity, 0.0, 0.0, 0.0])
    }

    fn control_bounds(&self) -> ControlBounds {
        ControlBounds::new(
            vec![FULL_THRUST_MIN, -FULL_RATE_MAX, -FULL_RATE_MAX, -FULL_RATE_MAX],
            vec![FULL_THRUST_MAX, FULL_RATE_MAX, FULL_RATE_MAX, FULL_RATE_MAX],
        )
    }

    fn orientation_slots(&self) -> Option<Range<usize>> {
        Some(3..7)
    }
}

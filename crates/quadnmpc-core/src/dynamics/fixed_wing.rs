//! Fixed-wing placeholder model
//!
//! Planar longitudinal point mass, state `[px, pz, vx, vz, θ, θ̇]`,
//! control `[T, θ̇_cmd]`:
//!
//! ```text
//! v̇ = (T/m) [cos θ, sin θ] + (c_L |v| / m) [−vz, vx] − (c_D |v| / m) v − g e_z
//! θ̈ = (θ̇_cmd − θ̇) / τ
//! ```
//!
//! Lift is normal to the velocity and grows with speed squared.

use super::{ControlBounds, Dynamics, ModelVariant, PhysicalConstants};
use crate::VecX;

pub const FIXED_WING_STATE_DIM: usize = 6;
pub const FIXED_WING_CONTROL_DIM: usize = 2;

#[derive(Debug, Clone)]
pub struct FixedWing {
    constants: PhysicalConstants,
}

impl FixedWing {
    pub fn new(constants: PhysicalConstants) -> Self {
        Self { constants }
    }

    /// Level-flight airspeed where lift balances weight [m/s]
    pub fn trim_speed(&self) -> f64 {
        let c = &self.constants;
        (c.mass * c.gravity / c.lift_coefficient).sqrt()
    }
}

impl Dynamics for FixedWing {
    fn variant(&self) -> ModelVariant {
        ModelVariant::FixedWing
    }

    fn state_dim(&self) -> usize {
        FIXED_WING_STATE_DIM
    }

    fn control_dim(&self) -> usize {
        FIXED_WING_CONTROL_DIM
    }

    fn derivative(&self, state: &VecX, control: &VecX) -> VecX {
        let c = &self.constants;
        let (vx, vz, pitch, pitch_rate) = (state[2], state[3], state[4], state[5]);
        let speed = vx.hypot(vz);
        let thrust = control[0] / c.mass;

        let ax = thrust * pitch.cos() - c.lift_coefficient * speed * vz / c.mass
            - c.drag_coefficient * speed * vx / c.mass;
        let az = thrust * pitch.sin() + c.lift_coefficient * speed * vx / c.mass
            - c.drag_coefficient * speed * vz / c.mass
            - c.gravity;

        VecX::from_vec(vec![
            vx,
            vz,
            ax,
            az,
            pitch_rate,
            (control[1] - pitch_rate) / c.pitch_time_constant,
        ])
    }

    fn hover_state(&self) -> VecX {
        VecX::from_vec(vec![0.0, 0.0, self.trim_speed(), 0.0, 0.0, 0.0])
    }

    fn hover_control(&self) -> VecX {
        let v = self.trim_speed();
        VecX::from_vec(vec![self.constants.drag_coefficient * v * v, 0.0])
    }

    fn control_bounds(&self) -> ControlBounds {
        ControlBounds::new(vec![0.0, -1.0], vec![10.0, 1.0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_trim_is_equilibrium_except_translation() {
        let m = FixedWing::new(PhysicalConstants::default());
        let x = m.hover_state();
        let xdot = m.derivative(&x, &m.hover_control());

        assert_relative_eq!(xdot[0], m.trim_speed(), epsilon = 1e-12);
        for i in 1..6 {
            assert_relative_eq!(xdot[i], 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_pitch_rate_tracks_command() {
        let m = FixedWing::new(PhysicalConstants::default());
        let x = m.hover_state();
        let u = VecX::from_vec(vec![m.hover_control()[0], 0.5]);
        let xdot = m.derivative(&x, &u);

        assert_relative_eq!(xdot[5], 0.5 / 0.2, epsilon = 1e-12);
    }
}

//! Reference sources
//!
//! [`HoverReference`] holds a fixed state. [`MovingGate`] follows a gate
//! hanging from a pivot and swinging in the y-z plane:
//!
//! ```text
//! θ(t) = θ_max sin(ωt + φ)
//! p(t) = pivot + L [0, sin θ, −cos θ]
//! ```
//!
//! Both fill the three auxiliary channels of each slice with
//! `[sample time, gate phase, phase rate]`.

use serde::{Deserialize, Serialize};

use quadnmpc_core::dynamics::{Dynamics, ModelVariant};
use quadnmpc_core::{Vec3, VecX};

use crate::executor::ReferenceSource;

/// Write a Cartesian position and velocity into a model state
///
/// Planar models keep the x and z components.
pub fn embed_point(template: &VecX, variant: ModelVariant, position: &Vec3, velocity: &Vec3) -> VecX {
    let mut state = template.clone();
    let (p, v) = if variant.position_dim() == 2 {
        (vec![position.x, position.z], vec![velocity.x, velocity.z])
    } else {
        (position.as_slice().to_vec(), velocity.as_slice().to_vec())
    };
    state.rows_mut(0, p.len()).copy_from_slice(&p);
    let slots = variant.velocity_slots();
    state.rows_mut(slots.start, slots.len()).copy_from_slice(&v);
    state
}

fn push_slice(window: &mut Vec<f64>, state: &VecX, time: f64, phase: f64, rate: f64) {
    window.extend(state.iter());
    window.extend([time, phase, rate]);
}

/// Constant reference and goal
#[derive(Debug, Clone)]
pub struct HoverReference {
    state: VecX,
    dt: f64,
    time: f64,
}

impl HoverReference {
    pub fn new(state: VecX, dt: f64) -> Self {
        Self { state, dt, time: 0.0 }
    }

    /// Hover at `position` with the model's hover attitude
    pub fn at_position(model: &dyn Dynamics, position: Vec3, dt: f64) -> Self {
        let state = embed_point(&model.hover_state(), model.variant(), &position, &Vec3::zeros());
        Self::new(state, dt)
    }

    pub fn state(&self) -> &VecX {
        &self.state
    }
}

impl ReferenceSource for HoverReference {
    fn reference_window(&mut self, horizon: usize) -> Vec<f64> {
        let mut window = Vec::with_capacity(horizon * (self.state.len() + 3));
        for k in 0..horizon {
            push_slice(&mut window, &self.state, self.time + (k + 1) as f64 * self.dt, 0.0, 0.0);
        }
        window
    }

    fn goal_state(&mut self) -> Vec<f64> {
        self.state.as_slice().to_vec()
    }

    fn advance(&mut self, dt: f64) {
        self.time += dt;
    }
}

/// Pendulum motion of a swinging gate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateMotion {
    /// Suspension point [m]
    pub pivot: [f64; 3],
    /// Distance from pivot to gate centre [m]
    pub length: f64,
    /// Swing amplitude [rad]
    pub max_angle: f64,
    /// Swing angular frequency [rad/s]
    pub omega: f64,
    /// Phase at t = 0 [rad]
    pub phase: f64,
}

impl Default for GateMotion {
    fn default() -> Self {
        Self {
            pivot: [2.0, 0.0, 2.0],
            length: 2.0,
            max_angle: 0.8,
            omega: 1.6,
            phase: 0.0,
        }
    }
}

impl GateMotion {
    /// Swing phase `ωt + φ`
    pub fn phase_at(&self, t: f64) -> f64 {
        self.omega * t + self.phase
    }

    /// Swing angle θ(t)
    pub fn angle(&self, t: f64) -> f64 {
        self.max_angle * self.phase_at(t).sin()
    }

    /// θ̇(t)
    pub fn angle_rate(&self, t: f64) -> f64 {
        self.max_angle * self.omega * self.phase_at(t).cos()
    }

    /// Gate centre at time t
    pub fn position(&self, t: f64) -> Vec3 {
        let theta = self.angle(t);
        Vec3::from(self.pivot) + Vec3::new(0.0, theta.sin(), -theta.cos()) * self.length
    }

    /// Gate centre velocity at time t
    pub fn velocity(&self, t: f64) -> Vec3 {
        let theta = self.angle(t);
        Vec3::new(0.0, theta.cos(), theta.sin()) * (self.length * self.angle_rate(t))
    }
}

/// Reference that follows a swinging gate, then a fixed goal beyond it
#[derive(Debug, Clone)]
pub struct MovingGate {
    motion: GateMotion,
    variant: ModelVariant,
    template: VecX,
    goal: VecX,
    dt: f64,
    time: f64,
}

impl MovingGate {
    /// Gate reference for `model` with goal position `goal`
    pub fn new(model: &dyn Dynamics, motion: GateMotion, goal: Vec3, dt: f64) -> Self {
        let variant = model.variant();
        let template = model.hover_state();
        let goal = embed_point(&template, variant, &goal, &Vec3::zeros());
        Self {
            motion,
            variant,
            template,
            goal,
            dt,
            time: 0.0,
        }
    }

    pub fn motion(&self) -> &GateMotion {
        &self.motion
    }

    /// Source clock [s]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Gate state in model coordinates at time t
    pub fn gate_state(&self, t: f64) -> VecX {
        embed_point(
            &self.template,
            self.variant,
            &self.motion.position(t),
            &self.motion.velocity(t),
        )
    }
}

impl ReferenceSource for MovingGate {
    fn reference_window(&mut self, horizon: usize) -> Vec<f64> {
        let mut window = Vec::with_capacity(horizon * (self.template.len() + 3));
        for k in 0..horizon {
            let t = self.time + (k + 1) as f64 * self.dt;
            push_slice(
                &mut window,
                &self.gate_state(t),
                t,
                self.motion.phase_at(t),
                self.motion.omega,
            );
        }
        window
    }

    fn goal_state(&mut self) -> Vec<f64> {
        self.goal.as_slice().to_vec()
    }

    fn advance(&mut self, dt: f64) {
        self.time += dt;
    }
}

//! Fixed-step discrete transition map
//!
//! Turns a continuous [`Dynamics`] model into `x[k+1] = F(x[k], u[k])`.
//! Models with a closed-form update use it directly; all others are
//! integrated with `refinement` RK4 sub-steps per outer step.
//!
//! Stage evaluations are independent, so the batch variants fan out over
//! the rayon pool and gather the results in input order.

use std::sync::Arc;

use rayon::prelude::*;

use super::{Dynamics, ModelError};
use crate::math::rk4_refined;
use crate::{MatX, VecX};

/// Reference number of RK4 sub-steps per outer step
pub const DEFAULT_REFINEMENT: usize = 4;

/// Relative perturbation used by the finite-difference Jacobian
const FD_STEP: f64 = 1e-6;

/// Discrete transition `F(x, u)` over one control period
#[derive(Debug, Clone)]
pub struct DiscreteTransition {
    model: Arc<dyn Dynamics>,
    dt: f64,
    refinement: usize,
}

impl DiscreteTransition {
    /// Create a transition map
    ///
    /// # Arguments
    /// * `model` - Continuous-time model
    /// * `dt` - Outer step size [s], finite and positive
    /// * `refinement` - RK4 sub-steps per outer step, at least 1
    pub fn new(model: Arc<dyn Dynamics>, dt: f64, refinement: usize) -> Result<Self, ModelError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(ModelError::InvalidStep(dt));
        }
        if refinement == 0 {
            return Err(ModelError::InvalidRefinement);
        }
        Ok(Self { model, dt, refinement })
    }

    pub fn model(&self) -> &Arc<dyn Dynamics> {
        &self.model
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn refinement(&self) -> usize {
        self.refinement
    }

    /// Same map with a different outer step
    pub fn with_dt(&self, dt: f64) -> Result<Self, ModelError> {
        Self::new(self.model.clone(), dt, self.refinement)
    }

    /// Advance one control period with `control` held constant
    pub fn step(&self, state: &VecX, control: &VecX) -> VecX {
        if let Some(next) = self.model.closed_form_step(state, control, self.dt) {
            return next;
        }
        rk4_refined(state, self.dt, self.refinement, |x| self.model.derivative(x, control))
    }

    /// Evaluate [`Self::step`] for every `(state, control)` pair
    pub fn step_batch(&self, stages: &[(VecX, VecX)]) -> Vec<VecX> {
        stages
            .par_iter()
            .map(|(x, u)| self.step(x, u))
            .collect()
    }

    /// Jacobians `(∂F/∂x, ∂F/∂u)` by central differences
    pub fn jacobian(&self, state: &VecX, control: &VecX) -> (MatX, MatX) {
        let nx = state.len();
        let nu = control.len();
        let mut a = MatX::zeros(nx, nx);
        let mut b = MatX::zeros(nx, nu);

        for j in 0..nx {
            let h = FD_STEP * state[j].abs().max(1.0);
            let mut xp = state.clone();
            let mut xm = state.clone();
            xp[j] += h;
            xm[j] -= h;
            let col = (self.step(&xp, control) - self.step(&xm, control)) / (2.0 * h);
            a.set_column(j, &col);
        }

        for j in 0..nu {
            let h = FD_STEP * control[j].abs().max(1.0);
            let mut up = control.clone();
            let mut um = control.clone();
            up[j] += h;
            um[j] -= h;
            let col = (self.step(state, &up) - self.step(state, &um)) / (2.0 * h);
            b.set_column(j, &col);
        }

        (a, b)
    }

    /// Evaluate [`Self::jacobian`] for every stage in parallel
    pub fn jacobian_batch(&self, stages: &[(VecX, VecX)]) -> Vec<(MatX, MatX)> {
        stages
            .par_iter()
            .map(|(x, u)| self.jacobian(x, u))
            .collect()
    }
}

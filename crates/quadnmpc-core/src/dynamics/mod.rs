//! Vehicle dynamics models
//!
//! Three interchangeable prediction models, selected by name when a
//! controller is built and fixed for its lifetime:
//! - Full quadrotor: position, raw attitude quaternion, velocity (10 states)
//! - Simplified quadrotor: Euler attitude with a closed-form discrete update (12 states)
//! - Fixed-wing: planar longitudinal placeholder (6 states)
//!
//! Every model is a pure function of `(state, control)`; the [`discrete`]
//! module turns it into the fixed-step transition used by the optimizer.

pub mod params;
pub mod quadrotor;
pub mod simple;
pub mod fixed_wing;
pub mod discrete;

pub use params::*;
pub use quadrotor::*;
pub use simple::*;
pub use fixed_wing::*;
pub use discrete::*;

use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::VecX;

/// Errors raised while selecting or constructing a model
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("unknown dynamics model '{0}' (expected high_mpc, simple_quad or fixed_wing)")]
    Unknown(String),
    #[error("invalid step size {0} (must be finite and positive)")]
    InvalidStep(f64),
    #[error("integrator refinement must be at least 1")]
    InvalidRefinement,
    #[error("state has {got} components, model expects {expected}")]
    StateLength { expected: usize, got: usize },
}

/// Available prediction models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Quaternion attitude, collective thrust + body rates
    #[serde(rename = "high_mpc", alias = "full")]
    Full,
    /// Euler attitude with baked-in semi-implicit update
    #[serde(rename = "simple_quad", alias = "simplified")]
    Simplified,
    /// Planar fixed-wing placeholder
    FixedWing,
}

impl ModelVariant {
    /// Canonical configuration name
    pub fn name(&self) -> &'static str {
        match self {
            ModelVariant::Full => "high_mpc",
            ModelVariant::Simplified => "simple_quad",
            ModelVariant::FixedWing => "fixed_wing",
        }
    }

    /// Number of leading position components in the state
    pub fn position_dim(&self) -> usize {
        match self {
            ModelVariant::Full | ModelVariant::Simplified => 3,
            ModelVariant::FixedWing => 2,
        }
    }

    /// State indices of the linear velocity
    pub fn velocity_slots(&self) -> Range<usize> {
        match self {
            ModelVariant::Full => 7..10,
            ModelVariant::Simplified => 6..9,
            ModelVariant::FixedWing => 2..4,
        }
    }

    /// Construct the model with the given physical constants
    pub fn build(&self, constants: PhysicalConstants) -> Arc<dyn Dynamics> {
        match self {
            ModelVariant::Full => Arc::new(FullQuadrotor::new(constants)),
            ModelVariant::Simplified => Arc::new(SimplifiedQuadrotor::new(constants)),
            ModelVariant::FixedWing => Arc::new(FixedWing::new(constants)),
        }
    }
}

impl FromStr for ModelVariant {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "high_mpc" | "full" => Ok(ModelVariant::Full),
            "simple_quad" | "simplified" => Ok(ModelVariant::Simplified),
            "fixed_wing" => Ok(ModelVariant::FixedWing),
            other => Err(ModelError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build a model from its configuration name
pub fn model_from_name(name: &str, constants: PhysicalConstants) -> Result<Arc<dyn Dynamics>, ModelError> {
    Ok(name.parse::<ModelVariant>()?.build(constants))
}

/// Box limits on the control vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ControlBounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Self { lower, upper }
    }

    /// Whether every component of `u` lies inside the box (with slack `tol`)
    pub fn contains(&self, u: &[f64], tol: f64) -> bool {
        u.len() == self.lower.len()
            && u.iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(v, (lo, hi))| *v >= lo - tol && *v <= hi + tol)
    }

    /// Clamp `u` into the box
    pub fn clamp(&self, u: &VecX) -> VecX {
        VecX::from_iterator(
            u.len(),
            u.iter()
                .enumerate()
                .map(|(i, v)| match (self.lower.get(i), self.upper.get(i)) {
                    (Some(lo), Some(hi)) => v.clamp(*lo, *hi),
                    _ => *v,
                }),
        )
    }
}

/// Continuous-time vehicle model
///
/// Implementations must be side-effect free; the optimizer evaluates
/// them concurrently across horizon stages.
pub trait Dynamics: Send + Sync + fmt::Debug {
    /// Which variant this is
    fn variant(&self) -> ModelVariant;

    /// State dimension
    fn state_dim(&self) -> usize;

    /// Control dimension
    fn control_dim(&self) -> usize;

    /// State derivative ẋ = f(x, u)
    fn derivative(&self, state: &VecX, control: &VecX) -> VecX;

    /// Closed-form discrete update, for models that define their
    /// transition directly instead of through the derivative.
    fn closed_form_step(&self, _state: &VecX, _control: &VecX, _dt: f64) -> Option<VecX> {
        None
    }

    /// Equilibrium state used to seed the optimizer
    fn hover_state(&self) -> VecX;

    /// Control holding [`Dynamics::hover_state`]; the control-effort cost is
    /// measured against it
    fn hover_control(&self) -> VecX;

    /// Default actuator limits
    fn control_bounds(&self) -> ControlBounds;

    /// State indices holding orientation targets that are zeroed in the
    /// reference before packing. Only the full model uses this.
    fn orientation_slots(&self) -> Option<Range<usize>> {
        None
    }
}

//! Controller configuration
//!
//! Loaded once at construction (from code or a TOML file) and never
//! mutated afterwards. Weights and bounds left unset fall back to the
//! defaults of the selected model.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use quadnmpc_core::dynamics::{ControlBounds, Dynamics, ModelVariant, PhysicalConstants, DEFAULT_REFINEMENT};

use crate::error::ConfigurationError;

/// Main controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    /// Prediction model name (`high_mpc`, `simple_quad` or `fixed_wing`)
    pub model: String,
    /// What the executor does when a solve fails
    pub failure_policy: FailurePolicy,
    /// Horizon discretization
    pub horizon: HorizonConfig,
    /// Cost weight diagonals; `None` uses the model defaults
    pub weights: Option<CostWeights>,
    /// Control box; `None` uses the model's actuator limits
    pub bounds: Option<ControlBounds>,
    /// Physical constants handed to the model
    pub physics: PhysicalConstants,
    /// NLP solver settings
    pub solver: SolverConfig,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            model: ModelVariant::Full.name().to_string(),
            failure_policy: FailurePolicy::default(),
            horizon: HorizonConfig::default(),
            weights: None,
            bounds: None,
            physics: PhysicalConstants::default(),
            solver: SolverConfig::default(),
        }
    }
}

impl MpcConfig {
    /// Configuration for `variant` with every other field at its default
    pub fn for_model(variant: ModelVariant) -> Self {
        Self {
            model: variant.name().to_string(),
            ..Self::default()
        }
    }

    /// Parse from TOML text
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigurationError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML text
    pub fn to_toml_string(&self) -> Result<String, ConfigurationError> {
        Ok(toml::to_string(self)?)
    }

    /// Resolve the model name
    pub fn variant(&self) -> Result<ModelVariant, ConfigurationError> {
        Ok(self.model.parse::<ModelVariant>()?)
    }

    /// Weights in effect for `variant`
    pub fn resolved_weights(&self, variant: ModelVariant) -> CostWeights {
        self.weights
            .clone()
            .unwrap_or_else(|| CostWeights::for_model(variant))
    }

    /// Control bounds in effect for `model`
    pub fn resolved_bounds(&self, model: &dyn Dynamics) -> ControlBounds {
        self.bounds.clone().unwrap_or_else(|| model.control_bounds())
    }

    /// Check the scalar settings that do not depend on the model
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.horizon.steps()?;
        self.solver.validate()
    }
}

/// Executor behaviour after a failed solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Re-apply the last control that reached the vehicle
    ///
    /// Only optimizer failures are held; malformed inputs still end the loop.
    #[default]
    HoldLastControl,
    /// Stop the loop and return the failure
    Abort,
}

/// Horizon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    /// Total horizon time [s]
    pub horizon_time: f64,
    /// Control period / discretization step [s]
    pub dt: f64,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            horizon_time: 2.0,
            dt: 0.1,
        }
    }
}

impl HorizonConfig {
    /// Number of stages `N = ⌊T / dt⌋`
    pub fn steps(&self) -> Result<usize, ConfigurationError> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(ConfigurationError::InvalidStep(self.dt));
        }
        if !self.horizon_time.is_finite() {
            return Err(ConfigurationError::InvalidHorizon(format!(
                "horizon time {} is not finite",
                self.horizon_time
            )));
        }
        // Tolerate representation error such as 2.0 / 0.1 = 19.999...
        let n = (self.horizon_time / self.dt + 1e-9).floor();
        if n < 1.0 {
            return Err(ConfigurationError::InvalidHorizon(format!(
                "horizon time {} is shorter than one step of {}",
                self.horizon_time, self.dt
            )));
        }
        Ok(n as usize)
    }
}

/// Diagonals of the three cost weight matrices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    /// Terminal goal tracking (state dimension)
    pub goal: Vec<f64>,
    /// Interior reference tracking (state dimension)
    pub path: Vec<f64>,
    /// Control effort about hover (control dimension)
    pub control: Vec<f64>,
}

impl CostWeights {
    /// Default tuning per model
    ///
    /// Interior stages track lateral and vertical position and velocity;
    /// the goal additionally pins the along-track position. Attitude is
    /// never weighted.
    pub fn for_model(variant: ModelVariant) -> Self {
        match variant {
            ModelVariant::Full => Self {
                goal: vec![100.0, 100.0, 100.0, 0.0, 0.0, 0.0, 0.0, 10.0, 10.0, 10.0],
                path: vec![0.0, 100.0, 100.0, 0.0, 0.0, 0.0, 0.0, 0.0, 10.0, 10.0],
                control: vec![0.1; 4],
            },
            ModelVariant::Simplified => Self {
                goal: vec![100.0, 100.0, 100.0, 0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 0.0, 0.0, 0.0],
                path: vec![0.0, 100.0, 100.0, 0.0, 0.0, 0.0, 0.0, 10.0, 10.0, 0.0, 0.0, 0.0],
                control: vec![0.1; 4],
            },
            ModelVariant::FixedWing => Self {
                goal: vec![100.0, 100.0, 10.0, 10.0, 0.0, 0.0],
                path: vec![0.0, 100.0, 0.0, 10.0, 0.0, 0.0],
                control: vec![0.1; 2],
            },
        }
    }
}

/// NLP solver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum SQP iterations per solve
    pub max_iterations: usize,
    /// Stationarity and constraint-violation tolerance for convergence
    pub tolerance: f64,
    /// Looser violation tolerance for an acceptable stop
    pub acceptable_tolerance: f64,
    /// Relative objective change below which an iterate counts as acceptable
    pub acceptable_objective_change: f64,
    /// Consecutive acceptable iterates needed to stop early
    pub acceptable_iterations: usize,
    /// RK4 sub-steps per control period in the prediction model
    pub refinement: usize,
    /// Maximum interior-point iterations per QP subproblem
    pub qp_max_iterations: u32,
    /// QP gap / feasibility tolerance
    pub qp_tolerance: f64,
    /// Diagonal added to the objective Hessian
    pub regularization: f64,
    /// Diagonal added where the cost weight is zero
    pub damping: f64,
    /// Armijo sufficient-decrease constant
    pub armijo: f64,
    /// Smallest line-search step before giving up
    pub min_step: f64,
    /// Slack allowed when reporting bound violations
    pub bound_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-4,
            acceptable_tolerance: 1e-4,
            acceptable_objective_change: 1e-6,
            acceptable_iterations: 3,
            refinement: DEFAULT_REFINEMENT,
            qp_max_iterations: 200,
            qp_tolerance: 1e-9,
            regularization: 1e-8,
            damping: 1e-4,
            armijo: 1e-4,
            min_step: 1e-8,
            bound_tolerance: 1e-6,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let positive = [
            ("tolerance", self.tolerance),
            ("acceptable_tolerance", self.acceptable_tolerance),
            ("acceptable_objective_change", self.acceptable_objective_change),
            ("qp_tolerance", self.qp_tolerance),
            ("min_step", self.min_step),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigurationError::InvalidSolver(format!("{} must be positive, got {}", name, value)));
            }
        }
        if self.max_iterations == 0 || self.qp_max_iterations == 0 || self.acceptable_iterations == 0 {
            return Err(ConfigurationError::InvalidSolver("iteration caps must be at least 1".into()));
        }
        if self.refinement == 0 {
            return Err(ConfigurationError::InvalidSolver("refinement must be at least 1".into()));
        }
        if !(0.0..0.5).contains(&self.armijo) {
            return Err(ConfigurationError::InvalidSolver(format!("armijo constant {} outside [0, 0.5)", self.armijo)));
        }
        for (name, value) in [("regularization", self.regularization), ("damping", self.damping)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidSolver(format!("{} must be non-negative", name)));
            }
        }
        Ok(())
    }
}

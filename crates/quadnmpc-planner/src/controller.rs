//! Receding-horizon controller
//!
//! Owns the NLP, the backend and the warm-start cache. Each call to
//! [`NmpcController::solve`] returns the control to apply now together with
//! the predicted trajectory.

use std::sync::Arc;

use log::{debug, info};

use quadnmpc_core::dynamics::{ControlBounds, Dynamics};
use quadnmpc_core::VecX;

use crate::config::MpcConfig;
use crate::error::{ConfigurationError, MpcError};
use crate::ocp::{DecisionLayout, NlpBuilder, NlpProblem};
use crate::solver::{NlpBackend, SolveStatistics, SqpSolver};
use crate::trajectory::{report_violations, BoundViolation, PredictedTrajectory, WarmStart};

/// Output of a successful solve
#[derive(Debug, Clone)]
pub struct MpcSolution {
    /// Control to apply now, `u₀`
    pub control: VecX,
    pub trajectory: PredictedTrajectory,
    /// Predicted controls outside the box; empty in the normal case
    pub violations: Vec<BoundViolation>,
    pub statistics: SolveStatistics,
}

/// Nonlinear model predictive controller
///
/// One controller per vehicle. `solve` takes `&mut self`, so the warm-start
/// cache is never shared between concurrent solves.
pub struct NmpcController {
    config: MpcConfig,
    model: Arc<dyn Dynamics>,
    problem: NlpProblem,
    backend: Box<dyn NlpBackend>,
    warm_start: WarmStart,
    last_stats: Option<SolveStatistics>,
}

impl NmpcController {
    /// Build a controller with the default SQP backend
    pub fn new(config: MpcConfig) -> Result<Self, ConfigurationError> {
        let backend = Box::new(SqpSolver::new(config.solver.clone()));
        Self::with_backend(config, backend)
    }

    /// Build a controller around a custom backend
    pub fn with_backend(
        config: MpcConfig,
        backend: Box<dyn NlpBackend>,
    ) -> Result<Self, ConfigurationError> {
        let variant = config.variant()?;
        let model = variant.build(config.physics.clone());
        let problem = NlpBuilder::new(model.clone(), config.clone()).build()?;
        let warm_start = WarmStart::new(problem.initial_guess().clone());

        info!(
            "nmpc controller ready: model={}, N={}, dt={}, backend={}",
            variant,
            problem.layout().horizon,
            config.horizon.dt,
            backend.name()
        );

        Ok(Self {
            config,
            model,
            problem,
            backend,
            warm_start,
            last_stats: None,
        })
    }

    /// Solve for the next control
    ///
    /// `reference_window` holds N slices of `nx + 3` values (reference state
    /// followed by sample time, gate phase and phase rate). Lengths are
    /// checked before the backend runs. On failure the warm start is left as
    /// it was.
    pub fn solve(
        &mut self,
        reference_window: &[f64],
        goal: &[f64],
        current_state: &[f64],
    ) -> Result<MpcSolution, MpcError> {
        let layout = *self.problem.layout();
        let (window, goal) = self.mask_orientation(reference_window, goal);
        let parameters = self.problem.pack_parameters(current_state, &window, &goal)?;

        let solution = self
            .backend
            .solve(&self.problem, self.warm_start.guess(), &parameters)?;

        let trajectory = PredictedTrajectory::from_decision(&layout, &solution.w, self.config.horizon.dt);
        let control = layout.control(&solution.w, 0);

        let violations = trajectory.bound_violations(
            self.problem.control_bounds(),
            self.config.solver.bound_tolerance,
        );
        report_violations(&violations);

        self.warm_start.advance(&layout, &solution.w);
        self.last_stats = Some(solution.statistics.clone());

        debug!(
            "solve: {} sqp iterations, f={:.4e}, {:.2} ms, u0={:?}",
            solution.statistics.sqp_iterations,
            solution.statistics.objective,
            solution.statistics.solve_time_ms,
            control.as_slice()
        );

        Ok(MpcSolution {
            control,
            trajectory,
            violations,
            statistics: solution.statistics,
        })
    }

    /// Zero the quaternion slots of every reference slice and of the goal
    ///
    /// Only the full model has orientation slots; other models pass through.
    /// Inputs of the wrong length pass through untouched so that packing
    /// reports the mismatch.
    fn mask_orientation(&self, window: &[f64], goal: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mut window = window.to_vec();
        let mut goal = goal.to_vec();
        let Some(slots) = self.model.orientation_slots() else {
            return (window, goal);
        };

        let layout = self.problem.layout();
        if window.len() == layout.window_len() {
            for slice in window.chunks_mut(layout.slice_len()) {
                slice[slots.clone()].fill(0.0);
            }
        }
        if goal.len() == layout.nx {
            goal[slots].fill(0.0);
        }
        (window, goal)
    }

    /// Restore the static hover seed
    pub fn reset_warm_start(&mut self) {
        self.warm_start.reset();
    }

    /// Statistics of the last successful solve
    pub fn statistics(&self) -> Option<&SolveStatistics> {
        self.last_stats.as_ref()
    }

    /// Initial guess the next solve will start from
    pub fn warm_start(&self) -> &VecX {
        self.warm_start.guess()
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<dyn Dynamics> {
        &self.model
    }

    pub fn problem(&self) -> &NlpProblem {
        &self.problem
    }

    pub fn layout(&self) -> &DecisionLayout {
        self.problem.layout()
    }

    pub fn control_bounds(&self) -> &ControlBounds {
        self.problem.control_bounds()
    }

    /// Number of stages N
    pub fn horizon(&self) -> usize {
        self.problem.layout().horizon
    }

    /// Stage period [s]
    pub fn dt(&self) -> f64 {
        self.config.horizon.dt
    }
}

//! Closed-loop receding-horizon execution
//!
//! Each tick reads the vehicle state, asks the reference source for the
//! window and goal, solves, applies the first control, and advances time by
//! one stage period.

use log::{debug, info, warn};
use thiserror::Error;

use quadnmpc_core::VecX;

use crate::controller::NmpcController;
use crate::error::MpcError;
use crate::solver::SolveStatistics;

pub use crate::config::FailurePolicy;

/// Result of applying one control to a vehicle
#[derive(Debug, Clone)]
pub struct VehicleStep {
    pub next_state: VecX,
    /// False once the vehicle has left its safe envelope
    pub stable: bool,
}

/// Something that can be measured and commanded
pub trait Vehicle {
    fn current_state(&self) -> VecX;

    /// Apply `control` for one stage period
    fn apply_control(&mut self, control: &VecX) -> VehicleStep;
}

/// Provides the reference window and goal for each tick
pub trait ReferenceSource {
    /// `horizon` slices of `nx + 3` values starting one stage ahead
    fn reference_window(&mut self, horizon: usize) -> Vec<f64>;

    fn goal_state(&mut self) -> Vec<f64>;

    /// Move the source's clock forward by `dt`
    fn advance(&mut self, _dt: f64) {}
}

/// What happened on one tick
#[derive(Debug, Clone)]
pub struct TickRecord {
    pub tick: usize,
    /// Time at the start of the tick [s]
    pub time: f64,
    pub state: VecX,
    pub control: VecX,
    /// Whether the control came from a fresh solve
    pub solved: bool,
    /// `None` when the solve failed
    pub statistics: Option<SolveStatistics>,
}

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The stop predicate returned true
    Stopped,
    /// The vehicle reported it left its envelope
    Unstable,
    MaxTicks,
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub ticks: Vec<TickRecord>,
    pub termination: Termination,
    pub final_state: VecX,
    /// Elapsed loop time [s]
    pub elapsed: f64,
    /// Ticks where the previous control was held after a failed solve
    pub held_ticks: usize,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("solve failed at tick {tick}: {source}")]
    SolveFailed {
        tick: usize,
        #[source]
        source: MpcError,
    },
}

/// Drives a controller against a vehicle
pub struct RecedingHorizonExecutor {
    controller: NmpcController,
    policy: FailurePolicy,
    time: f64,
    last_control: Option<VecX>,
}

impl RecedingHorizonExecutor {
    /// Executor using the failure policy from the controller's config
    pub fn new(controller: NmpcController) -> Self {
        let policy = controller.config().failure_policy;
        Self::with_policy(controller, policy)
    }

    pub fn with_policy(controller: NmpcController, policy: FailurePolicy) -> Self {
        Self {
            controller,
            policy,
            time: 0.0,
            last_control: None,
        }
    }

    pub fn controller(&self) -> &NmpcController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut NmpcController {
        &mut self.controller
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Loop time [s]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Last control that reached the vehicle
    pub fn last_control(&self) -> Option<&VecX> {
        self.last_control.as_ref()
    }

    /// Run until `stop(state, time)` holds, the vehicle goes unstable, or
    /// `max_ticks` ticks have elapsed
    pub fn run<V, R, S>(
        &mut self,
        vehicle: &mut V,
        source: &mut R,
        max_ticks: usize,
        mut stop: S,
    ) -> Result<ExecutionReport, ExecutorError>
    where
        V: Vehicle + ?Sized,
        R: ReferenceSource + ?Sized,
        S: FnMut(&VecX, f64) -> bool,
    {
        let dt = self.controller.dt();
        let horizon = self.controller.horizon();
        let start_time = self.time;
        let mut ticks = Vec::new();
        let mut held_ticks = 0;
        let mut termination = Termination::MaxTicks;

        for tick in 0..max_ticks {
            let state = vehicle.current_state();
            if stop(&state, self.time) {
                termination = Termination::Stopped;
                break;
            }

            let window = source.reference_window(horizon);
            let goal = source.goal_state();

            let (control, statistics) =
                match self.controller.solve(&window, &goal, state.as_slice()) {
                    Ok(solution) => (solution.control, Some(solution.statistics)),
                    Err(e) => match (self.policy, self.last_control.clone()) {
                        (FailurePolicy::HoldLastControl, Some(held)) if e.is_recoverable() => {
                            warn!("tick {}: {}; holding last control", tick, e);
                            held_ticks += 1;
                            (held, None)
                        }
                        _ => return Err(ExecutorError::SolveFailed { tick, source: e }),
                    },
                };

            let step = vehicle.apply_control(&control);
            debug!("tick {} t={:.2}: u={:?}", tick, self.time, control.as_slice());

            ticks.push(TickRecord {
                tick,
                time: self.time,
                state,
                control: control.clone(),
                solved: statistics.is_some(),
                statistics,
            });
            self.last_control = Some(control);
            self.time += dt;
            source.advance(dt);

            if !step.stable {
                warn!("vehicle left its envelope at t={:.2}", self.time);
                termination = Termination::Unstable;
                break;
            }
        }

        let report = ExecutionReport {
            final_state: vehicle.current_state(),
            elapsed: self.time - start_time,
            ticks,
            termination,
            held_ticks,
        };
        info!(
            "executor finished after {} ticks ({:?}), {} held",
            report.ticks.len(),
            report.termination,
            report.held_ticks
        );
        Ok(report)
    }
}

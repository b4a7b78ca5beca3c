//! Predicted trajectories and the warm-start cache

use log::warn;
use serde::{Deserialize, Serialize};

use quadnmpc_core::dynamics::ControlBounds;
use quadnmpc_core::VecX;

use crate::ocp::DecisionLayout;

/// Optimal state and control sequences from one solve
#[derive(Debug, Clone)]
pub struct PredictedTrajectory {
    /// Stage period [s]
    pub dt: f64,
    /// N+1 predicted states, starting at the measured state
    pub states: Vec<VecX>,
    /// N controls
    pub controls: Vec<VecX>,
}

impl PredictedTrajectory {
    /// Reshape a decision vector into stage sequences
    pub fn from_decision(layout: &DecisionLayout, w: &VecX, dt: f64) -> Self {
        Self {
            dt,
            states: (0..=layout.horizon).map(|k| layout.state(w, k)).collect(),
            controls: (0..layout.horizon).map(|k| layout.control(w, k)).collect(),
        }
    }

    /// Number of stages N
    pub fn horizon(&self) -> usize {
        self.controls.len()
    }

    /// Control to apply now
    pub fn first_control(&self) -> Option<&VecX> {
        self.controls.first()
    }

    /// Last predicted state
    pub fn final_state(&self) -> Option<&VecX> {
        self.states.last()
    }

    /// Stage time stamps relative to the solve [s]
    pub fn times(&self) -> Vec<f64> {
        (0..self.states.len()).map(|k| k as f64 * self.dt).collect()
    }

    /// Controls outside `bounds` by more than `tol`
    pub fn bound_violations(&self, bounds: &ControlBounds, tol: f64) -> Vec<BoundViolation> {
        let mut violations = Vec::new();
        for (stage, u) in self.controls.iter().enumerate() {
            for (index, value) in u.iter().enumerate() {
                let (Some(&lower), Some(&upper)) = (bounds.lower.get(index), bounds.upper.get(index)) else {
                    continue;
                };
                if *value < lower - tol || *value > upper + tol {
                    violations.push(BoundViolation {
                        stage,
                        index,
                        value: *value,
                        lower,
                        upper,
                    });
                }
            }
        }
        violations
    }
}

/// A predicted control outside its box despite solver convergence
///
/// Diagnostic only: points at a modelling or tuning problem and is never
/// corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundViolation {
    pub stage: usize,
    /// Control component
    pub index: usize,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Log every violation at warn level
pub fn report_violations(violations: &[BoundViolation]) {
    for v in violations {
        warn!(
            "predicted control {} at stage {} is {:.4}, outside [{:.4}, {:.4}]",
            v.index, v.stage, v.value, v.lower, v.upper
        );
    }
}

/// Initial guess for the next solve
///
/// Starts as the static hover seed. After each successful solve it holds
/// that solution shifted forward by one stage.
#[derive(Debug, Clone)]
pub struct WarmStart {
    seed: VecX,
    guess: VecX,
    shifts: usize,
}

impl WarmStart {
    pub fn new(seed: VecX) -> Self {
        Self {
            guess: seed.clone(),
            seed,
            shifts: 0,
        }
    }

    /// Current initial guess
    pub fn guess(&self) -> &VecX {
        &self.guess
    }

    /// Number of solutions absorbed since the last reset
    pub fn shifts(&self) -> usize {
        self.shifts
    }

    /// Whether the guess is still the static seed
    pub fn is_seed(&self) -> bool {
        self.shifts == 0
    }

    /// Restore the static seed
    pub fn reset(&mut self) {
        self.guess = self.seed.clone();
        self.shifts = 0;
    }

    /// Replace the guess with `solution` advanced by one stage
    pub fn advance(&mut self, layout: &DecisionLayout, solution: &VecX) {
        self.guess = shift_decision(layout, solution);
        self.shifts += 1;
    }
}

/// Shift a decision vector forward by one stage
///
/// Stage `i` takes stage `i + 1`; the final state and final control are
/// duplicated into the freed tail slots.
pub fn shift_decision(layout: &DecisionLayout, w: &VecX) -> VecX {
    let n = layout.horizon;
    let mut shifted = w.clone();

    for k in 0..n {
        let src = layout.state_offset(k + 1);
        shifted
            .rows_mut(layout.state_offset(k), layout.nx)
            .copy_from(&w.rows(src, layout.nx));
    }
    for k in 0..n.saturating_sub(1) {
        let src = layout.control_offset(k + 1);
        shifted
            .rows_mut(layout.control_offset(k), layout.nu)
            .copy_from(&w.rows(src, layout.nu));
    }
    // x_N and u_{N−1} keep their values

    shifted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(layout: &DecisionLayout) -> VecX {
        VecX::from_iterator(layout.len(), (0..layout.len()).map(|i| i as f64))
    }

    #[test]
    fn test_from_decision() {
        let layout = DecisionLayout::new(2, 1, 3);
        let w = numbered(&layout);
        let traj = PredictedTrajectory::from_decision(&layout, &w, 0.1);

        assert_eq!(traj.states.len(), 4);
        assert_eq!(traj.controls.len(), 3);
        assert_eq!(traj.first_control().unwrap()[0], 2.0);
        assert_eq!(traj.states[1].as_slice(), &[3.0, 4.0]);
        assert_eq!(traj.final_state().unwrap().as_slice(), &[9.0, 10.0]);
        assert_eq!(traj.times().len(), 4);
    }

    #[test]
    fn test_shift_moves_stages_forward() {
        let layout = DecisionLayout::new(2, 1, 3);
        let w = numbered(&layout);
        let s = shift_decision(&layout, &w);

        // [x0 u0 x1 u1 x2 u2 x3] = [0 1 | 2 | 3 4 | 5 | 6 7 | 8 | 9 10]
        assert_eq!(s.as_slice(), &[3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn test_shift_single_stage() {
        let layout = DecisionLayout::new(2, 1, 1);
        let w = VecX::from_vec(vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let s = shift_decision(&layout, &w);

        assert_eq!(s.as_slice(), &[3.0, 4.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_warm_start_lifecycle() {
        let layout = DecisionLayout::new(2, 1, 3);
        let seed = VecX::zeros(layout.len());
        let mut ws = WarmStart::new(seed.clone());
        assert!(ws.is_seed());

        ws.advance(&layout, &numbered(&layout));
        assert_eq!(ws.shifts(), 1);
        assert_eq!(ws.guess()[0], 3.0);

        ws.reset();
        assert!(ws.is_seed());
        assert_eq!(ws.guess(), &seed);
    }

    #[test]
    fn test_bound_violations() {
        let traj = PredictedTrajectory {
            dt: 0.1,
            states: vec![VecX::zeros(1); 3],
            controls: vec![VecX::from_vec(vec![5.0, 0.0]), VecX::from_vec(vec![21.0, -7.0])],
        };
        let bounds = ControlBounds::new(vec![2.0, -6.0], vec![20.0, 6.0]);
        let v = traj.bound_violations(&bounds, 1e-6);

        assert_eq!(v.len(), 2);
        assert_eq!(v[0].stage, 1);
        assert_eq!(v[0].index, 0);
        assert_eq!(v[1].value, -7.0);
    }
}

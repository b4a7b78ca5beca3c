//! Nonlinear program for the receding-horizon problem
//!
//! Direct multiple shooting over `N` stages:
//!
//! ```text
//! minimize    Σₖ ‖xₖ₊₁ − rₖ‖²_Q(k) + ‖uₖ − u_hover‖²_R
//! subject to  x₀ − x_cur = 0
//!             F(xₖ, uₖ) − xₖ₊₁ = 0        k = 0..N−1
//!             u_min ≤ uₖ ≤ u_max
//! ```
//!
//! with `Q(k)` the goal weights and `rₖ` the goal for the last stage
//! (`k ≥ N−1`), the path weights and the k-th reference slice otherwise.
//! The decision vector is `w = [x₀, u₀, x₁, u₁, …, u_{N−1}, x_N]`.
//!
//! The parameter vector is `p = [x_cur, slice₀, …, slice_{N−1}, goal]` where
//! each slice holds a reference state followed by [`REFERENCE_AUX`]
//! auxiliary channels (sample time, gate phase, phase rate) that the cost
//! ignores.

use std::sync::Arc;

use log::debug;

use quadnmpc_core::dynamics::{ControlBounds, DiscreteTransition, Dynamics};
use quadnmpc_core::{MatX, VecX};

use crate::config::{CostWeights, MpcConfig};
use crate::error::ConfigurationError;

/// Auxiliary channels appended to every reference slice
pub const REFERENCE_AUX: usize = 3;

/// Index arithmetic for the decision and parameter vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionLayout {
    /// State dimension
    pub nx: usize,
    /// Control dimension
    pub nu: usize,
    /// Number of stages N
    pub horizon: usize,
}

impl DecisionLayout {
    pub fn new(nx: usize, nu: usize, horizon: usize) -> Self {
        Self { nx, nu, horizon }
    }

    /// Length of the decision vector, `nx·(N+1) + nu·N`
    pub fn len(&self) -> usize {
        self.nx * (self.horizon + 1) + self.nu * self.horizon
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of equality constraints, `nx·(N+1)`
    pub fn num_constraints(&self) -> usize {
        self.nx * (self.horizon + 1)
    }

    /// Offset of `x_k`
    pub fn state_offset(&self, k: usize) -> usize {
        k * (self.nx + self.nu)
    }

    /// Offset of `u_k`
    pub fn control_offset(&self, k: usize) -> usize {
        k * (self.nx + self.nu) + self.nx
    }

    pub fn state(&self, w: &VecX, k: usize) -> VecX {
        w.rows(self.state_offset(k), self.nx).into_owned()
    }

    pub fn control(&self, w: &VecX, k: usize) -> VecX {
        w.rows(self.control_offset(k), self.nu).into_owned()
    }

    /// Length of one reference slice, `nx + 3`
    pub fn slice_len(&self) -> usize {
        self.nx + REFERENCE_AUX
    }

    /// Expected reference window length, `N·(nx + 3)`
    pub fn window_len(&self) -> usize {
        self.horizon * self.slice_len()
    }

    /// Parameter vector length, `nx + N·(nx + 3) + nx`
    pub fn parameter_len(&self) -> usize {
        self.nx + self.window_len() + self.nx
    }

    /// Assemble a decision vector from stage sequences
    pub fn assemble(&self, states: &[VecX], controls: &[VecX]) -> VecX {
        let mut w = VecX::zeros(self.len());
        for (k, x) in states.iter().enumerate().take(self.horizon + 1) {
            w.rows_mut(self.state_offset(k), self.nx).copy_from(x);
        }
        for (k, u) in controls.iter().enumerate().take(self.horizon) {
            w.rows_mut(self.control_offset(k), self.nu).copy_from(u);
        }
        w
    }
}

/// Builds an [`NlpProblem`] from a configuration and a model
pub struct NlpBuilder {
    model: Arc<dyn Dynamics>,
    config: MpcConfig,
}

impl NlpBuilder {
    pub fn new(model: Arc<dyn Dynamics>, config: MpcConfig) -> Self {
        Self { model, config }
    }

    /// Validate the configuration against the model and build the problem
    pub fn build(self) -> Result<NlpProblem, ConfigurationError> {
        let nx = self.model.state_dim();
        let nu = self.model.control_dim();
        let horizon = self.config.horizon.steps()?;
        self.config.solver.validate()?;

        let weights = self.config.resolved_weights(self.model.variant());
        validate_weights(&weights, nx, nu)?;

        let bounds = self.config.resolved_bounds(self.model.as_ref());
        validate_bounds(&bounds, nu)?;

        let transition = DiscreteTransition::new(
            self.model.clone(),
            self.config.horizon.dt,
            self.config.solver.refinement,
        )?;

        let layout = DecisionLayout::new(nx, nu, horizon);

        let mut lbw = VecX::from_element(layout.len(), f64::NEG_INFINITY);
        let mut ubw = VecX::from_element(layout.len(), f64::INFINITY);
        for k in 0..horizon {
            let off = layout.control_offset(k);
            for i in 0..nu {
                lbw[off + i] = bounds.lower[i];
                ubw[off + i] = bounds.upper[i];
            }
        }

        let hover_state = self.model.hover_state();
        let hover_control = self.model.hover_control();
        let initial_guess = layout.assemble(
            &vec![hover_state; horizon + 1],
            &vec![bounds.clamp(&hover_control); horizon],
        );

        debug!(
            "built NLP for {}: N={}, {} decision variables, {} constraints",
            self.model.variant(),
            horizon,
            layout.len(),
            layout.num_constraints()
        );

        Ok(NlpProblem {
            layout,
            transition,
            goal_weights: VecX::from_vec(weights.goal),
            path_weights: VecX::from_vec(weights.path),
            control_weights: VecX::from_vec(weights.control),
            hover_control,
            bounds,
            lbw,
            ubw,
            initial_guess,
        })
    }
}

fn validate_weights(weights: &CostWeights, nx: usize, nu: usize) -> Result<(), ConfigurationError> {
    for (what, w, expected) in [
        ("goal weights", &weights.goal, nx),
        ("path weights", &weights.path, nx),
        ("control weights", &weights.control, nu),
    ] {
        if w.len() != expected {
            return Err(ConfigurationError::LengthMismatch {
                what,
                expected,
                got: w.len(),
            });
        }
        if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ConfigurationError::InvalidWeights(format!(
                "{} must be finite and non-negative",
                what
            )));
        }
    }
    Ok(())
}

fn validate_bounds(bounds: &ControlBounds, nu: usize) -> Result<(), ConfigurationError> {
    for (what, b) in [("lower control bounds", &bounds.lower), ("upper control bounds", &bounds.upper)] {
        if b.len() != nu {
            return Err(ConfigurationError::LengthMismatch {
                what,
                expected: nu,
                got: b.len(),
            });
        }
    }
    for (i, (lo, hi)) in bounds.lower.iter().zip(&bounds.upper).enumerate() {
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(ConfigurationError::InvalidBounds(format!(
                "control {}: lower {} exceeds upper {}",
                i, lo, hi
            )));
        }
    }
    Ok(())
}

/// Complete NLP description, built once per controller
///
/// Only the parameter vector and the initial guess change between solves.
#[derive(Debug, Clone)]
pub struct NlpProblem {
    layout: DecisionLayout,
    transition: DiscreteTransition,
    goal_weights: VecX,
    path_weights: VecX,
    control_weights: VecX,
    hover_control: VecX,
    bounds: ControlBounds,
    lbw: VecX,
    ubw: VecX,
    initial_guess: VecX,
}

impl NlpProblem {
    pub fn layout(&self) -> &DecisionLayout {
        &self.layout
    }

    pub fn transition(&self) -> &DiscreteTransition {
        &self.transition
    }

    pub fn control_bounds(&self) -> &ControlBounds {
        &self.bounds
    }

    pub fn hover_control(&self) -> &VecX {
        &self.hover_control
    }

    /// Lower bounds on the decision vector (−∞ for states)
    pub fn lbw(&self) -> &VecX {
        &self.lbw
    }

    /// Upper bounds on the decision vector (+∞ for states)
    pub fn ubw(&self) -> &VecX {
        &self.ubw
    }

    /// Constraint lower bounds; all constraints are equalities
    pub fn lbg(&self) -> VecX {
        VecX::zeros(self.layout.num_constraints())
    }

    /// Constraint upper bounds
    pub fn ubg(&self) -> VecX {
        VecX::zeros(self.layout.num_constraints())
    }

    /// Static seed: hover state and hover control at every stage
    pub fn initial_guess(&self) -> &VecX {
        &self.initial_guess
    }

    /// Pack `[current, window, goal]` into a parameter vector
    pub fn pack_parameters(
        &self,
        current: &[f64],
        window: &[f64],
        goal: &[f64],
    ) -> Result<VecX, ConfigurationError> {
        let l = &self.layout;
        check_len("current state", l.nx, current.len())?;
        check_len("reference window", l.window_len(), window.len())?;
        check_len("goal state", l.nx, goal.len())?;

        let mut p = Vec::with_capacity(l.parameter_len());
        p.extend_from_slice(current);
        p.extend_from_slice(window);
        p.extend_from_slice(goal);
        Ok(VecX::from_vec(p))
    }

    /// Measured state `x_cur`
    pub fn current_state<'a>(&self, p: &'a VecX) -> nalgebra::DVectorView<'a, f64> {
        p.rows(0, self.layout.nx)
    }

    /// Reference sub-state of slice `k` (auxiliary channels dropped)
    pub fn reference_slice<'a>(&self, p: &'a VecX, k: usize) -> nalgebra::DVectorView<'a, f64> {
        p.rows(self.layout.nx + k * self.layout.slice_len(), self.layout.nx)
    }

    /// Terminal goal state
    pub fn goal_slice<'a>(&self, p: &'a VecX) -> nalgebra::DVectorView<'a, f64> {
        p.rows(self.layout.nx + self.layout.window_len(), self.layout.nx)
    }

    /// Target and weight diagonal for the state reached by stage `k`
    fn stage_target<'a>(&'a self, p: &'a VecX, k: usize) -> (nalgebra::DVectorView<'a, f64>, &'a VecX) {
        if k + 1 >= self.layout.horizon {
            (self.goal_slice(p), &self.goal_weights)
        } else {
            (self.reference_slice(p, k), &self.path_weights)
        }
    }

    /// Total cost
    pub fn objective(&self, w: &VecX, p: &VecX) -> f64 {
        let l = &self.layout;
        (0..l.horizon)
            .map(|k| {
                let (target, q) = self.stage_target(p, k);
                let dx = w.rows(l.state_offset(k + 1), l.nx) - target;
                let du = w.rows(l.control_offset(k), l.nu) - &self.hover_control;
                dx.component_mul(&dx).dot(q) + du.component_mul(&du).dot(&self.control_weights)
            })
            .sum()
    }

    /// Gradient of [`Self::objective`] with respect to `w`
    pub fn objective_gradient(&self, w: &VecX, p: &VecX) -> VecX {
        let l = &self.layout;
        let mut grad = VecX::zeros(l.len());
        for k in 0..l.horizon {
            let (target, q) = self.stage_target(p, k);
            let xo = l.state_offset(k + 1);
            let uo = l.control_offset(k);
            let dx = w.rows(xo, l.nx) - target;
            let du = w.rows(uo, l.nu) - &self.hover_control;
            grad.rows_mut(xo, l.nx).copy_from(&(dx.component_mul(q) * 2.0));
            grad.rows_mut(uo, l.nu).copy_from(&(du.component_mul(&self.control_weights) * 2.0));
        }
        grad
    }

    /// Diagonal of the objective Hessian
    ///
    /// The cost is a sum of diagonal quadratics, so the Hessian is constant.
    pub fn hessian_diagonal(&self) -> VecX {
        let l = &self.layout;
        let mut h = VecX::zeros(l.len());
        for k in 0..l.horizon {
            let q = if k + 1 >= l.horizon {
                &self.goal_weights
            } else {
                &self.path_weights
            };
            h.rows_mut(l.state_offset(k + 1), l.nx).copy_from(&(q * 2.0));
            h.rows_mut(l.control_offset(k), l.nu)
                .copy_from(&(&self.control_weights * 2.0));
        }
        h
    }

    fn stage_inputs(&self, w: &VecX) -> Vec<(VecX, VecX)> {
        (0..self.layout.horizon)
            .map(|k| (self.layout.state(w, k), self.layout.control(w, k)))
            .collect()
    }

    /// Equality constraints `[x₀ − x_cur; F(xₖ, uₖ) − xₖ₊₁]`
    pub fn constraints(&self, w: &VecX, p: &VecX) -> VecX {
        let l = &self.layout;
        let mut g = VecX::zeros(l.num_constraints());
        g.rows_mut(0, l.nx)
            .copy_from(&(w.rows(0, l.nx) - self.current_state(p)));

        let next = self.transition.step_batch(&self.stage_inputs(w));
        for (k, xn) in next.iter().enumerate() {
            let row = l.nx * (k + 1);
            g.rows_mut(row, l.nx)
                .copy_from(&(xn - w.rows(l.state_offset(k + 1), l.nx)));
        }
        g
    }

    /// Jacobian of [`Self::constraints`] with respect to `w`
    pub fn constraint_jacobian(&self, w: &VecX) -> MatX {
        let l = &self.layout;
        let mut jac = MatX::zeros(l.num_constraints(), l.len());
        for i in 0..l.nx {
            jac[(i, i)] = 1.0;
        }

        let stages = self.transition.jacobian_batch(&self.stage_inputs(w));
        for (k, (a, b)) in stages.iter().enumerate() {
            let row = l.nx * (k + 1);
            jac.view_mut((row, l.state_offset(k)), (l.nx, l.nx)).copy_from(a);
            jac.view_mut((row, l.control_offset(k)), (l.nx, l.nu)).copy_from(b);
            let xo = l.state_offset(k + 1);
            for i in 0..l.nx {
                jac[(row + i, xo + i)] = -1.0;
            }
        }
        jac
    }

    /// Project `w` onto the decision bounds
    pub fn clamp_to_bounds(&self, w: &VecX) -> VecX {
        VecX::from_iterator(
            w.len(),
            w.iter()
                .zip(self.lbw.iter().zip(self.ubw.iter()))
                .map(|(v, (lo, hi))| v.max(*lo).min(*hi)),
        )
    }
}

fn check_len(what: &'static str, expected: usize, got: usize) -> Result<(), ConfigurationError> {
    if expected != got {
        return Err(ConfigurationError::LengthMismatch { what, expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quadnmpc_core::dynamics::{ModelVariant, PhysicalConstants};
    use quadnmpc_core::GRAVITY;

    fn problem(horizon_time: f64) -> NlpProblem {
        let model = ModelVariant::Full.build(PhysicalConstants::default());
        let mut config = MpcConfig::default();
        config.horizon.horizon_time = horizon_time;
        NlpBuilder::new(model, config).build().unwrap()
    }

    fn hover_parameters(nlp: &NlpProblem) -> VecX {
        let l = nlp.layout();
        let hover = nlp.transition().model().hover_state();
        let mut slice = hover.as_slice().to_vec();
        slice.extend([0.0; REFERENCE_AUX]);
        let window: Vec<f64> = slice.iter().cycle().take(l.window_len()).copied().collect();
        nlp.pack_parameters(hover.as_slice(), &window, hover.as_slice()).unwrap()
    }

    #[test]
    fn test_layout_sizes() {
        let l = DecisionLayout::new(10, 4, 20);
        assert_eq!(l.len(), 10 * 21 + 4 * 20);
        assert_eq!(l.num_constraints(), 210);
        assert_eq!(l.window_len(), 20 * 13);
        assert_eq!(l.parameter_len(), 10 + 260 + 10);
        assert_eq!(l.control_offset(0), 10);
        assert_eq!(l.state_offset(20), 20 * 14);
    }

    #[test]
    fn test_bounds_layout() {
        let nlp = problem(0.3);
        let l = nlp.layout();

        assert_eq!(nlp.lbw()[0], f64::NEG_INFINITY);
        assert_eq!(nlp.ubw()[l.state_offset(3)], f64::INFINITY);
        assert_eq!(nlp.lbw()[l.control_offset(2)], 2.0);
        assert_eq!(nlp.ubw()[l.control_offset(2) + 3], 6.0);
        assert_eq!(nlp.lbg(), nlp.ubg());
    }

    #[test]
    fn test_seed_is_feasible_and_optimal_at_hover() {
        let nlp = problem(0.5);
        let p = hover_parameters(&nlp);
        let w = nlp.initial_guess();

        assert_relative_eq!(nlp.constraints(w, &p).amax(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(nlp.objective(w, &p), 0.0, epsilon = 1e-12);
        assert_relative_eq!(nlp.objective_gradient(w, &p).amax(), 0.0, epsilon = 1e-12);
        assert_eq!(nlp.layout().control(w, 0)[0], GRAVITY);
    }

    #[test]
    fn test_goal_and_path_costs() {
        // N = 2: stage 0 uses the path slice, stage 1 the goal
        let nlp = problem(0.2);
        let l = *nlp.layout();
        let mut p = hover_parameters(&nlp);
        // Path reference y = 1 and goal z = 2
        p[l.nx + 1] = 1.0;
        p[l.nx + l.window_len() + 2] = 2.0;

        let w = nlp.initial_guess().clone();
        // path y weight 100, goal z weight 100
        assert_relative_eq!(nlp.objective(&w, &p), 100.0 + 400.0, epsilon = 1e-12);

        let grad = nlp.objective_gradient(&w, &p);
        assert_relative_eq!(grad[l.state_offset(1) + 1], -200.0);
        assert_relative_eq!(grad[l.state_offset(2) + 2], -400.0);
        assert_relative_eq!(grad[l.state_offset(0)], 0.0);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let nlp = problem(0.3);
        let p = hover_parameters(&nlp);
        let mut w = nlp.initial_guess().clone();
        for i in 0..w.len() {
            w[i] += 0.01 * ((i * 7 % 11) as f64 - 5.0);
        }

        let grad = nlp.objective_gradient(&w, &p);
        let h = 1e-6;
        for i in 0..w.len() {
            let mut wp = w.clone();
            let mut wm = w.clone();
            wp[i] += h;
            wm[i] -= h;
            let fd = (nlp.objective(&wp, &p) - nlp.objective(&wm, &p)) / (2.0 * h);
            assert_relative_eq!(grad[i], fd, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_hessian_diagonal() {
        let nlp = problem(0.2);
        let l = *nlp.layout();
        let h = nlp.hessian_diagonal();

        // x0 is not in the cost
        assert_eq!(h.rows(0, l.nx).amax(), 0.0);
        // x1 gets path weights, x2 goal weights
        assert_eq!(h[l.state_offset(1)], 0.0);
        assert_eq!(h[l.state_offset(2)], 200.0);
        assert_eq!(h[l.control_offset(1)], 0.2);
    }

    #[test]
    fn test_constraint_jacobian_matches_finite_difference() {
        let nlp = problem(0.2);
        let p = hover_parameters(&nlp);
        let mut w = nlp.initial_guess().clone();
        let l = *nlp.layout();
        w[l.control_offset(0)] = 11.0;
        w[l.control_offset(0) + 2] = 0.7;
        w[l.state_offset(1) + 8] = 0.3;

        let jac = nlp.constraint_jacobian(&w);
        assert_eq!(jac.shape(), (l.num_constraints(), l.len()));

        let h = 1e-6;
        for j in [0, l.control_offset(0), l.control_offset(0) + 2, l.state_offset(1) + 4, l.state_offset(2)] {
            let mut wp = w.clone();
            let mut wm = w.clone();
            wp[j] += h;
            wm[j] -= h;
            let col = (nlp.constraints(&wp, &p) - nlp.constraints(&wm, &p)) / (2.0 * h);
            assert_relative_eq!(jac.column(j).into_owned(), col, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_pack_parameters_rejects_bad_lengths() {
        let nlp = problem(0.3);
        let l = *nlp.layout();
        let x = vec![0.0; l.nx];
        let window = vec![0.0; l.window_len()];

        assert!(nlp.pack_parameters(&x, &window, &x).is_ok());
        assert!(matches!(
            nlp.pack_parameters(&x, &window[1..], &x),
            Err(ConfigurationError::LengthMismatch { what: "reference window", .. })
        ));
        assert!(matches!(
            nlp.pack_parameters(&x[..3], &window, &x),
            Err(ConfigurationError::LengthMismatch { what: "current state", .. })
        ));
    }

    #[test]
    fn test_slices() {
        let nlp = problem(0.2);
        let l = *nlp.layout();
        let current: Vec<f64> = (0..l.nx).map(|i| i as f64).collect();
        let window: Vec<f64> = (0..l.window_len()).map(|i| 100.0 + i as f64).collect();
        let goal: Vec<f64> = (0..l.nx).map(|i| -(i as f64)).collect();
        let p = nlp.pack_parameters(&current, &window, &goal).unwrap();

        assert_eq!(p.len(), l.parameter_len());
        assert_eq!(nlp.current_state(&p)[3], 3.0);
        assert_eq!(nlp.reference_slice(&p, 1)[0], 100.0 + l.slice_len() as f64);
        assert_eq!(nlp.goal_slice(&p)[9], -9.0);
    }

    #[test]
    fn test_rejects_bad_weights_and_bounds() {
        let model = ModelVariant::Full.build(PhysicalConstants::default());

        let mut config = MpcConfig::default();
        config.weights = Some(CostWeights {
            goal: vec![1.0; 3],
            path: vec![1.0; 10],
            control: vec![1.0; 4],
        });
        assert!(matches!(
            NlpBuilder::new(model.clone(), config).build(),
            Err(ConfigurationError::LengthMismatch { what: "goal weights", .. })
        ));

        let mut config = MpcConfig::default();
        config.bounds = Some(ControlBounds::new(vec![20.0, -6.0, -6.0, -6.0], vec![2.0, 6.0, 6.0, 6.0]));
        assert!(matches!(
            NlpBuilder::new(model, config).build(),
            Err(ConfigurationError::InvalidBounds(_))
        ));
    }
}

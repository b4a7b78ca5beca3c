//! NLP solver backends
//!
//! [`NlpBackend`] is the seam between the controller and whatever solves
//! the nonlinear program. The default [`SqpSolver`] runs a Gauss-Newton
//! SQP loop: each iteration linearizes the dynamics constraints and solves
//!
//! ```text
//! minimize    ½ dᵀ H d + ∇fᵀ d
//! subject to  J d = −g
//!             lbw − w ≤ d ≤ ubw − w
//! ```
//!
//! with the Clarabel interior-point solver, then takes a backtracking step
//! on the ℓ₁ merit function `φ = f + μ‖g‖₁`. The objective is quadratic,
//! so `H` is its exact (constant) Hessian. Directions the cost does not
//! weight get a small damping term on the diagonal.
//!
//! The loop stops when the scaled first-order residual
//! `‖∇f + Jᵀλ + ν‖∞` (QP multipliers `λ` for the dynamics and `ν` for the
//! bounds) and the constraint violation are both below `tolerance`, or
//! after `acceptable_iterations` consecutive iterates that are feasible to
//! `acceptable_tolerance` and no longer move the objective.

use std::time::Instant;

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use log::{debug, trace};
use nalgebra::DMatrix;

use quadnmpc_core::VecX;

use crate::config::SolverConfig;
use crate::error::OptimizationFailure;
use crate::ocp::NlpProblem;

/// Solution statistics from the backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveStatistics {
    /// Number of SQP iterations
    pub sqp_iterations: usize,
    /// Total interior-point iterations over all QP subproblems
    pub qp_iterations: usize,
    /// Final objective value
    pub objective: f64,
    /// Final max-norm of the equality constraints
    pub constraint_violation: f64,
    /// Max-norm of the last accepted step
    pub step_norm: f64,
    /// Scaled max-norm of the Lagrangian gradient, infinite until the
    /// first multiplier estimate is available
    pub stationarity: f64,
    /// Wall-clock solve time [ms]
    pub solve_time_ms: f64,
    /// Converged only to the acceptable tolerance
    pub acceptable: bool,
}

/// Converged decision vector
#[derive(Debug, Clone)]
pub struct NlpSolution {
    /// Decision vector `[x₀, u₀, …, x_N]`
    pub w: VecX,
    pub statistics: SolveStatistics,
}

/// Nonlinear program solver
///
/// Bounds and structure are read from the problem; only the initial guess
/// and parameter vector vary between calls.
pub trait NlpBackend: Send {
    fn solve(
        &mut self,
        problem: &NlpProblem,
        initial_guess: &VecX,
        parameters: &VecX,
    ) -> Result<NlpSolution, OptimizationFailure>;

    /// Short name for logs
    fn name(&self) -> &str {
        "nlp"
    }
}

/// Local model of the NLP at the current iterate
struct Linearization {
    gradient: VecX,
    jacobian: DMatrix<f64>,
    residual: VecX,
}

/// Result of one QP subproblem
struct QpStep {
    direction: VecX,
    /// Multipliers of the linearized equality constraints
    multipliers: VecX,
    /// Bound multipliers folded onto the decision variables
    bound_force: VecX,
    iterations: usize,
}

/// Scaled `‖∇f + Jᵀλ + ν‖∞`, with the multiplier scaling IPOPT uses
fn stationarity(lin: &Linearization, multipliers: &VecX, bound_force: &VecX) -> f64 {
    const MAX_SCALE: f64 = 100.0;
    let residual = &lin.gradient + lin.jacobian.tr_mul(multipliers) + bound_force;
    let count = (multipliers.len() + bound_force.len()).max(1) as f64;
    let mean = (multipliers.lp_norm(1) + bound_force.lp_norm(1)) / count;
    residual.amax() / (MAX_SCALE.max(mean) / MAX_SCALE)
}

/// Sequential quadratic programming with Clarabel subproblems
#[derive(Debug, Clone)]
pub struct SqpSolver {
    config: SolverConfig,
}

impl SqpSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn solve_qp(
        &self,
        iteration: usize,
        hessian: &VecX,
        lin: &Linearization,
        w: &VecX,
        problem: &NlpProblem,
    ) -> Result<QpStep, OptimizationFailure> {
        let n = w.len();
        let m = lin.residual.len();
        let lbw = problem.lbw();
        let ubw = problem.ubw();

        let upper: Vec<usize> = (0..n).filter(|&i| ubw[i].is_finite()).collect();
        let lower: Vec<usize> = (0..n).filter(|&i| lbw[i].is_finite()).collect();
        let n_ineq = upper.len() + lower.len();

        // Equalities J d + s = −g with s in the zero cone, then
        // d_i + s = ub_i − w_i and −d_i + s = w_i − lb_i with s ≥ 0
        let mut a = DMatrix::zeros(m + n_ineq, n);
        a.view_mut((0, 0), (m, n)).copy_from(&lin.jacobian);
        let mut b = Vec::with_capacity(m + n_ineq);
        b.extend(lin.residual.iter().map(|g| -g));
        for (row, &i) in upper.iter().enumerate() {
            a[(m + row, i)] = 1.0;
            b.push(ubw[i] - w[i]);
        }
        for (row, &i) in lower.iter().enumerate() {
            a[(m + upper.len() + row, i)] = -1.0;
            b.push(w[i] - lbw[i]);
        }

        let p_csc = diagonal_to_csc(hessian, self.config.regularization, self.config.damping);
        let a_csc = dmatrix_to_csc(&a);
        let q: Vec<f64> = lin.gradient.iter().copied().collect();
        let mut cones = vec![ZeroConeT(m)];
        if n_ineq > 0 {
            cones.push(NonnegativeConeT(n_ineq));
        }

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.config.qp_max_iterations)
            .verbose(false)
            .tol_gap_abs(self.config.qp_tolerance)
            .tol_gap_rel(self.config.qp_tolerance)
            .tol_feas(self.config.qp_tolerance)
            .build()
            .map_err(|e| OptimizationFailure::Setup(format!("{:?}", e)))?;

        let mut solver = DefaultSolver::new(&p_csc, &q, &a_csc, &b, &cones, settings)
            .map_err(|e| OptimizationFailure::Setup(format!("{:?}", e)))?;
        solver.solve();
        let sol = &solver.solution;

        if !matches!(sol.status, SolverStatus::Solved | SolverStatus::AlmostSolved) {
            return Err(OptimizationFailure::QpFailure {
                iteration,
                status: format!("{:?}", sol.status),
            });
        }

        let direction = VecX::from_column_slice(&sol.x);
        if direction.iter().any(|v| !v.is_finite()) {
            return Err(OptimizationFailure::NumericalBreakdown(format!(
                "non-finite QP step at iteration {}",
                iteration
            )));
        }

        let mut bound_force = VecX::zeros(n);
        for (row, &i) in upper.iter().enumerate() {
            bound_force[i] += sol.z[m + row];
        }
        for (row, &i) in lower.iter().enumerate() {
            bound_force[i] -= sol.z[m + upper.len() + row];
        }

        Ok(QpStep {
            direction,
            multipliers: VecX::from_column_slice(&sol.z[..m]),
            bound_force,
            iterations: sol.iterations as usize,
        })
    }
}

impl Default for SqpSolver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl NlpBackend for SqpSolver {
    fn solve(
        &mut self,
        problem: &NlpProblem,
        initial_guess: &VecX,
        parameters: &VecX,
    ) -> Result<NlpSolution, OptimizationFailure> {
        let start = Instant::now();
        let layout = problem.layout();
        if initial_guess.len() != layout.len() || parameters.len() != layout.parameter_len() {
            return Err(OptimizationFailure::Setup(format!(
                "initial guess/parameters have lengths {}/{}, expected {}/{}",
                initial_guess.len(),
                parameters.len(),
                layout.len(),
                layout.parameter_len()
            )));
        }

        let hessian = problem.hessian_diagonal();
        let mut w = problem.clamp_to_bounds(initial_guess);
        let mut f = problem.objective(&w, parameters);
        let mut g = problem.constraints(&w, parameters);
        let mut penalty = 1.0_f64;
        let mut duals: Option<(VecX, VecX)> = None;
        let mut acceptable_streak = 0;
        let mut stats = SolveStatistics {
            stationarity: f64::INFINITY,
            ..SolveStatistics::default()
        };

        for iteration in 1..=self.config.max_iterations {
            if !f.is_finite() || g.iter().any(|v| !v.is_finite()) {
                return Err(OptimizationFailure::NumericalBreakdown(format!(
                    "non-finite objective or constraints at iteration {}",
                    iteration
                )));
            }

            let lin = Linearization {
                gradient: problem.objective_gradient(&w, parameters),
                jacobian: problem.constraint_jacobian(&w),
                residual: g.clone(),
            };

            // Multipliers from the previous QP measure optimality at the new iterate
            if let Some((multipliers, bound_force)) = &duals {
                stats.stationarity = stationarity(&lin, multipliers, bound_force);
                if stats.stationarity < self.config.tolerance
                    && stats.constraint_violation < self.config.tolerance
                {
                    stats.solve_time_ms = start.elapsed().as_secs_f64() * 1e3;
                    debug!(
                        "sqp converged in {} iterations ({} qp), f={:.4e}, stationarity {:.3e}",
                        stats.sqp_iterations, stats.qp_iterations, f, stats.stationarity
                    );
                    return Ok(NlpSolution { w, statistics: stats });
                }
            }

            let qp = self.solve_qp(iteration, &hessian, &lin, &w, problem)?;
            stats.qp_iterations += qp.iterations;

            // ℓ₁ merit needs μ > ‖λ‖∞ for the QP step to be a descent direction
            penalty = penalty.max(1.1 * qp.multipliers.amax() + 1e-3);
            let violation_l1 = g.lp_norm(1);
            let merit = f + penalty * violation_l1;
            let slope = lin.gradient.dot(&qp.direction) - penalty * violation_l1;

            let mut alpha = 1.0;
            let (w_next, f_next, g_next) = loop {
                let trial = &w + &qp.direction * alpha;
                let f_trial = problem.objective(&trial, parameters);
                let g_trial = problem.constraints(&trial, parameters);
                let merit_trial = f_trial + penalty * g_trial.lp_norm(1);

                if slope >= -1e-12 || merit_trial <= merit + self.config.armijo * alpha * slope {
                    break (trial, f_trial, g_trial);
                }
                alpha *= 0.5;
                if alpha < self.config.min_step {
                    return Err(OptimizationFailure::LineSearch(iteration));
                }
            };

            let step_norm = alpha * qp.direction.amax();
            let objective_change = (f_next - f).abs() / f.abs().max(1.0);
            w = w_next;
            f = f_next;
            g = g_next;

            let violation = g.amax();
            trace!(
                "sqp iter {}: f={:.6e} |g|={:.3e} |d|={:.3e} df={:.3e} alpha={} mu={:.3e}",
                iteration, f, violation, step_norm, objective_change, alpha, penalty
            );

            stats.sqp_iterations = iteration;
            stats.objective = f;
            stats.constraint_violation = violation;
            stats.step_norm = step_norm;
            duals = Some((qp.multipliers, qp.bound_force));

            if step_norm < self.config.tolerance && violation < self.config.tolerance {
                stats.solve_time_ms = start.elapsed().as_secs_f64() * 1e3;
                debug!(
                    "sqp converged in {} iterations ({} qp), f={:.4e}",
                    stats.sqp_iterations, stats.qp_iterations, f
                );
                return Ok(NlpSolution { w, statistics: stats });
            }

            let stalled = objective_change <= self.config.acceptable_objective_change
                || stats.stationarity < self.config.acceptable_tolerance;
            if violation < self.config.acceptable_tolerance && stalled {
                acceptable_streak += 1;
            } else {
                acceptable_streak = 0;
            }
            if acceptable_streak >= self.config.acceptable_iterations {
                stats.acceptable = true;
                stats.solve_time_ms = start.elapsed().as_secs_f64() * 1e3;
                debug!(
                    "sqp stopped at acceptable point after {} iterations, f={:.4e}",
                    stats.sqp_iterations, f
                );
                return Ok(NlpSolution { w, statistics: stats });
            }
        }

        let settled = stats.step_norm < self.config.acceptable_tolerance
            || stats.stationarity < self.config.acceptable_tolerance;
        if settled && stats.constraint_violation < self.config.acceptable_tolerance {
            stats.acceptable = true;
            stats.solve_time_ms = start.elapsed().as_secs_f64() * 1e3;
            debug!("sqp stopped at acceptable point after {} iterations", stats.sqp_iterations);
            return Ok(NlpSolution { w, statistics: stats });
        }

        Err(OptimizationFailure::MaxIterations {
            iterations: self.config.max_iterations,
            violation: stats.constraint_violation,
        })
    }

    fn name(&self) -> &str {
        "sqp-clarabel"
    }
}

/// Diagonal Hessian as an upper-triangular CSC matrix
///
/// `damping` is added only where the cost has no curvature.
fn diagonal_to_csc(diag: &VecX, regularization: f64, damping: f64) -> CscMatrix<f64> {
    let n = diag.len();
    let colptr: Vec<usize> = (0..=n).collect();
    let rowval: Vec<usize> = (0..n).collect();
    let nzval: Vec<f64> = diag
        .iter()
        .map(|&h| if h == 0.0 { h + regularization + damping } else { h + regularization })
        .collect();
    CscMatrix::new(n, n, colptr, rowval, nzval)
}

/// Convert a nalgebra `DMatrix<f64>` to a Clarabel `CscMatrix<f64>`
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MpcConfig;
    use crate::ocp::{NlpBuilder, REFERENCE_AUX};
    use approx::assert_relative_eq;
    use quadnmpc_core::dynamics::{ModelVariant, PhysicalConstants};
    use quadnmpc_core::GRAVITY;

    fn problem(variant: ModelVariant, horizon_time: f64) -> NlpProblem {
        let model = variant.build(PhysicalConstants::default());
        let mut config = MpcConfig::for_model(variant);
        config.horizon.horizon_time = horizon_time;
        NlpBuilder::new(model, config).build().unwrap()
    }

    fn parameters(nlp: &NlpProblem, goal: &VecX) -> VecX {
        let hover = nlp.transition().model().hover_state();
        let mut slice = hover.as_slice().to_vec();
        slice.extend([0.0; REFERENCE_AUX]);
        let window: Vec<f64> = slice
            .iter()
            .cycle()
            .take(nlp.layout().window_len())
            .copied()
            .collect();
        nlp.pack_parameters(hover.as_slice(), &window, goal.as_slice()).unwrap()
    }

    #[test]
    fn test_csc_conversion() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 2.0, 0.0, 3.0, 0.0]);
        let csc = dmatrix_to_csc(&m);

        assert_eq!(csc.colptr, vec![0, 1, 2, 3]);
        assert_eq!(csc.rowval, vec![0, 1, 0]);
        assert_eq!(csc.nzval, vec![1.0, 3.0, 2.0]);
    }

    #[test]
    fn test_damping_only_on_unweighted_entries() {
        let h = VecX::from_vec(vec![0.0, 2.0, 0.0]);
        let csc = diagonal_to_csc(&h, 1e-8, 1e-4);

        assert_eq!(csc.colptr, vec![0, 1, 2, 3]);
        assert_relative_eq!(csc.nzval[0], 1e-4 + 1e-8, epsilon = 1e-15);
        assert_relative_eq!(csc.nzval[1], 2.0 + 1e-8, epsilon = 1e-15);
        assert_relative_eq!(csc.nzval[2], 1e-4 + 1e-8, epsilon = 1e-15);
    }

    #[test]
    fn test_stationarity_residual() {
        // ∇f = [1, 1, 3]; one constraint on w₀ + w₁, an upper bound active on w₂
        let lin = Linearization {
            gradient: VecX::from_vec(vec![1.0, 1.0, 3.0]),
            jacobian: DMatrix::from_row_slice(1, 3, &[1.0, 1.0, 0.0]),
            residual: VecX::zeros(1),
        };
        let bound_force = VecX::from_vec(vec![0.0, 0.0, -3.0]);

        let at_kkt = stationarity(&lin, &VecX::from_vec(vec![-1.0]), &bound_force);
        assert!(at_kkt < 1e-12);

        // without the bound multiplier ∂L/∂w₂ = 3
        let off = stationarity(&lin, &VecX::from_vec(vec![-1.0]), &VecX::zeros(3));
        assert_relative_eq!(off, 3.0, epsilon = 1e-12);

        // large multipliers scale the residual down
        let scaled = stationarity(&lin, &VecX::from_vec(vec![-1000.0]), &VecX::zeros(3));
        assert_relative_eq!(scaled, 999.0 / (1000.0 / 4.0 / 100.0), epsilon = 1e-9);
    }

    #[test]
    fn test_hover_seed_converges_immediately() {
        let nlp = problem(ModelVariant::Full, 0.5);
        let hover = nlp.transition().model().hover_state();
        let p = parameters(&nlp, &hover);

        let sol = SqpSolver::default().solve(&nlp, nlp.initial_guess(), &p).unwrap();

        assert!(sol.statistics.sqp_iterations <= 2);
        assert_relative_eq!(sol.w, nlp.initial_guess().clone(), epsilon = 1e-6);
    }

    #[test]
    fn test_single_stage_closed_form() {
        // One stage, goal 1 m above hover. With zero rates the thrust
        // acceleration a = T − g is constant and RK4 is exact, so
        //   z₁ = ½ a dt², vz₁ = a dt
        // and the cost 100 (z₁ − 1)² + 10 vz₁² + 0.1 a² is minimized at
        //   a = 100 dt² / (50 dt⁴ + 20 dt² + 0.2)
        let nlp = problem(ModelVariant::Full, 0.1);
        assert_eq!(nlp.layout().horizon, 1);

        let mut goal = nlp.transition().model().hover_state();
        goal[2] = 1.0;
        goal[3] = 0.0;
        let p = parameters(&nlp, &goal);

        let sol = SqpSolver::default().solve(&nlp, nlp.initial_guess(), &p).unwrap();
        let u = nlp.layout().control(&sol.w, 0);

        let dt: f64 = 0.1;
        let a = 100.0 * dt.powi(2) / (50.0 * dt.powi(4) + 20.0 * dt.powi(2) + 0.2);
        assert_relative_eq!(u[0], GRAVITY + a, epsilon = 1e-4);
        for i in 1..4 {
            assert_relative_eq!(u[i], 0.0, epsilon = 1e-5);
        }
        assert!(sol.statistics.constraint_violation < 1e-6);
    }

    #[test]
    fn test_thrust_saturates_at_bound() {
        let nlp = problem(ModelVariant::Full, 0.5);
        let mut goal = nlp.transition().model().hover_state();
        goal[2] = 20.0;
        let p = parameters(&nlp, &goal);

        let sol = SqpSolver::default().solve(&nlp, nlp.initial_guess(), &p).unwrap();
        let l = nlp.layout();

        for k in 0..l.horizon {
            let u = l.control(&sol.w, k);
            assert!(nlp.control_bounds().contains(u.as_slice(), 1e-6), "stage {}: {:?}", k, u);
        }
        assert_relative_eq!(l.control(&sol.w, 0)[0], 20.0, epsilon = 1e-4);
    }

    #[test]
    fn test_simplified_model_climb() {
        let nlp = problem(ModelVariant::Simplified, 0.5);
        let mut goal = nlp.transition().model().hover_state();
        goal[2] = 0.5;
        let p = parameters(&nlp, &goal);

        let sol = SqpSolver::default().solve(&nlp, nlp.initial_guess(), &p).unwrap();
        let u0 = nlp.layout().control(&sol.w, 0);
        let hover = nlp.hover_control();

        assert!(u0[0] > hover[0]);
        assert!(sol.statistics.constraint_violation < 1e-6);
    }

    #[test]
    fn test_iteration_cap() {
        let nlp = problem(ModelVariant::Full, 1.0);
        let mut goal = nlp.transition().model().hover_state();
        goal[0] = 3.0;
        goal[2] = 2.0;
        let p = parameters(&nlp, &goal);

        let mut solver = SqpSolver::new(SolverConfig {
            max_iterations: 1,
            tolerance: 1e-12,
            acceptable_tolerance: 1e-12,
            ..SolverConfig::default()
        });
        let err = solver.solve(&nlp, nlp.initial_guess(), &p).unwrap_err();

        assert!(matches!(err, OptimizationFailure::MaxIterations { iterations: 1, .. }));
    }

    #[test]
    fn test_wrong_guess_length() {
        let nlp = problem(ModelVariant::Full, 0.3);
        let p = parameters(&nlp, &nlp.transition().model().hover_state());
        let err = SqpSolver::default()
            .solve(&nlp, &VecX::zeros(3), &p)
            .unwrap_err();

        assert!(matches!(err, OptimizationFailure::Setup(_)));
    }
}

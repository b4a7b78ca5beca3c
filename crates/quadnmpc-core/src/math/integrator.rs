//! Numerical integration methods
//!
//! Fixed-step Runge-Kutta schemes for time-invariant ODEs `ẋ = f(x)`.
//! The control input is held constant over a step, so callers close
//! over it when building `f`.

use nalgebra::DVector;

/// Single classical RK4 step
///
/// # Arguments
/// * `x` - Current state
/// * `dt` - Time step
/// * `f` - Derivative function f(x) -> dx/dt
pub fn rk4<F>(x: &DVector<f64>, dt: f64, f: F) -> DVector<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let k1 = f(x) * dt;
    let k2 = f(&(x + &k1 * 0.5)) * dt;
    let k3 = f(&(x + &k2 * 0.5)) * dt;
    let k4 = f(&(x + &k3)) * dt;

    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) / 6.0
}

/// RK4 with `refinement` equal sub-steps over `dt`
///
/// Higher refinement reduces the local truncation error (O((dt/M)^5) per
/// sub-step) at proportional cost. There is no error feedback.
pub fn rk4_refined<F>(x: &DVector<f64>, dt: f64, refinement: usize, f: F) -> DVector<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let m = refinement.max(1);
    let h = dt / m as f64;

    let mut state = x.clone();
    for _ in 0..m {
        state = rk4(&state, h, &f);
    }
    state
}

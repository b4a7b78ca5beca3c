//! Quaternion kinematics on raw `[w, x, y, z]` components
//!
//! The prediction model carries the attitude quaternion as four plain
//! state components. Nothing renormalizes them between integration steps,
//! so these helpers never assume unit norm.

use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3, Vector4};

/// Quaternion derivative `q̇ = ½ Λ(q) [0; ω]`
///
/// # Arguments
/// * `q` - Attitude as `[w, x, y, z]`
/// * `omega` - Body angular rate [rad/s]
///
/// # Returns
/// Quaternion derivative as `[ẇ, ẋ, ẏ, ż]`
pub fn quaternion_derivative(q: &Vector4<f64>, omega: &Vector3<f64>) -> Vector4<f64> {
    let (w, x, y, z) = (q[0], q[1], q[2], q[3]);

    // Λ(q): left multiplication matrix, q ⊗ p = Λ(q) p
    let lambda = Matrix4::new(
        w, -x, -y, -z,
        x,  w, -z,  y,
        y,  z,  w, -x,
        z, -y,  x,  w,
    );

    0.5 * lambda * Vector4::new(0.0, omega.x, omega.y, omega.z)
}

/// Body z-axis expressed in the world frame, `R(q) e₃`
///
/// Uses the polynomial form of the rotation matrix so that a non-unit
/// `q` scales the axis instead of being silently normalized.
pub fn body_z_axis(q: &Vector4<f64>) -> Vector3<f64> {
    let (w, x, y, z) = (q[0], q[1], q[2], q[3]);
    Vector3::new(
        2.0 * (w * y + x * z),
        2.0 * (y * z - w * x),
        w * w - x * x - y * y + z * z,
    )
}

/// Pack a unit quaternion as `[w, x, y, z]`
pub fn quaternion_to_vector(q: &UnitQuaternion<f64>) -> Vector4<f64> {
    Vector4::new(q.w, q.i, q.j, q.k)
}

/// Normalize raw components into a unit quaternion
///
/// Returns `None` for a (near) zero quaternion.
pub fn quaternion_from_vector(v: &Vector4<f64>) -> Option<UnitQuaternion<f64>> {
    let q = Quaternion::new(v[0], v[1], v[2], v[3]);
    if q.norm() < 1e-12 {
        return None;
    }
    Some(UnitQuaternion::from_quaternion(q))
}

/// Angle between the body z-axis and world z-axis [rad]
pub fn tilt_angle(q: &UnitQuaternion<f64>) -> f64 {
    let z_body = q.transform_vector(&Vector3::z());
    z_body.z.clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_quaternion_derivative_zero_rate() {
        let q = Vector4::new(1.0, 0.0, 0.0, 0.0);
        let q_dot = quaternion_derivative(&q, &Vector3::zeros());

        assert_relative_eq!(q_dot.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quaternion_derivative_yaw_rate() {
        // Identity attitude rotating about z at 1 rad/s: q̇ = ½ [0, 0, 0, 1]
        let q = Vector4::new(1.0, 0.0, 0.0, 0.0);
        let q_dot = quaternion_derivative(&q, &Vector3::new(0.0, 0.0, 1.0));

        assert_relative_eq!(q_dot, Vector4::new(0.0, 0.0, 0.0, 0.5), epsilon = 1e-12);
    }

    #[test]
    fn test_quaternion_derivative_matches_component_form() {
        // Component form used by the prediction model
        let q = Vector4::new(0.9, 0.1, -0.3, 0.2);
        let w = Vector3::new(0.4, -1.2, 2.0);
        let (qw, qx, qy, qz) = (q[0], q[1], q[2], q[3]);
        let expected = Vector4::new(
            0.5 * (-w.x * qx - w.y * qy - w.z * qz),
            0.5 * (w.x * qw + w.z * qy - w.y * qz),
            0.5 * (w.y * qw - w.z * qx + w.x * qz),
            0.5 * (w.z * qw + w.y * qx - w.x * qy),
        );

        assert_relative_eq!(quaternion_derivative(&q, &w), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_body_z_axis_matches_rotation() {
        let q = UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1);
        let expected = q.transform_vector(&Vector3::z());

        assert_relative_eq!(body_z_axis(&quaternion_to_vector(&q)), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_tilt_angle() {
        let level = UnitQuaternion::identity();
        let rolled = UnitQuaternion::from_euler_angles(PI / 4.0, 0.0, 0.0);

        assert_relative_eq!(tilt_angle(&level), 0.0, epsilon = 1e-12);
        assert_relative_eq!(tilt_angle(&rolled), PI / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_quaternion_rejected() {
        assert!(quaternion_from_vector(&Vector4::zeros()).is_none());
    }
}

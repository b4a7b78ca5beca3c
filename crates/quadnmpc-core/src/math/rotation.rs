//! Euler-angle rotation utilities
//!
//! ZYX (yaw-pitch-roll) convention, as used by the simplified
//! quadrotor model.

use nalgebra::{Matrix3, Vector3};

/// Rotation matrix from ZYX Euler angles, `R = Rz(yaw) Ry(pitch) Rx(roll)`
pub fn rotation_from_euler(roll: f64, pitch: f64, yaw: f64) -> Matrix3<f64> {
    let (sr, cr) = roll.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    let (sy, cy) = yaw.sin_cos();

    Matrix3::new(
        cy * cp, cy * sp * sr - sy * cr, cy * sp * cr + sy * sr,
        sy * cp, sy * sp * sr + cy * cr, sy * sp * cr - cy * sr,
        -sp,     cp * sr,                cp * cr,
    )
}

/// Thrust direction (body z-axis in world frame) for ZYX Euler angles
///
/// Third column of [`rotation_from_euler`].
pub fn thrust_direction_from_euler(roll: f64, pitch: f64, yaw: f64) -> Vector3<f64> {
    let (sr, cr) = roll.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    let (sy, cy) = yaw.sin_cos();

    Vector3::new(
        cy * sp * cr + sr * sy,
        cr * sy * sp - cy * sr,
        cr * cp,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    #[test]
    fn test_identity_at_zero_angles() {
        assert_relative_eq!(rotation_from_euler(0.0, 0.0, 0.0), Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_matches_nalgebra_convention() {
        let (roll, pitch, yaw) = (0.2, -0.4, 1.3);
        let expected = Rotation3::from_euler_angles(roll, pitch, yaw);

        assert_relative_eq!(rotation_from_euler(roll, pitch, yaw), *expected.matrix(), epsilon = 1e-12);
    }

    #[test]
    fn test_thrust_direction_is_third_column() {
        let (roll, pitch, yaw) = (0.3, 0.1, -0.7);
        let r = rotation_from_euler(roll, pitch, yaw);

        assert_relative_eq!(
            thrust_direction_from_euler(roll, pitch, yaw),
            r.column(2).into_owned(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_rotation_is_orthonormal() {
        let r = rotation_from_euler(0.5, -0.3, 2.0);

        assert_relative_eq!(r.transpose() * r, Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }
}

/// Quaternion helpers: centering rotation and Euler extraction
use core::f64::consts::PI;

use nalgebra::{UnitQuaternion, Vector3};

/// Accelerometer vectors shorter than this carry no usable gravity direction
const MIN_GRAVITY_NORM: f64 = 1e-6;

/// Roll / pitch / yaw in radians
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrientationAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl OrientationAngles {
    /// Angles as an array in logical axis order (roll, pitch, yaw)
    pub fn as_array(&self) -> [f64; 3] {
        [self.roll, self.pitch, self.yaw]
    }

    /// Same angles in degrees, for logs
    pub fn degrees(&self) -> [f64; 3] {
        [
            self.roll.to_degrees(),
            self.pitch.to_degrees(),
            self.yaw.to_degrees(),
        ]
    }
}

/// Rotation taking the measured gravity vector onto +Z
///
/// Returns None for a (near) zero vector. A vector pointing straight down
/// is turned over about X.
pub fn rotation_to_vertical(accel: &Vector3<f64>) -> Option<UnitQuaternion<f64>> {
    if accel.norm() < MIN_GRAVITY_NORM {
        return None;
    }
    let up = Vector3::z();
    let rotation = UnitQuaternion::rotation_between(accel, &up)
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI));
    Some(rotation)
}

/// Quaternion to roll / pitch / yaw
///
/// # Conventions
/// * `roll = atan2(2(wx + yz), 1 - 2(x² + y²))`
/// * `pitch = asin(2(wy - xz))`, argument clamped to [-1, 1]
/// * `yaw = atan2(2(xy + wz), 1 - 2(y² + z²))`
pub fn euler_angles(q: &UnitQuaternion<f64>) -> OrientationAngles {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);

    let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
    let pitch = (2.0 * (w * y - x * z)).clamp(-1.0, 1.0).asin();
    let yaw = (2.0 * (x * y + w * z)).atan2(1.0 - 2.0 * (y * y + z * z));

    OrientationAngles { roll, pitch, yaw }
}

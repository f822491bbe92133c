//! Madgwick gradient-descent orientation filter
//!
//! 6-DOF variant: gyro integration corrected toward the accelerometer's
//! gravity direction. Yaw is gyro-only and drifts with residual bias, which
//! is why the gyro calibrator runs continuously underneath.
//!
//! Reference: S. Madgwick, "An efficient orientation filter for inertial and
//! inertial/magnetic sensor arrays", 2010.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Gradients below this are rounding noise, not a gravity error
const MIN_STEP_NORM: f64 = 1e-9;

/// Madgwick filter state
///
/// Gyro in rad/s, accelerometer in any consistent unit (it is normalized).
/// At rest and level the accelerometer must read +Z.
#[derive(Debug, Clone)]
pub struct Madgwick {
    /// Integration step (seconds)
    sample_period: f64,
    /// Gradient step gain
    beta: f64,
    quat: UnitQuaternion<f64>,
}

impl Madgwick {
    /// Create a filter at identity orientation
    ///
    /// # Arguments
    /// * `sample_period` - Fixed update interval in seconds (e.g., 0.02)
    /// * `beta` - Accelerometer correction gain (e.g., 0.025)
    pub fn new(sample_period: f64, beta: f64) -> Self {
        Self {
            sample_period,
            beta,
            quat: UnitQuaternion::identity(),
        }
    }

    pub fn quaternion(&self) -> &UnitQuaternion<f64> {
        &self.quat
    }

    /// Back to identity
    pub fn reset(&mut self) {
        self.quat = UnitQuaternion::identity();
    }

    /// One fixed-step update from gyro and accelerometer
    ///
    /// A zero accelerometer vector skips the correction and only integrates
    /// the gyro.
    pub fn update_imu(&mut self, gyro: &Vector3<f64>, accel: &Vector3<f64>) {
        let q = self.quat.into_inner();
        let (q0, q1, q2, q3) = (q.w, q.i, q.j, q.k);

        // Rate of change from the gyroscope
        let mut q_dot = q * Quaternion::new(0.0, gyro.x, gyro.y, gyro.z) * 0.5;

        if let Some(a) = accel.try_normalize(0.0) {
            // Objective: predicted gravity minus measured gravity
            let f0 = 2.0 * (q1 * q3 - q0 * q2) - a.x;
            let f1 = 2.0 * (q0 * q1 + q2 * q3) - a.y;
            let f2 = 2.0 * (0.5 - q1 * q1 - q2 * q2) - a.z;

            // Jacobian transpose times objective
            let step = Quaternion::new(
                -2.0 * q2 * f0 + 2.0 * q1 * f1,
                2.0 * q3 * f0 + 2.0 * q0 * f1 - 4.0 * q1 * f2,
                -2.0 * q0 * f0 + 2.0 * q3 * f1 - 4.0 * q2 * f2,
                2.0 * q1 * f0 + 2.0 * q2 * f1,
            );
            let norm = step.norm();
            if norm > MIN_STEP_NORM {
                q_dot -= step * (self.beta / norm);
            }
        }

        let next = q + q_dot * self.sample_period;
        if next.coords.iter().all(|c| c.is_finite()) && next.norm() > 0.0 {
            self.quat = UnitQuaternion::from_quaternion(next);
        }
    }
}

//! Orientation Estimator
//!
//! Owns the IMU, the gyro calibrator and the Madgwick filter, and turns
//! one raw sample per tick into centered roll / pitch / yaw.
//!
//! ## Centering
//!
//! `reset()` captures the rotation that takes the current gravity vector to
//! +Z. Every later sample is rotated by it before fusion, so the pose at the
//! moment of reset reads as zero on all axes and the filter restarts from
//! identity.
//!
//! ## Failure handling
//!
//! A failed sensor read returns the error and leaves calibration, the
//! centering rotation and the filter quaternion exactly as they were.

use nalgebra::{UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::calibration::{GyroCalConfig, GyroCalibrator};
use crate::filter::Madgwick;
use crate::sensors::{BoardProfile, InertialSensor, SensorError};
use crate::transforms::{euler_angles, rotation_to_vertical, OrientationAngles};

/// Configuration for orientation fusion
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FusionConfig {
    /// Madgwick gain
    pub beta: f64,
    /// Fixed tick of the sampling loop (seconds)
    pub sample_period_s: f64,
    /// Keep learning gyro bias during normal updates
    pub track_bias: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            beta: 0.025,
            sample_period_s: 0.02, // 50 Hz
            track_bias: true,
        }
    }
}

/// Orientation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OrientationError {
    #[error("sensor read failed: {0}")]
    Sensor(#[from] SensorError),
    #[error("no gravity vector to center on")]
    NoGravity,
}

/// Centered quaternion fusion over an owned IMU
pub struct OrientationEstimator<S> {
    sensor: S,
    board: BoardProfile,
    config: FusionConfig,
    calibrator: GyroCalibrator,
    filter: Madgwick,
    /// Rotation captured at the last reset
    offset: UnitQuaternion<f64>,
}

impl<S: InertialSensor> OrientationEstimator<S> {
    pub fn new(
        sensor: S,
        board: BoardProfile,
        config: FusionConfig,
        cal_config: GyroCalConfig,
    ) -> Self {
        Self {
            sensor,
            board,
            config,
            calibrator: GyroCalibrator::new(cal_config),
            filter: Madgwick::new(config.sample_period_s, config.beta),
            offset: UnitQuaternion::identity(),
        }
    }

    /// Make the current pose the zero orientation
    pub fn reset(&mut self) -> Result<(), OrientationError> {
        let sample = self.sensor.read()?;
        let accel = self.accel_vector(sample.accel);
        let offset = rotation_to_vertical(&accel).ok_or(OrientationError::NoGravity)?;

        self.offset = offset;
        self.filter.reset();
        Ok(())
    }

    /// One fusion step from a fresh sample
    pub fn update(&mut self) -> Result<(), OrientationError> {
        let sample = self.sensor.read()?;

        if self.config.track_bias {
            self.calibrator.apply(sample.gyro);
        }
        let gyro = self.gyro_vector(self.calibrator.get(sample.gyro));
        let accel = self.accel_vector(sample.accel);

        let gyro = self.offset * gyro;
        let accel = self.offset * accel;
        self.filter.update_imu(&gyro, &accel);
        Ok(())
    }

    /// Warm-up step: feed the calibrator only, return last corrections
    pub fn calibrate(&mut self) -> Result<[i32; 3], OrientationError> {
        let sample = self.sensor.read()?;
        self.calibrator.apply(sample.gyro);
        Ok(self.calibrator.last_corrections())
    }

    pub fn angles(&self) -> OrientationAngles {
        euler_angles(self.filter.quaternion())
    }

    pub fn quaternion(&self) -> &UnitQuaternion<f64> {
        self.filter.quaternion()
    }

    pub fn is_stable(&self) -> bool {
        self.calibrator.is_stable()
    }

    pub fn set_stable(&mut self, stable: bool) {
        self.calibrator.set_stable(stable);
    }

    pub fn calibrator(&self) -> &GyroCalibrator {
        &self.calibrator
    }

    pub fn calibrator_mut(&mut self) -> &mut GyroCalibrator {
        &mut self.calibrator
    }

    /// Poll the sensor's tap detector
    pub fn tapped(&mut self) -> bool {
        self.sensor.read_tap()
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    /// Gyro in rad/s, board signs applied
    fn gyro_vector(&self, raw: [i32; 3]) -> Vector3<f64> {
        Vector3::from(BoardProfile::scale(raw, self.board.gyro_signs())) * core::f64::consts::PI
            / 180.0
    }

    /// Accel in g, board signs applied
    fn accel_vector(&self, raw: [i32; 3]) -> Vector3<f64> {
        Vector3::from(BoardProfile::scale(raw, self.board.accel_signs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::RawSample;

    /// Scripted sensor: fixed sample, optional failure
    struct FakeImu {
        sample: RawSample,
        fail: bool,
        tap: bool,
    }

    impl FakeImu {
        fn new(gyro: [i32; 3], accel: [i32; 3]) -> Self {
            Self {
                sample: RawSample { gyro, accel },
                fail: false,
                tap: false,
            }
        }
    }

    impl InertialSensor for FakeImu {
        fn read(&mut self) -> Result<RawSample, SensorError> {
            if self.fail {
                Err(SensorError::Bus("i2c nack"))
            } else {
                Ok(self.sample)
            }
        }

        fn read_tap(&mut self) -> bool {
            core::mem::take(&mut self.tap)
        }
    }

    fn estimator(imu: FakeImu) -> OrientationEstimator<FakeImu> {
        OrientationEstimator::new(
            imu,
            BoardProfile::Identity,
            FusionConfig::default(),
            GyroCalConfig::default(),
        )
    }

    fn assert_centered(est: &OrientationEstimator<FakeImu>) {
        let a = est.angles();
        assert!(a.roll.abs() < 1e-3, "roll {}", a.roll);
        assert!(a.pitch.abs() < 1e-3, "pitch {}", a.pitch);
        assert!(a.yaw.abs() < 1e-3, "yaw {}", a.yaw);
    }

    #[test]
    fn test_reset_then_update_is_centered() {
        // Various head poses, all in micro-g
        let poses = [
            [0, 0, 1_000_000],
            [500_000, 0, 866_025],
            [0, -707_107, 707_107],
            [300_000, 400_000, -866_025],
            [0, 0, -1_000_000],
            [1_000_000, 0, 0],
        ];
        for accel in poses {
            let mut est = estimator(FakeImu::new([200_000, -100_000, 50_000], accel));
            est.reset().unwrap();
            est.update().unwrap();
            assert_centered(&est);
        }
    }

    #[test]
    fn test_reset_on_board_with_flipped_axes() {
        let mut est = OrientationEstimator::new(
            FakeImu::new([0, 0, 0], [250_000, -250_000, 930_000]),
            BoardProfile::XiaoBle,
            FusionConfig::default(),
            GyroCalConfig::default(),
        );
        est.reset().unwrap();
        for _ in 0..100 {
            est.update().unwrap();
        }
        assert_centered(&est);
    }

    #[test]
    fn test_tilt_after_reset_shows_up() {
        let mut est = OrientationEstimator::new(
            FakeImu::new([0, 0, 0], [0, 0, 1_000_000]),
            BoardProfile::Identity,
            FusionConfig {
                beta: 0.1,
                ..FusionConfig::default()
            },
            GyroCalConfig::default(),
        );
        est.reset().unwrap();

        // Head rolls 20 degrees
        let roll = 20f64.to_radians();
        est.sensor_mut().sample.accel = [
            0,
            (roll.sin() * 1_000_000.0) as i32,
            (roll.cos() * 1_000_000.0) as i32,
        ];
        for _ in 0..2000 {
            est.update().unwrap();
        }
        let a = est.angles();
        assert!((a.roll - roll).abs() < 0.01, "roll {}", a.roll);
        assert!(a.pitch.abs() < 0.01);
    }

    #[test]
    fn test_gyro_rate_integrates_yaw() {
        // 45 deg/s yaw for one second, bias tracking off
        let mut est = OrientationEstimator::new(
            FakeImu::new([0, 0, 45_000_000], [0, 0, 1_000_000]),
            BoardProfile::Identity,
            FusionConfig {
                track_bias: false,
                ..FusionConfig::default()
            },
            GyroCalConfig::default(),
        );
        for _ in 0..50 {
            est.update().unwrap();
        }
        let yaw = est.angles().yaw.to_degrees();
        assert!((yaw - 45.0).abs() < 0.5, "yaw {}", yaw);
    }

    #[test]
    fn test_sensor_failure_leaves_state() {
        let mut est = estimator(FakeImu::new([1_000_000, 0, 0], [0, 0, 1_000_000]));
        est.reset().unwrap();
        for _ in 0..10 {
            est.update().unwrap();
        }
        let q = *est.quaternion();
        let offsets = est.calibrator().offsets();

        est.sensor_mut().fail = true;
        assert_eq!(
            est.update(),
            Err(OrientationError::Sensor(SensorError::Bus("i2c nack")))
        );
        assert!(est.reset().is_err());
        assert!(est.calibrate().is_err());
        assert_eq!(*est.quaternion(), q);
        assert_eq!(est.calibrator().offsets(), offsets);
    }

    #[test]
    fn test_reset_without_gravity() {
        let mut est = estimator(FakeImu::new([0, 0, 0], [0, 0, 0]));
        assert_eq!(est.reset(), Err(OrientationError::NoGravity));
    }

    #[test]
    fn test_calibrate_drives_calibrator_only() {
        let mut est = estimator(FakeImu::new([400_000, 400_000, 400_000], [0, 0, 1_000_000]));
        let mut last = [0; 3];
        for _ in 0..1001 * 15 {
            last = est.calibrate().unwrap();
        }
        assert!(est.is_stable());
        assert!(last.iter().all(|c| c.abs() < 100_000));
        assert!((est.calibrator().offsets()[0] - 400_000).abs() < 1000);
        // Fusion never ran
        assert_eq!(*est.quaternion(), UnitQuaternion::identity());
    }

    #[test]
    fn test_update_uses_bias_correction() {
        let mut est = estimator(FakeImu::new([2_000_000, 0, 0], [0, 0, 1_000_000]));
        est.calibrator_mut().set_offsets([2_000_000, 0, 0]);
        for _ in 0..100 {
            est.update().unwrap();
        }
        assert!(est.angles().roll.abs() < 1e-6);
    }

    #[test]
    fn test_stable_proxy_and_tap() {
        let mut est = estimator(FakeImu::new([0, 0, 0], [0, 0, 1_000_000]));
        assert!(!est.is_stable());
        est.set_stable(true);
        assert!(est.is_stable());

        est.sensor_mut().tap = true;
        assert!(est.tapped());
        assert!(!est.tapped());
    }
}

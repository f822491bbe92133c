//! Simulated head-mounted IMU
//!
//! Deterministic stand-in for the real sensor, used by the host build of
//! the firmware, the `head_sim` example and tests. Samples come out in the
//! raw driver units with [`BoardProfile::Identity`](crate::BoardProfile)
//! axes.

use nalgebra::{UnitQuaternion, Vector3};

use crate::sensors::{BoardProfile, InertialSensor, RawSample, SensorError, RAW_PER_UNIT};

/// Simple pseudo-random noise generator (deterministic for reproducibility)
#[derive(Debug, Clone)]
pub struct NoiseGen {
    state: u32,
}

impl NoiseGen {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Returns noise in range [-amplitude, +amplitude]
    pub fn next(&mut self, amplitude: f64) -> f64 {
        // Simple LCG
        self.state = self.state.wrapping_mul(1103515245).wrapping_add(12345);
        let normalized = (self.state as f64 / u32::MAX as f64) * 2.0 - 1.0;
        normalized * amplitude
    }
}

/// Head model driven by a commanded angular rate
#[derive(Debug, Clone)]
pub struct SimulatedImu {
    /// True head attitude, body to world
    attitude: UnitQuaternion<f64>,
    /// Commanded body rate (deg/s)
    rate_dps: Vector3<f64>,
    /// Constant gyro bias (raw units)
    gyro_bias: [i32; 3],
    /// Gyro noise amplitude (raw units)
    gyro_noise: f64,
    /// Accel noise amplitude (raw units)
    accel_noise: f64,
    /// Time per read (seconds)
    dt: f64,
    /// Mounting whose sign convention the raw output follows
    board: BoardProfile,
    /// Fail every Nth read when set
    fail_every: Option<u32>,
    reads: u32,
    pending_tap: bool,
    noise: NoiseGen,
}

impl SimulatedImu {
    /// Level, still head with the given bias and a fixed seed
    pub fn new(dt: f64, gyro_bias: [i32; 3]) -> Self {
        Self {
            attitude: UnitQuaternion::identity(),
            rate_dps: Vector3::zeros(),
            gyro_bias,
            gyro_noise: 150_000.0, // 0.15 deg/s
            accel_noise: 8_000.0,  // 8 mg
            dt,
            board: BoardProfile::Identity,
            fail_every: None,
            reads: 0,
            pending_tap: false,
            noise: NoiseGen::new(42),
        }
    }

    /// Noise amplitudes in raw units
    pub fn with_noise(mut self, gyro: f64, accel: f64) -> Self {
        self.gyro_noise = gyro;
        self.accel_noise = accel;
        self
    }

    /// Start from a tilted pose (roll, pitch, yaw in degrees)
    pub fn with_attitude(mut self, roll: f64, pitch: f64, yaw: f64) -> Self {
        self.attitude = UnitQuaternion::from_euler_angles(
            roll.to_radians(),
            pitch.to_radians(),
            yaw.to_radians(),
        );
        self
    }

    /// Emit raw axes as mounted on `board`
    pub fn with_board(mut self, board: BoardProfile) -> Self {
        self.board = board;
        self
    }

    /// Make every Nth read fail with a bus error
    pub fn fail_every(mut self, n: u32) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Head rotation rate in body axes (deg/s)
    pub fn set_rate(&mut self, roll: f64, pitch: f64, yaw: f64) {
        self.rate_dps = Vector3::new(roll, pitch, yaw);
    }

    /// Queue a double-tap for the next `read_tap`
    pub fn tap(&mut self) {
        self.pending_tap = true;
    }

    pub fn attitude(&self) -> &UnitQuaternion<f64> {
        &self.attitude
    }

    fn advance(&mut self) {
        let omega = self.rate_dps.map(f64::to_radians) * self.dt;
        self.attitude *= UnitQuaternion::from_scaled_axis(omega);
    }
}

impl InertialSensor for SimulatedImu {
    fn read(&mut self) -> Result<RawSample, SensorError> {
        self.reads = self.reads.wrapping_add(1);
        if let Some(n) = self.fail_every {
            if self.reads % n == 0 {
                return Err(SensorError::Bus("simulated read failure"));
            }
        }

        self.advance();

        // Gravity as seen from the head, +Z when level
        let gravity = self.attitude.inverse() * Vector3::z();

        // Signs are ±1, so applying them again undoes the board flip
        let gyro_signs = self.board.gyro_signs();
        let accel_signs = self.board.accel_signs();

        let mut sample = RawSample::default();
        for axis in 0..3 {
            let gyro = self.rate_dps[axis] * RAW_PER_UNIT * gyro_signs[axis]
                + f64::from(self.gyro_bias[axis])
                + self.noise.next(self.gyro_noise);
            let accel = gravity[axis] * RAW_PER_UNIT * accel_signs[axis]
                + self.noise.next(self.accel_noise);
            sample.gyro[axis] = gyro.round() as i32;
            sample.accel[axis] = accel.round() as i32;
        }
        Ok(sample)
    }

    fn read_tap(&mut self) -> bool {
        core::mem::take(&mut self.pending_tap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_bounded_and_deterministic() {
        let mut a = NoiseGen::new(7);
        let mut b = NoiseGen::new(7);
        for _ in 0..1000 {
            let x = a.next(2.0);
            assert!(x.abs() <= 2.0);
            assert_eq!(x, b.next(2.0));
        }
    }

    #[test]
    fn test_level_still_sample() {
        let mut imu = SimulatedImu::new(0.02, [1000, -2000, 3000]).with_noise(0.0, 0.0);
        let s = imu.read().unwrap();
        assert_eq!(s.gyro, [1000, -2000, 3000]);
        assert_eq!(s.accel, [0, 0, 1_000_000]);
    }

    #[test]
    fn test_rate_advances_attitude() {
        let mut imu = SimulatedImu::new(0.02, [0, 0, 0]).with_noise(0.0, 0.0);
        imu.set_rate(0.0, 0.0, 90.0);
        for _ in 0..50 {
            imu.read().unwrap();
        }
        let (_, _, yaw) = imu.attitude().euler_angles();
        assert!((yaw.to_degrees() - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_board_flip_round_trips() {
        let board = BoardProfile::XiaoBle;
        let mut imu = SimulatedImu::new(0.02, [0, 0, 0])
            .with_noise(0.0, 0.0)
            .with_board(board);
        imu.set_rate(10.0, 20.0, 30.0);
        let s = imu.read().unwrap();
        let gyro = BoardProfile::scale(s.gyro, board.gyro_signs());
        assert!((gyro[0] - 10.0).abs() < 1e-6);
        assert!((gyro[1] - 20.0).abs() < 1e-6);
        assert!((gyro[2] - 30.0).abs() < 1e-6);
        assert_eq!(s.accel[0], 0);
    }

    #[test]
    fn test_failure_injection_and_tap() {
        let mut imu = SimulatedImu::new(0.02, [0, 0, 0]).fail_every(3);
        assert!(imu.read().is_ok());
        assert!(imu.read().is_ok());
        assert!(imu.read().is_err());
        imu.tap();
        assert!(imu.read_tap());
        assert!(!imu.read_tap());
    }
}

/// Sensor abstraction layer for hardware independence
/// Enables testing, simulation, and support for multiple IMU parts

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Raw units per physical unit (µdeg/s per deg/s, µg per g)
pub const RAW_PER_UNIT: f64 = 1_000_000.0;

/// One raw IMU sample in the driver's fixed-point units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSample {
    /// Angular rate, micro-degrees per second
    pub gyro: [i32; 3],
    /// Acceleration, micro-g
    pub accel: [i32; 3],
}

/// Errors that can occur when reading sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SensorError {
    #[error("sensor not ready")]
    NotReady,
    #[error("bus error: {0}")]
    Bus(&'static str),
    #[error("sensor read timed out")]
    Timeout,
}

/// Abstraction for 6-axis IMUs (accelerometer + gyroscope)
/// Implementations: LSM6DS3, simulated sensors in tests
pub trait InertialSensor {
    /// Read one gyro + accel sample
    fn read(&mut self) -> Result<RawSample, SensorError>;

    /// Returns true once per detected double-tap gesture
    fn read_tap(&mut self) -> bool {
        false
    }
}

/// Board mounting convention
///
/// The IMU sits differently on each supported board, so the sign of some
/// axes has to be flipped before fusion. The convention is fixed here and
/// nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BoardProfile {
    /// Seeed XIAO BLE Sense: gyro (+x, -y, -z), accel (-x, +y, +z)
    #[default]
    XiaoBle,
    /// Arduino Nano 33 BLE: gyro (-x, +y, +z), accel (-x, +y, +z)
    Nano33Ble,
    /// No flips, for simulated sensors
    Identity,
}

impl BoardProfile {
    /// Per-axis sign for the gyroscope
    pub fn gyro_signs(self) -> [f64; 3] {
        match self {
            BoardProfile::XiaoBle => [1.0, -1.0, -1.0],
            BoardProfile::Nano33Ble => [-1.0, 1.0, 1.0],
            BoardProfile::Identity => [1.0, 1.0, 1.0],
        }
    }

    /// Per-axis sign for the accelerometer
    pub fn accel_signs(self) -> [f64; 3] {
        match self {
            BoardProfile::XiaoBle | BoardProfile::Nano33Ble => [-1.0, 1.0, 1.0],
            BoardProfile::Identity => [1.0, 1.0, 1.0],
        }
    }

    /// Parse a board name as used in config overrides
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "xiao" | "xiao_ble" | "xiaoble" => Some(BoardProfile::XiaoBle),
            "nano33" | "nano33ble" | "nano33_ble" => Some(BoardProfile::Nano33Ble),
            "identity" | "sim" => Some(BoardProfile::Identity),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BoardProfile::XiaoBle => "XIAO BLE",
            BoardProfile::Nano33Ble => "Nano 33 BLE",
            BoardProfile::Identity => "identity",
        }
    }

    /// Scale a raw vector to physical units with this board's signs applied
    pub fn scale(raw: [i32; 3], signs: [f64; 3]) -> [f64; 3] {
        [
            signs[0] * raw[0] as f64 / RAW_PER_UNIT,
            signs[1] * raw[1] as f64 / RAW_PER_UNIT,
            signs[2] * raw[2] as f64 / RAW_PER_UNIT,
        ]
    }
}

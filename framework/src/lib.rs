//! Head Tracker Orientation Engine
//!
//! Turns raw 6-axis IMU samples into centered roll / pitch / yaw and then
//! into RC channel pulse widths, ready for a trainer link.
//!
//! ## Features
//!
//! - **Online Gyro Calibration**: bias learned continuously, no hold-still step
//! - **Madgwick Fusion**: quaternion filter, gyro + accelerometer
//! - **Centering**: any pose can be made the zero orientation
//! - **Channel Mapping**: per-axis enable / invert / remap, 988-2012 µs
//! - **Hardware Independent**: the IMU is a trait, boards differ only in signs
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  InertialSensor (driver or simulation)   │
//! ├──────────────────────────────────────────┤
//! │  GyroCalibrator → Madgwick (centered)    │
//! ├──────────────────────────────────────────┤
//! │  ChannelMapper → [u16] pulse widths      │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use orientation_engine::{
//!     BoardProfile, ChannelMapper, FusionConfig, GyroCalConfig, InertialSensor,
//!     OrientationEstimator,
//! };
//!
//! fn run<S: InertialSensor>(imu: S) {
//!     let mut estimator = OrientationEstimator::new(
//!         imu,
//!         BoardProfile::XiaoBle,
//!         FusionConfig::default(),
//!         GyroCalConfig::default(),
//!     );
//!     let mapper = ChannelMapper::default();
//!     let mut channels = [1500u16; 8];
//!
//!     estimator.reset().ok();
//!     loop {
//!         if estimator.update().is_ok() {
//!             mapper.apply(&estimator.angles(), &mut channels);
//!         }
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`calibration`] - Online gyro bias estimation
//! - [`filter`] - Madgwick quaternion filter
//! - [`fusion`] - Orientation estimator (centering, update, angles)
//! - [`channels`] - Angle to pulse width and axis routing
//! - [`transforms`] - Quaternion helpers
//! - [`sensors`] - IMU trait and board conventions
//! - [`sim`] - Deterministic simulated IMU

pub mod calibration;
pub mod channels;
pub mod filter;
pub mod fusion;
pub mod sensors;
pub mod sim;
pub mod transforms;

// Re-export commonly used types
pub use calibration::{GyroCalConfig, GyroCalibrator};
pub use channels::{
    angle_to_channel, resolve, Axis, AxisMapping, ChannelMapper, ChannelOrder, CHANNEL_MAX,
    CHANNEL_MIN, CHANNEL_NEUTRAL, DEFAULT_MAPPING,
};
pub use filter::Madgwick;
pub use fusion::{FusionConfig, OrientationError, OrientationEstimator};
pub use sensors::{BoardProfile, InertialSensor, RawSample, SensorError};
pub use sim::SimulatedImu;
pub use transforms::OrientationAngles;

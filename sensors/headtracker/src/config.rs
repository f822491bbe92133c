//! Configuration management for the head tracker
//!
//! Defaults carry the shipped tuning. Compile-time environment overrides
//! come first (`from_env`), a JSON file can override any subset at runtime
//! (`from_file`).

use std::path::Path;

use orientation_engine::{AxisMapping, BoardProfile, FusionConfig, GyroCalConfig, DEFAULT_MAPPING};
use serde::{Deserialize, Serialize};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Which trainer link drives the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainerKind {
    /// PARA frames over BLE
    #[default]
    Para,
    /// Wired PPM pulse train
    Ppm,
}

impl TrainerKind {
    pub fn name(self) -> &'static str {
        match self {
            TrainerKind::Para => "PARA",
            TrainerKind::Ppm => "PPM",
        }
    }
}

/// IMU and sampling loop configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    /// Sampling loop tick (ms)
    pub period_ms: u64,
    /// Mounting sign convention
    pub board: BoardProfile,
    /// Give up waiting for a stable calibration after this long (s)
    pub warmup_timeout_s: u32,
    /// Gyro bias of the simulated IMU on host builds (µdeg/s)
    pub simulated_bias: [i32; 3],
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            period_ms: 20, // 50 Hz
            board: BoardProfile::XiaoBle,
            warmup_timeout_s: 60,
            simulated_bias: [420_000, -310_000, 650_000],
        }
    }
}

/// Channel output configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// 8 or 16 channels
    pub channel_count: usize,
    /// Head angle giving full stick deflection (degrees)
    pub max_angle_deg: f64,
    /// Routing for roll, pitch, yaw
    pub axis_mapping: [AxisMapping; 3],
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel_count: 8,
            max_angle_deg: 45.0,
            axis_mapping: DEFAULT_MAPPING,
        }
    }
}

/// Trainer link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub kind: TrainerKind,
    /// PARA frame interval (ms)
    pub send_interval_ms: u64,
    /// Quiet time between connect and the first PARA frame (ms)
    pub connect_delay_ms: u64,
    /// Advertised BLE address
    pub address: String,
    /// PPM frame length (µs)
    pub ppm_frame_us: u32,
    /// PPM separator pulse (µs)
    pub ppm_separator_us: u32,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            kind: TrainerKind::Para,
            send_interval_ms: 20,
            connect_delay_ms: 1000,
            address: "B1:6B:00:B5:BA:BE".to_string(),
            ppm_frame_us: 22_500,
            ppm_separator_us: 300,
        }
    }
}

/// Flash write policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Minimum time between offset writes (s)
    pub min_interval_s: u64,
    /// Offset drift that justifies a write (raw units)
    pub drift_threshold: i32,
    /// Settings file on host builds
    pub path: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            min_interval_s: 30,
            drift_threshold: 25_000,
            path: "headtracker.bin".to_string(),
        }
    }
}

/// Master system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub imu: ImuConfig,
    pub calibration: GyroCalConfig,
    pub fusion: FusionConfig,
    pub channels: ChannelConfig,
    pub trainer: TrainerConfig,
    pub persistence: PersistenceConfig,
}

impl SystemConfig {
    /// Create configuration from environment variables (compile-time)
    ///
    /// ```bash
    /// export HT_TRAINER="ppm"          # para (default) or ppm
    /// export HT_BOARD="nano33ble"      # xiao (default), nano33ble, identity
    /// export HT_ANGLE_MAX="30"         # degrees for full deflection
    /// export HT_CHANNELS="16"          # 8 (default) or 16
    /// export HT_SETTINGS_PATH="/var/lib/ht.bin"
    /// cargo build --release
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(kind) = option_env!("HT_TRAINER") {
            config.trainer.kind = match kind.to_lowercase().as_str() {
                "ppm" | "wired" => TrainerKind::Ppm,
                _ => TrainerKind::Para,
            };
        }
        if let Some(board) = option_env!("HT_BOARD").and_then(BoardProfile::from_name) {
            config.imu.board = board;
        }
        if let Some(max) = option_env!("HT_ANGLE_MAX").and_then(|s| s.parse().ok()) {
            config.channels.max_angle_deg = max;
        }
        if let Some(count) = option_env!("HT_CHANNELS").and_then(|s| s.parse().ok()) {
            config.channels.channel_count = count;
        }
        if let Some(path) = option_env!("HT_SETTINGS_PATH") {
            config.persistence.path = path.to_string();
        }

        config
    }

    /// Parse a JSON document; missing sections keep their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file on top of the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Reject values the rest of the firmware cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.imu.period_ms == 0 {
            return Err(ConfigError::Invalid("imu.period_ms must be > 0"));
        }
        if !matches!(self.channels.channel_count, 8 | 16) {
            return Err(ConfigError::Invalid("channels.channel_count must be 8 or 16"));
        }
        if !(self.channels.max_angle_deg > 0.0 && self.channels.max_angle_deg <= 180.0) {
            return Err(ConfigError::Invalid("channels.max_angle_deg must be in (0, 180]"));
        }
        let count = self.channels.channel_count;
        if !self.channels.axis_mapping.iter().all(|m| m.fits(count)) {
            return Err(ConfigError::Invalid(
                "channels.axis_mapping targets a channel past channel_count",
            ));
        }
        let cal = &self.calibration;
        if cal.batch_size == 0 || cal.batch_size > i32::MAX as u32 {
            return Err(ConfigError::Invalid("calibration.batch_size out of range"));
        }
        if cal.escape_threshold <= 0 {
            return Err(ConfigError::Invalid("calibration.escape_threshold must be > 0"));
        }
        if cal.stable_threshold <= 0 {
            return Err(ConfigError::Invalid("calibration.stable_threshold must be > 0"));
        }
        if cal.stable_correction_cap < 0 {
            return Err(ConfigError::Invalid(
                "calibration.stable_correction_cap must be >= 0",
            ));
        }
        if self.trainer.send_interval_ms == 0 {
            return Err(ConfigError::Invalid("trainer.send_interval_ms must be > 0"));
        }
        if self.trainer.ppm_separator_us.saturating_mul(9) >= self.trainer.ppm_frame_us {
            return Err(ConfigError::Invalid("trainer.ppm_frame_us too short"));
        }
        Ok(())
    }

    /// Fusion settings with the step locked to the sampling tick
    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            sample_period_s: self.imu.period_ms as f64 / 1000.0,
            ..self.fusion
        }
    }

    /// Sampling ticks per second
    pub fn tick_rate_hz(&self) -> u64 {
        1000 / self.imu.period_ms.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SystemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_rate_hz(), 50);
        assert!((config.fusion_config().sample_period_s - 0.02).abs() < 1e-12);
        assert_eq!(config.trainer.kind, TrainerKind::Para);
        assert_eq!(config.calibration.batch_size, 1000);
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = SystemConfig::from_json(
            r#"{
                "trainer": { "kind": "ppm" },
                "channels": { "max_angle_deg": 30.0, "axis_mapping": [18, 17, 48] },
                "imu": { "board": "nano33_ble" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.trainer.kind, TrainerKind::Ppm);
        assert_eq!(config.trainer.send_interval_ms, 20);
        assert_eq!(config.channels.max_angle_deg, 30.0);
        assert_eq!(config.channels.channel_count, 8);
        assert_eq!(config.channels.axis_mapping[2], AxisMapping(0x30));
        assert_eq!(config.imu.board, BoardProfile::Nano33Ble);
    }

    #[test]
    fn test_fusion_step_follows_period() {
        let config = SystemConfig::from_json(r#"{ "imu": { "period_ms": 10 } }"#).unwrap();
        assert!((config.fusion_config().sample_period_s - 0.01).abs() < 1e-12);
        assert_eq!(config.fusion_config().beta, 0.025);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            SystemConfig::from_json(r#"{ "channels": { "channel_count": 12 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SystemConfig::from_json(r#"{ "channels": { "max_angle_deg": 0.0 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SystemConfig::from_json(r#"{ "imu": { "period_ms": 0 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SystemConfig::from_json(r#"{ "channels": { "axis_mapping": [26, 17, 18] } }"#),
            Err(ConfigError::Invalid(_))
        ));
        for calibration in [
            r#"{ "calibration": { "batch_size": 0 } }"#,
            r#"{ "calibration": { "batch_size": 3000000000 } }"#,
            r#"{ "calibration": { "escape_threshold": -5 } }"#,
            r#"{ "calibration": { "escape_threshold": 0 } }"#,
            r#"{ "calibration": { "stable_threshold": 0 } }"#,
            r#"{ "calibration": { "stable_correction_cap": -1 } }"#,
        ] {
            assert!(
                matches!(
                    SystemConfig::from_json(calibration),
                    Err(ConfigError::Invalid(_))
                ),
                "{} accepted",
                calibration
            );
        }
        assert!(matches!(
            SystemConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}

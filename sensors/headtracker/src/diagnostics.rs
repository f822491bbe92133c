//! Diagnostics for monitoring sensor health and link status
//!
//! Updates use try_lock() so neither the sampling loop nor the trainer
//! thread ever waits on a reader.

use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Sampling loop health
#[derive(Debug, Clone, Default, Serialize)]
pub struct SensorStats {
    /// Measured tick rate (Hz)
    pub tick_hz: f32,
    /// Configured tick rate (Hz)
    pub expected_hz: f32,
    /// Failed IMU reads since boot
    pub read_errors: u32,
    /// Ticks that produced no new orientation
    pub skipped_ticks: u32,
    /// Loop iterations that overran the period
    pub overruns: u32,
}

/// Gyro calibration state
#[derive(Debug, Clone, Default, Serialize)]
pub struct CalibrationStatus {
    pub stable: bool,
    /// Fraction of axes settled (0..1)
    pub progress: f32,
    pub offsets: [i32; 3],
    pub warmup_complete: bool,
}

/// Latest output
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputStatus {
    /// Roll, pitch, yaw (degrees)
    pub angles_deg: [f32; 3],
    pub channels: Vec<u16>,
    pub resets: u32,
}

/// Trainer link status
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainerStatus {
    pub kind: &'static str,
    pub address: String,
    pub paired: bool,
    pub frames_sent: u64,
    pub send_errors: u32,
}

/// Complete diagnostics data snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsData {
    pub sensor: SensorStats,
    pub calibration: CalibrationStatus,
    pub output: OutputStatus,
    pub trainer: TrainerStatus,
    /// Settings writes that failed
    pub storage_errors: u32,
    pub uptime_s: u32,
}

impl DiagnosticsData {
    /// One-line JSON for the status log
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Thread-safe diagnostics state
pub struct DiagnosticsState {
    data: Mutex<DiagnosticsData>,
}

impl DiagnosticsState {
    /// Create new diagnostics state wrapped in Arc for sharing
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(DiagnosticsData::default()),
        })
    }

    /// Non-blocking update; skipped if a reader holds the lock
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut DiagnosticsData),
    {
        if let Ok(mut data) = self.data.try_lock() {
            f(&mut data);
        }
    }

    /// Get a snapshot of current diagnostics data
    pub fn snapshot(&self) -> DiagnosticsData {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

//! Sampling loop
//!
//! One [`Tracker::tick`] per IMU period. The loop first learns the gyro
//! bias with fusion off (warm-up), centers once calibration is stable or
//! the warm-up times out, then fuses every tick and publishes channels.
//!
//! Nothing in here is fatal: a failed read skips the tick and the last
//! published channels stay in place.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use orientation_engine::{
    AxisMapping, ChannelMapper, ChannelOrder, InertialSensor, OrientationError,
    OrientationEstimator, CHANNEL_NEUTRAL,
};

use crate::commands::{dispatch, CommandHandler, CommandQueue};
use crate::config::SystemConfig;
use crate::diagnostics::DiagnosticsState;
use crate::persistence::PersistHandle;
use crate::settings::{CalibrationBlob, MAX_NAME_LEN};
use crate::trainer::ChannelSnapshot;

/// Log one failure in this many consecutive ones
const ERROR_LOG_EVERY: u32 = 50;
/// Full diagnostics line every N trace periods
const STATUS_EVERY: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WarmUp { ticks: u32 },
    Tracking,
}

/// What the caller should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Reboot,
}

/// Owns the estimator and everything the loop writes to
pub struct Tracker<S> {
    estimator: OrientationEstimator<S>,
    mapper: ChannelMapper,
    channels: Vec<u16>,
    snapshot: ChannelSnapshot,
    commands: CommandQueue,
    persist: PersistHandle,
    diagnostics: Arc<DiagnosticsState>,
    phase: Phase,
    warmup_limit: u32,
    /// Ticks per trace period
    trace_every: u64,
    ticks: u64,
    device_name: String,
    reset_pending: bool,
    reboot_requested: bool,
    consecutive_errors: u32,
    read_errors: u32,
    skipped_ticks: u32,
    resets: u32,
    last_progress_step: u32,
    started: Instant,
    window_start: Instant,
    window_ticks: u64,
}

impl<S: InertialSensor> Tracker<S> {
    pub fn new(
        estimator: OrientationEstimator<S>,
        snapshot: ChannelSnapshot,
        commands: CommandQueue,
        persist: PersistHandle,
        diagnostics: Arc<DiagnosticsState>,
        config: &SystemConfig,
        now: Instant,
    ) -> Self {
        let rate = config.tick_rate_hz().max(1);
        diagnostics.update(|d| {
            d.sensor.expected_hz = rate as f32;
            d.trainer.kind = config.trainer.kind.name();
        });

        Self {
            estimator,
            mapper: ChannelMapper::new(
                config.channels.axis_mapping,
                config.channels.max_angle_deg,
            ),
            channels: vec![CHANNEL_NEUTRAL; config.channels.channel_count],
            snapshot,
            commands,
            persist,
            diagnostics,
            phase: Phase::WarmUp { ticks: 0 },
            warmup_limit: config.imu.warmup_timeout_s.saturating_mul(rate as u32),
            trace_every: rate,
            ticks: 0,
            device_name: crate::settings::DEFAULT_NAME.to_string(),
            reset_pending: false,
            reboot_requested: false,
            consecutive_errors: 0,
            read_errors: 0,
            skipped_ticks: 0,
            resets: 0,
            last_progress_step: 0,
            started: now,
            window_start: now,
            window_ticks: 0,
        }
    }

    /// Apply stored settings; restored offsets count as a stable calibration
    pub fn restore(&mut self, blob: &CalibrationBlob) {
        if blob.offsets != [0; 3] {
            self.estimator.calibrator_mut().set_offsets(blob.offsets);
            self.estimator.set_stable(true);
            info!("Restored gyro offsets {:?}", blob.offsets);
        }
        if fits(&blob.axis_mapping, self.channels.len()) {
            self.mapper.set_mappings(blob.axis_mapping);
        } else {
            warn!(
                "Stored axis mapping {:02X?} does not fit {} channels, keeping {:02X?}",
                blob.axis_mapping.map(|m| m.0),
                self.channels.len(),
                self.mapper.mappings().map(|m| m.0)
            );
        }
        self.device_name = blob.device_name.clone();
    }

    #[cfg(test)]
    pub fn is_tracking(&self) -> bool {
        self.phase == Phase::Tracking
    }

    #[cfg(test)]
    pub fn channels(&self) -> &[u16] {
        &self.channels
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn estimator(&self) -> &OrientationEstimator<S> {
        &self.estimator
    }

    #[cfg(test)]
    pub fn estimator_mut(&mut self) -> &mut OrientationEstimator<S> {
        &mut self.estimator
    }

    /// Run one sampling period
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        while let Some(command) = self.commands.try_next() {
            dispatch(self, command);
        }
        if self.reboot_requested {
            return TickOutcome::Reboot;
        }

        if self.estimator.tapped() {
            info!("Tap detected, recentering");
            self.reset_pending = true;
        }

        match self.phase {
            Phase::WarmUp { ticks } => self.warm_up(ticks),
            Phase::Tracking => self.track(),
        }

        self.ticks += 1;
        self.window_ticks += 1;
        if self.ticks % self.trace_every == 0 {
            self.periodic(now);
        }
        TickOutcome::Continue
    }

    fn warm_up(&mut self, ticks: u32) {
        let stable = self.estimator.is_stable();
        if stable || ticks >= self.warmup_limit {
            if stable {
                info!(
                    "Gyro calibration stable, offsets {:?}",
                    self.estimator.calibrator().offsets()
                );
            } else {
                warn!(
                    "Gyro calibration not stable after {} ticks, tracking anyway",
                    ticks
                );
            }
            self.phase = Phase::Tracking;
            self.reset_pending = true;
            self.diagnostics
                .update(|d| d.calibration.warmup_complete = true);
            return;
        }

        match self.estimator.calibrate() {
            Ok(_) => {
                self.consecutive_errors = 0;
                let step = (self.estimator.calibrator().progress() * 10.0) as u32;
                if step > self.last_progress_step {
                    self.last_progress_step = step;
                    info!("Calibration progress: {}%", step * 10);
                }
            }
            Err(e) => self.skip_tick(e),
        }
        self.phase = Phase::WarmUp { ticks: ticks + 1 };
    }

    fn track(&mut self) {
        if self.reset_pending {
            match self.estimator.reset() {
                Ok(()) => {
                    self.reset_pending = false;
                    self.resets += 1;
                    info!("Orientation centered");
                }
                Err(OrientationError::NoGravity) => {
                    self.reset_pending = false;
                    warn!("Cannot center: no gravity reading");
                }
                Err(e) => {
                    self.skip_tick(e);
                    return;
                }
            }
        }

        match self.estimator.update() {
            Ok(()) => {
                self.consecutive_errors = 0;
                self.mapper
                    .apply(&self.estimator.angles(), &mut self.channels);
                self.snapshot.publish(&self.channels);
            }
            Err(e) => self.skip_tick(e),
        }
    }

    fn skip_tick(&mut self, e: OrientationError) {
        self.read_errors += 1;
        self.skipped_ticks += 1;
        self.consecutive_errors += 1;
        if self.consecutive_errors == 1 || self.consecutive_errors % ERROR_LOG_EVERY == 0 {
            warn!(
                "IMU read failed ({} in a row), skipping tick: {}",
                self.consecutive_errors, e
            );
        }
    }

    /// Once per second: offsets to the persister, trace line, diagnostics
    fn periodic(&mut self, now: Instant) {
        let offsets = self.estimator.calibrator().offsets();
        let stable = self.estimator.is_stable();
        if self.phase == Phase::Tracking {
            self.persist.offsets(offsets, stable);
        }

        let [roll, pitch, yaw] = self.estimator.angles().degrees();
        debug!(
            "{} r={:.1} p={:.1} y={:.1} ch={:?} off={:?}",
            self.device_name,
            roll,
            pitch,
            yaw,
            &self.channels[..self.channels.len().min(3)],
            offsets
        );

        let elapsed = now.duration_since(self.window_start).as_secs_f32();
        let tick_hz = if elapsed > 0.0 {
            self.window_ticks as f32 / elapsed
        } else {
            0.0
        };
        self.window_start = now;
        self.window_ticks = 0;

        let progress = self.estimator.calibrator().progress();
        let uptime_s = now.duration_since(self.started).as_secs() as u32;
        let (read_errors, skipped_ticks, resets) =
            (self.read_errors, self.skipped_ticks, self.resets);
        let channels = self.channels.clone();
        self.diagnostics.update(|d| {
            d.sensor.tick_hz = tick_hz;
            d.sensor.read_errors = read_errors;
            d.sensor.skipped_ticks = skipped_ticks;
            d.calibration.stable = stable;
            d.calibration.progress = progress;
            d.calibration.offsets = offsets;
            d.output.angles_deg = [roll as f32, pitch as f32, yaw as f32];
            d.output.channels = channels;
            d.output.resets = resets;
            d.uptime_s = uptime_s;
        });

        if (self.ticks / self.trace_every) % STATUS_EVERY == 0 {
            debug!("status {}", self.diagnostics.snapshot().to_json());
        }
    }

    fn set_mappings(&mut self, mapping: [AxisMapping; 3]) {
        if !fits(&mapping, self.channels.len()) {
            warn!(
                "Axis mapping {:02X?} targets a channel past {}, ignored",
                mapping.map(|m| m.0),
                self.channels.len()
            );
            return;
        }
        self.mapper.set_mappings(mapping);
        // Slots the old routing wrote would otherwise hold stale values
        self.channels.fill(CHANNEL_NEUTRAL);
        self.snapshot.publish(&self.channels);
        self.persist.axis_mapping(mapping);
    }
}

fn fits(mapping: &[AxisMapping; 3], channel_count: usize) -> bool {
    mapping.iter().all(|m| m.fits(channel_count))
}

impl<S: InertialSensor> CommandHandler for Tracker<S> {
    fn on_orientation_reset(&mut self) {
        info!("Remote: orientation reset");
        self.reset_pending = true;
    }

    fn on_factory_reset(&mut self) {
        info!("Remote: factory reset");
        self.persist.factory_reset();
        self.reboot_requested = true;
    }

    fn on_reboot(&mut self) {
        info!("Remote: reboot");
        self.reboot_requested = true;
    }

    fn on_device_name_changed(&mut self, name: String) {
        if name.len() > MAX_NAME_LEN {
            warn!("Remote: device name \"{}\" too long, ignored", name);
        } else if name != self.device_name {
            info!("Remote: device name \"{}\"", name);
            self.device_name = name.clone();
            self.persist.device_name(name);
        }
    }

    fn on_axis_mapping_changed(&mut self, mapping: [AxisMapping; 3]) {
        info!(
            "Remote: axis mapping {:02X} {:02X} {:02X}",
            mapping[0].0, mapping[1].0, mapping[2].0
        );
        self.set_mappings(mapping);
    }

    fn on_channel_layout_changed(&mut self, layout: ChannelOrder) {
        info!(
            "Remote: channel layout offset {} order {} mask {:03b}",
            layout.offset, layout.order, layout.enabled_mask
        );
        let mapping = layout.mappings(self.channels.len());
        self.set_mappings(mapping);
    }
}

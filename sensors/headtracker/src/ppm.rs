//! Wired PPM trainer output
//!
//! Every frame is a run of separator pulses with the channel value encoded
//! as the distance between them, followed by a long sync gap:
//!
//! ```text
//!  _   ____   ______   _             ___________
//! | |_|    |_|      |_|  ...  |_|   sync        |
//!  sep  ch1 - sep    ch2 - sep  sep
//! ```
//!
//! The pulse timer on the device walks the schedule; on the host the
//! schedule is only logged.

use std::time::Instant;

use log::{debug, info};
use orientation_engine::CHANNEL_NEUTRAL;

use crate::config::TrainerConfig;
use crate::trainer::{Trainer, TransportError};

/// Shown instead of a BLE address
pub const PPM_ADDRESS: &str = "    PPM OUTPUT";
pub const PPM_CHANNELS: usize = 8;

/// One level held for a duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpmSegment {
    pub high: bool,
    pub duration_us: u32,
}

impl PpmSegment {
    fn low(duration_us: u32) -> Self {
        Self {
            high: false,
            duration_us,
        }
    }

    fn high(duration_us: u32) -> Self {
        Self {
            high: true,
            duration_us,
        }
    }
}

/// Level schedule for one frame, always summing to `frame_us`
pub fn frame_schedule(channels: &[u16], frame_us: u32, separator_us: u32) -> Vec<PpmSegment> {
    let mut schedule = Vec::with_capacity(channels.len() * 2 + 2);
    let mut used = 0u32;

    for &value in channels {
        let value = u32::from(value).max(separator_us);
        schedule.push(PpmSegment::low(separator_us));
        schedule.push(PpmSegment::high(value - separator_us));
        used += value;
    }

    // Closing separator, then the sync gap fills the frame
    schedule.push(PpmSegment::low(separator_us));
    used += separator_us;
    schedule.push(PpmSegment::high(frame_us.saturating_sub(used)));
    schedule
}

/// Drives the pulse timer
pub trait PulseOutput {
    fn emit(&mut self, schedule: &[PpmSegment]) -> Result<(), TransportError>;
}

/// Host output: schedules are logged
#[derive(Debug, Default)]
pub struct LogPulseOutput {
    frames: u64,
}

impl PulseOutput for LogPulseOutput {
    fn emit(&mut self, schedule: &[PpmSegment]) -> Result<(), TransportError> {
        self.frames += 1;
        if self.frames % 45 == 1 {
            let widths: Vec<u32> = schedule
                .chunks(2)
                .map(|pair| pair.iter().map(|s| s.duration_us).sum())
                .collect();
            debug!("PPM >> {:?}", widths);
        }
        Ok(())
    }
}

/// PPM trainer, always considered paired
pub struct PpmTrainer<O> {
    output: O,
    channels: [u16; PPM_CHANNELS],
    frame_us: u32,
    separator_us: u32,
}

impl<O: PulseOutput> PpmTrainer<O> {
    pub fn new(output: O, config: &TrainerConfig) -> Self {
        Self {
            output,
            channels: [CHANNEL_NEUTRAL; PPM_CHANNELS],
            frame_us: config.ppm_frame_us,
            separator_us: config.ppm_separator_us,
        }
    }

    pub fn schedule(&self) -> Vec<PpmSegment> {
        frame_schedule(&self.channels, self.frame_us, self.separator_us)
    }

    #[cfg(test)]
    pub fn output(&self) -> &O {
        &self.output
    }
}

impl<O: PulseOutput> Trainer for PpmTrainer<O> {
    fn start(&mut self) -> String {
        info!(
            "PPM: {} channels, {} µs frame, {} µs separator",
            PPM_CHANNELS, self.frame_us, self.separator_us
        );
        PPM_ADDRESS.to_string()
    }

    fn set_channel(&mut self, index: usize, value: u16) {
        if let Some(slot) = self.channels.get_mut(index) {
            *slot = value;
        }
    }

    fn channels(&self) -> &[u16] {
        &self.channels
    }

    fn paired(&self) -> bool {
        true
    }

    fn tick(&mut self, _now: Instant) -> Result<u32, TransportError> {
        let schedule = self.schedule();
        self.output.emit(&schedule)?;
        Ok(1)
    }
}

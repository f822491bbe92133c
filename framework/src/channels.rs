//! Angle to RC channel mapping
//!
//! Converts centered head angles into servo pulse widths and routes each
//! logical axis (roll, pitch, yaw) to an output channel. Routing is stored
//! as one byte per axis so it can be written straight from a BLE
//! characteristic and persisted as-is.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::transforms::OrientationAngles;

/// Lowest pulse width sent (µs)
pub const CHANNEL_MIN: u16 = 988;
/// Highest pulse width sent (µs)
pub const CHANNEL_MAX: u16 = 2012;
/// Centered stick (µs)
pub const CHANNEL_NEUTRAL: u16 = 1500;

/// Pulse width swing from neutral at full deflection
const CHANNEL_SWING: f64 = 500.0;

/// Pulse width for an angle
///
/// `max_angle_deg` maps to a full 500 µs swing; anything beyond is clamped
/// to [`CHANNEL_MIN`, `CHANNEL_MAX`]. A non-finite angle or a non-positive
/// range gives neutral.
pub fn angle_to_channel(angle_rad: f64, max_angle_deg: f64) -> u16 {
    if !angle_rad.is_finite() || !max_angle_deg.is_finite() || max_angle_deg <= 0.0 {
        return CHANNEL_NEUTRAL;
    }
    let scale = CHANNEL_SWING / max_angle_deg;
    let value = (f64::from(CHANNEL_NEUTRAL) + angle_rad.to_degrees() * scale)
        .round()
        .clamp(f64::from(CHANNEL_MIN), f64::from(CHANNEL_MAX));
    value as u16
}

/// Per-axis routing byte
///
/// Bits 0..3: target channel, bit 4: enabled, bit 5: inverted. Other bits
/// are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct AxisMapping(pub u8);

impl AxisMapping {
    const CHANNEL_MASK: u8 = 0x0F;
    const ENABLED: u8 = 0x10;
    const INVERTED: u8 = 0x20;

    pub fn new(channel: u8, enabled: bool, inverted: bool) -> Self {
        let mut bits = channel & Self::CHANNEL_MASK;
        if enabled {
            bits |= Self::ENABLED;
        }
        if inverted {
            bits |= Self::INVERTED;
        }
        Self(bits)
    }

    /// Enabled, not inverted, axis N on channel N
    pub fn identity(axis: Axis) -> Self {
        Self::new(axis as u8, true, false)
    }

    pub fn channel(self) -> usize {
        usize::from(self.0 & Self::CHANNEL_MASK)
    }

    pub fn enabled(self) -> bool {
        self.0 & Self::ENABLED != 0
    }

    pub fn inverted(self) -> bool {
        self.0 & Self::INVERTED != 0
    }

    /// Whether the mapping can drive an array of `channel_count` channels
    ///
    /// A disabled axis writes nothing that matters, so any target fits.
    pub fn fits(self, channel_count: usize) -> bool {
        !self.enabled() || self.channel() < channel_count
    }
}

/// Default routing: roll → 0, pitch → 1, yaw → 2
pub const DEFAULT_MAPPING: [AxisMapping; 3] =
    [AxisMapping(0x10), AxisMapping(0x11), AxisMapping(0x12)];

/// Where a mapped axis lands, or None when the axis is switched off
pub fn resolve(mapping: AxisMapping, value: u16) -> Option<(usize, u16)> {
    if !mapping.enabled() {
        return None;
    }
    let value = if mapping.inverted() {
        3000u16.saturating_sub(value)
    } else {
        value
    };
    Some((mapping.channel(), value))
}

/// Logical head axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Roll = 0,
    Pitch = 1,
    Yaw = 2,
}

/// All orderings of the three axes, indexed by the configured order
pub const ORDER_TABLE: [[Axis; 3]; 6] = [
    [Axis::Roll, Axis::Pitch, Axis::Yaw],
    [Axis::Roll, Axis::Yaw, Axis::Pitch],
    [Axis::Pitch, Axis::Roll, Axis::Yaw],
    [Axis::Pitch, Axis::Yaw, Axis::Roll],
    [Axis::Yaw, Axis::Roll, Axis::Pitch],
    [Axis::Yaw, Axis::Pitch, Axis::Roll],
];

/// Channel block layout: first channel, axis order, enabled axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelOrder {
    /// First physical channel of the block
    pub offset: u8,
    /// Index into [`ORDER_TABLE`]
    pub order: u8,
    /// Bit N set = axis N enabled (roll = bit 0)
    pub enabled_mask: u8,
}

impl ChannelOrder {
    /// Routing bytes for this layout over `channel_count` outputs
    pub fn mappings(&self, channel_count: usize) -> [AxisMapping; 3] {
        let count = channel_count.clamp(1, 16);
        let permutation = ORDER_TABLE[usize::from(self.order) % ORDER_TABLE.len()];
        let mut mappings = [AxisMapping(0); 3];

        for (position, axis) in permutation.into_iter().enumerate() {
            let physical = (usize::from(self.offset) + position) % count;
            let enabled = self.enabled_mask & (1 << axis as u8) != 0;
            mappings[axis as usize] = AxisMapping::new(physical as u8, enabled, false);
        }
        mappings
    }
}

/// Writes the three axis angles into a channel array
#[derive(Debug, Clone)]
pub struct ChannelMapper {
    mappings: [AxisMapping; 3],
    max_angle_deg: f64,
}

impl ChannelMapper {
    pub fn new(mappings: [AxisMapping; 3], max_angle_deg: f64) -> Self {
        Self {
            mappings,
            max_angle_deg,
        }
    }

    pub fn mappings(&self) -> [AxisMapping; 3] {
        self.mappings
    }

    pub fn set_mappings(&mut self, mappings: [AxisMapping; 3]) {
        self.mappings = mappings;
    }

    pub fn max_angle_deg(&self) -> f64 {
        self.max_angle_deg
    }

    /// Fill the mapped channels from `angles`
    ///
    /// Disabled axes park their channel at neutral. Targets past the end of
    /// `channels` are skipped.
    pub fn apply(&self, angles: &OrientationAngles, channels: &mut [u16]) {
        for (mapping, angle) in self.mappings.iter().zip(angles.as_array()) {
            let value = angle_to_channel(angle, self.max_angle_deg);
            let (index, value) =
                resolve(*mapping, value).unwrap_or((mapping.channel(), CHANNEL_NEUTRAL));

            if let Some(slot) = channels.get_mut(index) {
                *slot = value;
            }
        }
    }
}

impl Default for ChannelMapper {
    fn default() -> Self {
        Self::new(DEFAULT_MAPPING, 45.0)
    }
}

//! Calibration blob persistence
//!
//! One versioned, CRC-protected record holds the learned gyro offsets, the
//! device name and the axis routing:
//!
//! ```text
//! header:  "HT" | version u8 | payload_len u16 LE | crc32 u32 LE
//! payload: offsets 3 x i32 LE | mapping 3 x u8 | name_len u8 | name
//! ```
//!
//! Shorter payloads from older writers are zero-filled on load.

use crc::{Crc, CRC_32_ISO_HDLC};
use log::info;
use orientation_engine::{AxisMapping, DEFAULT_MAPPING};

use crate::flash_storage::Flash;

const MAGIC: [u8; 2] = *b"HT";
pub const VERSION: u8 = 1;
const HEADER_LEN: usize = 9;
pub const MAX_NAME_LEN: usize = 20;
pub const DEFAULT_NAME: &str = "HT";
/// Full payload size at the current version
const PAYLOAD_LEN: usize = 12 + 3 + 1 + MAX_NAME_LEN;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("flash i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt settings: {0}")]
    Corrupt(&'static str),
    #[error("unsupported settings version {0}")]
    UnsupportedVersion(u8),
    #[error("device name longer than 20 bytes")]
    NameTooLong,
}

/// Everything that survives a power cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationBlob {
    pub offsets: [i32; 3],
    pub device_name: String,
    pub axis_mapping: [AxisMapping; 3],
}

impl Default for CalibrationBlob {
    fn default() -> Self {
        Self {
            offsets: [0; 3],
            device_name: DEFAULT_NAME.to_string(),
            axis_mapping: DEFAULT_MAPPING,
        }
    }
}

impl CalibrationBlob {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let name = self.device_name.as_bytes();
        if name.len() > MAX_NAME_LEN {
            return Err(StorageError::NameTooLong);
        }

        let mut payload = Vec::with_capacity(PAYLOAD_LEN);
        for offset in self.offsets {
            payload.extend_from_slice(&offset.to_le_bytes());
        }
        payload.extend(self.axis_mapping.iter().map(|m| m.0));
        payload.push(name.len() as u8);
        payload.extend_from_slice(name);

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(&MAGIC);
        bytes.push(VERSION);
        bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&CRC32.checksum(&payload).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, StorageError> {
        if data.len() < HEADER_LEN {
            return Err(StorageError::Corrupt("short header"));
        }
        if data[..2] != MAGIC {
            return Err(StorageError::Corrupt("bad magic"));
        }
        let version = data[2];
        if version == 0 || version > VERSION {
            return Err(StorageError::UnsupportedVersion(version));
        }

        let len = usize::from(u16::from_le_bytes([data[3], data[4]]));
        let crc = u32::from_le_bytes([data[5], data[6], data[7], data[8]]);
        let payload = data
            .get(HEADER_LEN..HEADER_LEN + len)
            .ok_or(StorageError::Corrupt("payload length beyond buffer"))?;
        if CRC32.checksum(payload) != crc {
            return Err(StorageError::Corrupt("crc mismatch"));
        }

        let mut fixed = [0u8; PAYLOAD_LEN];
        let n = len.min(PAYLOAD_LEN);
        fixed[..n].copy_from_slice(&payload[..n]);

        let mut offsets = [0i32; 3];
        for (axis, chunk) in fixed[..12].chunks_exact(4).enumerate() {
            offsets[axis] = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        // All-zero routing means never configured
        let axis_mapping = if fixed[12..15] == [0, 0, 0] {
            DEFAULT_MAPPING
        } else {
            [
                AxisMapping(fixed[12]),
                AxisMapping(fixed[13]),
                AxisMapping(fixed[14]),
            ]
        };

        let name_len = usize::from(fixed[15]);
        if name_len > MAX_NAME_LEN {
            return Err(StorageError::Corrupt("name length"));
        }
        let name = std::str::from_utf8(&fixed[16..16 + name_len])
            .map_err(|_| StorageError::Corrupt("name not utf-8"))?;
        let device_name = if name.is_empty() {
            DEFAULT_NAME.to_string()
        } else {
            name.to_string()
        };

        Ok(Self {
            offsets,
            device_name,
            axis_mapping,
        })
    }
}

/// Settings on top of a flash backend
pub struct SettingsStore<F> {
    flash: F,
}

impl<F: Flash> SettingsStore<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Stored blob, `None` if the flash was never written
    pub fn load(&mut self) -> Result<Option<CalibrationBlob>, StorageError> {
        let Some(bytes) = self.flash.read_all()? else {
            return Ok(None);
        };
        let blob = CalibrationBlob::from_bytes(&bytes)?;
        info!(
            "Settings: loaded offsets {:?}, name \"{}\"",
            blob.offsets, blob.device_name
        );
        Ok(Some(blob))
    }

    pub fn store(&mut self, blob: &CalibrationBlob) -> Result<(), StorageError> {
        let bytes = blob.to_bytes()?;
        self.flash.write_all(&bytes)?;
        info!(
            "Settings: stored offsets {:?}, name \"{}\"",
            blob.offsets, blob.device_name
        );
        Ok(())
    }
}

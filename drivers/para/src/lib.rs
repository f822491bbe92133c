//! PARA Trainer Frame Codec
//!
//! This crate encodes and decodes the byte-stuffed channel frames spoken by
//! the PARA wireless trainer link. The same functions are used by the head
//! tracker transmit path and by bench tools that inspect captured traffic.
//!
//! # Frame layout
//!
//! ```text
//! START(0x7E) | CMD(0x80) | payload | CHECKSUM | STOP(0x7E)
//! ```
//!
//! - Payload: channels in pairs, two 12-bit values packed into 3 bytes
//! - Checksum: XOR of every raw byte from CMD through the last payload byte
//! - Stuffing: raw 0x7E / 0x7D in CMD+payload become `0x7D, byte ^ 0x20`
//! - The checksum byte is sent as-is directly before STOP
//!
//! # Features
//!
//! - `no_std` compatible (needs `alloc` for [`encode`] / [`decode`])
//! - Allocation-free transmit path via [`encode_into`]
//! - Optional `log` output with the `logging` feature
//!
//! # Example
//!
//! ```ignore
//! use para::{decode, encode};
//!
//! let channels = [1500u16; 8];
//! let frame = encode(&channels);
//! ble.notify(&frame);
//!
//! // Bench side
//! match decode(&frame) {
//!     Ok(channels) => println!("{:?}", channels),
//!     Err(e) => println!("dropped frame: {}", e),
//! }
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

#[cfg(feature = "logging")]
use log::warn;

/// Frame delimiter, used for both start and stop
pub const START_STOP: u8 = 0x7E;
/// Escape marker for reserved bytes inside the body
pub const BYTE_STUFF: u8 = 0x7D;
/// XOR mask applied to an escaped byte
pub const STUFF_MASK: u8 = 0x20;
/// Command byte for a channel update frame
pub const CMD_CHANNELS: u8 = 0x80;

/// Channel value used to pad odd-length channel arrays
pub const NEUTRAL: u16 = 1500;

/// Channels are 12 bits on the wire
const VALUE_MASK: u16 = 0x0FFF;

/// Smallest possible frame: START, CMD, CHECKSUM, STOP
const MIN_FRAME_LEN: usize = 4;

/// Frame decode / encode errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid start byte 0x{0:02X}")]
    InvalidStart(u8),
    #[error("invalid stop byte 0x{0:02X}")]
    InvalidStop(u8),
    #[error("invalid packet type 0x{0:02X}")]
    InvalidCommand(u8),
    #[error("unescaped delimiter inside frame body")]
    UnexpectedDelimiter,
    #[error("frame truncated")]
    Truncated,
    #[error("buffer overrun after stuff byte")]
    Overrun,
    #[error("checksum mismatch: frame 0x{expected:02X}, computed 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },
    #[error("output buffer too small, need {needed} bytes")]
    BufferTooSmall { needed: usize },
}

/// Pack two 12-bit channels into three wire bytes
#[inline]
pub fn pack_pair(c1: u16, c2: u16) -> [u8; 3] {
    let c1 = c1 & VALUE_MASK;
    let c2 = c2 & VALUE_MASK;
    [
        (c1 & 0xFF) as u8,
        ((((c1 >> 8) & 0x0F) << 4) | ((c2 >> 4) & 0x0F)) as u8,
        (((c2 & 0x0F) << 4) | ((c2 >> 8) & 0x0F)) as u8,
    ]
}

/// Unpack three wire bytes into two 12-bit channels
#[inline]
pub fn unpack_pair(bytes: [u8; 3]) -> (u16, u16) {
    let [b0, b1, b2] = bytes.map(u16::from);
    let c1 = b0 | ((b1 & 0xF0) << 4);
    let c2 = ((b1 & 0x0F) << 4) | ((b2 & 0x0F) << 8) | ((b2 & 0xF0) >> 4);
    (c1, c2)
}

/// Worst-case encoded size for `channel_count` channels (every body byte stuffed)
pub fn max_frame_len(channel_count: usize) -> usize {
    let raw = 1 + 3 * channel_count.div_ceil(2);
    3 + 2 * raw
}

/// Walk the raw (unstuffed) body bytes: CMD followed by packed channel pairs
fn for_each_raw_byte(channels: &[u16], mut f: impl FnMut(u8)) {
    f(CMD_CHANNELS);
    for pair in channels.chunks(2) {
        let c2 = pair.get(1).copied().unwrap_or(NEUTRAL);
        for byte in pack_pair(pair[0], c2) {
            f(byte);
        }
    }
}

#[inline]
fn needs_stuffing(byte: u8) -> bool {
    byte == START_STOP || byte == BYTE_STUFF
}

/// Encode a channel array into a complete frame
///
/// Values are masked to 12 bits. An odd number of channels is padded with
/// one [`NEUTRAL`] channel.
pub fn encode(channels: &[u16]) -> Vec<u8> {
    let mut frame = vec![0; max_frame_len(channels.len())];
    let len = encode_into(channels, &mut frame)
        .unwrap_or_else(|e| unreachable!("frame sized by max_frame_len: {}", e));
    frame.truncate(len);
    frame
}

/// Fixed buffer writer that remembers if it ran out of space
struct SliceWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    needed: usize,
}

impl SliceWriter<'_> {
    fn put(&mut self, byte: u8) {
        if let Some(slot) = self.buf.get_mut(self.len) {
            *slot = byte;
            self.len += 1;
        }
        self.needed += 1;
    }
}

/// Encode into a caller-provided buffer, returning the frame length
///
/// Same output as [`encode`] without allocating. Size the buffer with
/// [`max_frame_len`].
pub fn encode_into(channels: &[u16], out: &mut [u8]) -> Result<usize, FrameError> {
    let mut writer = SliceWriter {
        buf: out,
        len: 0,
        needed: 0,
    };
    let mut checksum = 0u8;

    writer.put(START_STOP);
    for_each_raw_byte(channels, |byte| {
        checksum ^= byte;
        if needs_stuffing(byte) {
            writer.put(BYTE_STUFF);
            writer.put(byte ^ STUFF_MASK);
        } else {
            writer.put(byte);
        }
    });
    writer.put(checksum);
    writer.put(START_STOP);

    if writer.needed > writer.len {
        return Err(FrameError::BufferTooSmall {
            needed: writer.needed,
        });
    }
    Ok(writer.len)
}

/// Decode a complete frame into its channel array
///
/// Any framing, stuffing, length or checksum problem returns an error and
/// no channels.
pub fn decode(buffer: &[u8]) -> Result<Vec<u16>, FrameError> {
    let result = decode_frame(buffer);

    if let Err(_e) = &result {
        #[cfg(feature = "logging")]
        warn!("PARA: dropping frame ({} bytes): {}", buffer.len(), _e);
    }

    result
}

fn decode_frame(buffer: &[u8]) -> Result<Vec<u16>, FrameError> {
    if buffer.len() < MIN_FRAME_LEN {
        return Err(FrameError::Truncated);
    }
    let first = buffer[0];
    if first != START_STOP {
        return Err(FrameError::InvalidStart(first));
    }
    let last = buffer[buffer.len() - 1];
    if last != START_STOP {
        return Err(FrameError::InvalidStop(last));
    }
    let transmitted = buffer[buffer.len() - 2];
    let body = &buffer[1..buffer.len() - 2];

    let mut channels = Vec::with_capacity(body.len() / 3 * 2);
    let mut checksum = 0u8;
    let mut seen_command = false;
    let mut triple = [0u8; 3];
    let mut filled = 0;

    let mut bytes = body.iter().copied();
    while let Some(byte) = bytes.next() {
        let raw = match byte {
            START_STOP => return Err(FrameError::UnexpectedDelimiter),
            BYTE_STUFF => bytes.next().ok_or(FrameError::Overrun)? ^ STUFF_MASK,
            other => other,
        };
        checksum ^= raw;

        if !seen_command {
            if raw != CMD_CHANNELS {
                return Err(FrameError::InvalidCommand(raw));
            }
            seen_command = true;
            continue;
        }

        triple[filled] = raw;
        filled += 1;
        if filled == triple.len() {
            let (c1, c2) = unpack_pair(triple);
            channels.push(c1);
            channels.push(c2);
            filled = 0;
        }
    }

    if !seen_command || filled != 0 {
        return Err(FrameError::Truncated);
    }
    if checksum != transmitted {
        return Err(FrameError::ChecksumMismatch {
            expected: transmitted,
            actual: checksum,
        });
    }

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 8 neutral channels, checked byte for byte
    const NEUTRAL_FRAME: [u8; 16] = [
        0x7E, 0x80, 0xDC, 0x5D, 0xC5, 0xDC, 0x5D, 0xC5, 0xDC, 0x5D, 0xC5, 0xDC, 0x5D, 0xC5, 0x80,
        0x7E,
    ];

    #[test]
    fn test_pack_pair_layout() {
        // 0x5DC = 1500
        assert_eq!(pack_pair(0x5DC, 0x5DC), [0xDC, 0x5D, 0xC5]);
        assert_eq!(pack_pair(0xABC, 0x123), [0xBC, 0xA2, 0x31]);
        assert_eq!(unpack_pair([0xBC, 0xA2, 0x31]), (0xABC, 0x123));
    }

    #[test]
    fn test_pack_masks_to_12_bits() {
        assert_eq!(pack_pair(0xFABC, 0xF123), pack_pair(0x0ABC, 0x0123));
    }

    #[test]
    fn test_encode_neutral_frame() {
        assert_eq!(encode(&[1500; 8]), NEUTRAL_FRAME);
    }

    #[test]
    fn test_encode_stuffs_reserved_bytes() {
        // c1 = 0x07E packs to 0x7E in byte0; checksum 0x29 stays raw
        let frame = encode(&[0x07E, 0x07D]);
        assert_eq!(frame, [0x7E, 0x80, 0x7D, 0x5E, 0x07, 0xD0, 0x29, 0x7E]);
        assert_eq!(decode(&frame).unwrap(), vec![0x07E, 0x07D]);
    }

    #[test]
    fn test_encode_into_matches_encode() {
        let channels = [988, 1200, 1500, 1750, 2012, 0x07D, 0x7E0, 4095];
        let mut buf = [0u8; 64];
        let len = encode_into(&channels, &mut buf).unwrap();
        assert_eq!(&buf[..len], encode(&channels).as_slice());
    }

    #[test]
    fn test_encode_into_small_buffer() {
        let mut buf = [0u8; 8];
        let err = encode_into(&[1500; 8], &mut buf).unwrap_err();
        assert_eq!(err, FrameError::BufferTooSmall { needed: 16 });
    }

    #[test]
    fn test_max_frame_len_bounds_output() {
        // Every packed byte is 0x7E or 0x7D
        let channels = [0xE7E, 0x7E7, 0xD7D, 0x7D7];
        assert!(encode(&channels).len() <= max_frame_len(channels.len()));
        assert_eq!(max_frame_len(16), 3 + 2 * 25);
    }

    #[test]
    fn test_odd_channel_count_padded() {
        let frame = encode(&[1000, 1100, 1200]);
        assert_eq!(decode(&frame).unwrap(), vec![1000, 1100, 1200, NEUTRAL]);
    }

    #[test]
    fn test_round_trip_full_range() {
        // Sweep values so every nibble pattern, including stuffed ones, shows up
        let mut value = 0u16;
        while value < 4096 {
            let channels: Vec<u16> = (0..16).map(|i| (value + i * 257) % 4096).collect();
            let frame = encode(&channels);
            assert_eq!(decode(&frame).unwrap(), channels, "value {}", value);
            value += 7;
        }
    }

    #[test]
    fn test_decode_rejects_truncation() {
        for channels in [[1500u16; 8], [0x07E, 0x07D, 0x7E7, 0xD7D, 1, 2, 3, 4]] {
            let frame = encode(&channels);
            for cut in 1..frame.len() {
                assert!(decode(&frame[..frame.len() - cut]).is_err(), "cut {}", cut);
            }
        }
    }

    #[test]
    fn test_decode_rejects_checksum_flip() {
        let mut frame = encode(&[1100, 1200, 1300, 1400, 1500, 1600, 1700, 1800]);
        let crc_index = frame.len() - 2;
        for bit in 0..8 {
            frame[crc_index] ^= 1 << bit;
            assert!(matches!(
                decode(&frame),
                Err(FrameError::ChecksumMismatch { .. })
            ));
            frame[crc_index] ^= 1 << bit;
        }
        assert!(decode(&frame).is_ok());
    }

    #[test]
    fn test_decode_rejects_payload_flip() {
        let mut frame = NEUTRAL_FRAME;
        frame[3] ^= 0x01;
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn test_decode_rejects_any_single_byte_flip() {
        let sets: [&[u16]; 3] = [
            &[1500; 8],
            &[988, 1200, 1500, 1750, 2012, 1000, 1300, 1900],
            &[0x07E, 0x07D, 0x7E7, 0xD7D, 0xE7E, 0x7D7, 1, 4095],
        ];
        for channels in sets {
            let frame = encode(channels);
            for index in 1..frame.len() - 1 {
                for mask in 1..=255u8 {
                    let mut corrupted = frame.clone();
                    corrupted[index] ^= mask;
                    assert!(
                        decode(&corrupted).is_err(),
                        "byte {} ^ {:#04x} accepted",
                        index,
                        mask
                    );
                }
            }
        }
    }

    #[test]
    fn test_decode_bad_delimiters() {
        let mut frame = NEUTRAL_FRAME;
        frame[0] = 0x00;
        assert_eq!(decode(&frame), Err(FrameError::InvalidStart(0x00)));

        let mut frame = NEUTRAL_FRAME;
        frame[15] = 0x55;
        assert_eq!(decode(&frame), Err(FrameError::InvalidStop(0x55)));
    }

    #[test]
    fn test_decode_bad_command() {
        // 0x81 command, checksum adjusted so only the type is wrong
        let frame = [0x7E, 0x81, 0x81, 0x7E];
        assert_eq!(decode(&frame), Err(FrameError::InvalidCommand(0x81)));
    }

    #[test]
    fn test_decode_stuff_byte_overrun() {
        // Body ends on an escape marker
        let frame = [0x7E, 0x80, 0xDC, 0x5D, 0x7D, 0x00, 0x7E];
        assert_eq!(decode(&frame), Err(FrameError::Overrun));
    }

    #[test]
    fn test_decode_bare_delimiter_in_body() {
        let frame = [0x7E, 0x80, 0x7E, 0x00, 0x00, 0xFE, 0x7E];
        assert_eq!(decode(&frame), Err(FrameError::UnexpectedDelimiter));
    }

    #[test]
    fn test_decode_empty_and_tiny() {
        assert_eq!(decode(&[]), Err(FrameError::Truncated));
        assert_eq!(decode(&[0x7E, 0x7E]), Err(FrameError::Truncated));
    }

    #[test]
    fn test_decode_command_only_frame() {
        // No channels is a valid, empty update
        assert_eq!(decode(&[0x7E, 0x80, 0x80, 0x7E]), Ok(vec![]));
    }
}

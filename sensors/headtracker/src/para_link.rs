//! PARA trainer over a BLE notify characteristic
//!
//! The link follows the sink's subscription state. On connect the boot
//! buffer goes out first. After the connect delay each tick sends one
//! encoded frame of the current channels; pacing comes from the transport
//! thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use orientation_engine::CHANNEL_NEUTRAL;

use crate::config::TrainerConfig;
use crate::trainer::{Trainer, TransportError};

/// Sent once right after a central connects
pub const BOOT_BUFFER: [u8; 2] = [0x0D, 0x0A];

/// Where notify payloads go (the BLE characteristic on the device)
pub trait NotifySink {
    /// Whether a central has subscribed to notifications
    fn subscribed(&self) -> bool;

    fn notify(&mut self, data: &[u8]) -> Result<(), TransportError>;
}

/// Host sink: frames are logged as hex
///
/// The subscription flag is shared with the console, which stands in for
/// the BLE stack's connect and disconnect events.
#[derive(Debug)]
pub struct LogSink {
    sent: u64,
    subscribed: Arc<AtomicBool>,
}

impl LogSink {
    pub fn new(subscribed: Arc<AtomicBool>) -> Self {
        Self {
            sent: 0,
            subscribed,
        }
    }
}

impl NotifySink for LogSink {
    fn subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Relaxed)
    }

    fn notify(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.sent += 1;
        // One line per second at 50 Hz
        if self.sent % 50 == 1 {
            debug!("PARA >> {}", to_hex(data));
        }
        Ok(())
    }
}

pub fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Disconnected,
    Connected { send_from: Instant },
}

/// PARA byte-stream trainer
pub struct ParaTrainer<N> {
    sink: N,
    address: String,
    channels: Vec<u16>,
    connect_delay: Duration,
    link: Link,
    frame: Vec<u8>,
}

impl<N: NotifySink> ParaTrainer<N> {
    pub fn new(sink: N, config: &TrainerConfig, channel_count: usize) -> Self {
        Self {
            sink,
            address: config.address.clone(),
            channels: vec![CHANNEL_NEUTRAL; channel_count],
            connect_delay: Duration::from_millis(config.connect_delay_ms),
            link: Link::Disconnected,
            frame: vec![0; para::max_frame_len(channel_count)],
        }
    }

    /// A central subscribed; sends the boot buffer
    fn on_connect(&mut self, now: Instant) -> Result<(), TransportError> {
        info!("PARA: central connected");
        self.sink.notify(&BOOT_BUFFER)?;
        self.link = Link::Connected {
            send_from: now + self.connect_delay,
        };
        Ok(())
    }

    fn on_disconnect(&mut self) {
        info!("PARA: central disconnected");
        self.link = Link::Disconnected;
    }

    #[cfg(test)]
    pub fn sink(&self) -> &N {
        &self.sink
    }
}

impl<N: NotifySink> Trainer for ParaTrainer<N> {
    fn start(&mut self) -> String {
        info!("PARA: advertising as {}", self.address);
        self.address.clone()
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
        matches!(self.link, Link::Connected { .. })
    }

    fn tick(&mut self, now: Instant) -> Result<u32, TransportError> {
        match (self.sink.subscribed(), self.link) {
            (true, Link::Disconnected) => self.on_connect(now)?,
            (false, Link::Connected { .. }) => self.on_disconnect(),
            _ => {}
        }

        match self.link {
            Link::Connected { send_from } if now >= send_from => {
                let len = para::encode_into(&self.channels, &mut self.frame)?;
                self.sink.notify(&self.frame[..len])?;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture {
        writes: Vec<Vec<u8>>,
        subscribed: bool,
        fail: bool,
    }

    impl NotifySink for Capture {
        fn subscribed(&self) -> bool {
            self.subscribed
        }

        fn notify(&mut self, data: &[u8]) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Write("not subscribed"));
            }
            self.writes.push(data.to_vec());
            Ok(())
        }
    }

    fn trainer() -> ParaTrainer<Capture> {
        ParaTrainer::new(Capture::default(), &TrainerConfig::default(), 8)
    }

    #[test]
    fn test_silent_until_connected() {
        let mut trainer = trainer();
        assert_eq!(trainer.start(), "B1:6B:00:B5:BA:BE");
        assert!(!trainer.paired());
        assert_eq!(trainer.tick(Instant::now()).unwrap(), 0);
        assert!(trainer.sink().writes.is_empty());
    }

    #[test]
    fn test_boot_buffer_then_delay_then_frames() {
        let mut trainer = trainer();
        let t0 = Instant::now();
        trainer.sink.subscribed = true;

        // Connect tick sends only the boot buffer, then quiet for the delay
        for ms in (0..1000).step_by(20) {
            assert_eq!(trainer.tick(t0 + Duration::from_millis(ms)).unwrap(), 0);
        }
        assert!(trainer.paired());
        assert_eq!(trainer.sink().writes, vec![BOOT_BUFFER.to_vec()]);

        trainer.set_channel(0, 1100);
        trainer.set_channel(7, 1900);
        trainer.set_channel(8, 1234); // ignored
        for ms in [1000, 1020, 1040] {
            assert_eq!(trainer.tick(t0 + Duration::from_millis(ms)).unwrap(), 1);
        }

        let writes = &trainer.sink().writes;
        assert_eq!(writes.len(), 4);
        let decoded = para::decode(&writes[3]).unwrap();
        assert_eq!(decoded, vec![1100, 1500, 1500, 1500, 1500, 1500, 1500, 1900]);
    }

    #[test]
    fn test_disconnect_stops_frames() {
        let mut trainer = trainer();
        let t0 = Instant::now();
        trainer.sink.subscribed = true;
        trainer.tick(t0).unwrap();
        assert_eq!(trainer.tick(t0 + Duration::from_secs(1)).unwrap(), 1);

        trainer.sink.subscribed = false;
        assert_eq!(trainer.tick(t0 + Duration::from_secs(2)).unwrap(), 0);
        assert!(!trainer.paired());
    }

    #[test]
    fn test_reconnect_resends_boot_buffer() {
        let mut trainer = trainer();
        let t0 = Instant::now();
        trainer.sink.subscribed = true;
        trainer.tick(t0).unwrap();
        trainer.sink.subscribed = false;
        trainer.tick(t0 + Duration::from_secs(2)).unwrap();

        trainer.sink.subscribed = true;
        let t1 = t0 + Duration::from_secs(3);
        assert_eq!(trainer.tick(t1).unwrap(), 0);
        assert_eq!(trainer.tick(t1 + Duration::from_millis(500)).unwrap(), 0);
        assert_eq!(trainer.tick(t1 + Duration::from_secs(1)).unwrap(), 1);

        let writes = &trainer.sink().writes;
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0], BOOT_BUFFER);
        assert_eq!(writes[1], BOOT_BUFFER);
    }

    #[test]
    fn test_sink_failure_reported() {
        let mut trainer = trainer();
        let t0 = Instant::now();
        trainer.sink.subscribed = true;
        trainer.tick(t0).unwrap();
        trainer.sink.fail = true;
        assert!(matches!(
            trainer.tick(t0 + Duration::from_secs(1)),
            Err(TransportError::Write(_))
        ));
    }

    #[test]
    fn test_log_sink_follows_shared_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut sink = LogSink::new(flag.clone());
        assert!(!sink.subscribed());
        flag.store(true, Ordering::Relaxed);
        assert!(sink.subscribed());
        assert!(sink.notify(&BOOT_BUFFER).is_ok());
    }

    #[test]
    fn test_hex_format() {
        assert_eq!(to_hex(&[0x7E, 0x80, 0x0D]), "7E 80 0D");
    }
}

//! Trainer link abstraction
//!
//! The sampling loop publishes a fresh channel array every tick into a
//! [`ChannelSnapshot`]. Each transport runs on its own thread, copies the
//! latest snapshot into its [`Trainer`] and lets it emit on its own clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};
use orientation_engine::CHANNEL_NEUTRAL;

use crate::diagnostics::DiagnosticsState;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("frame encoding failed: {0}")]
    Encode(#[from] para::FrameError),
    #[error("link write failed: {0}")]
    Write(&'static str),
}

/// A channel sink that paces its own output
pub trait Trainer {
    /// Bring the link up; returns the address to show the user
    fn start(&mut self) -> String;

    /// Out-of-range indices are ignored
    fn set_channel(&mut self, index: usize, value: u16);

    fn channels(&self) -> &[u16];

    /// Whether a receiver is listening
    fn paired(&self) -> bool;

    /// Emit whatever is due at `now`; returns the number of frames sent
    fn tick(&mut self, now: Instant) -> Result<u32, TransportError>;
}

/// Latest channel array, single writer and many readers
///
/// Readers get an `Arc` to an immutable array and never hold the lock
/// while transmitting.
#[derive(Clone)]
pub struct ChannelSnapshot {
    latest: Arc<Mutex<Arc<[u16]>>>,
}

impl ChannelSnapshot {
    /// All channels neutral
    pub fn new(count: usize) -> Self {
        let initial: Arc<[u16]> = vec![CHANNEL_NEUTRAL; count].into();
        Self {
            latest: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn publish(&self, channels: &[u16]) {
        let next: Arc<[u16]> = channels.into();
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    pub fn latest(&self) -> Arc<[u16]> {
        Arc::clone(&self.latest.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Run a trainer on its own thread until `running` clears
pub fn spawn_transport<T>(
    mut trainer: T,
    snapshot: ChannelSnapshot,
    interval: Duration,
    running: Arc<AtomicBool>,
    diagnostics: Arc<DiagnosticsState>,
) -> std::io::Result<JoinHandle<()>>
where
    T: Trainer + Send + 'static,
{
    thread::Builder::new()
        .name("trainer".into())
        .spawn(move || {
            let address = trainer.start();
            info!("Trainer up, address {}", address);
            diagnostics.update(|d| d.trainer.address = address);

            let mut next = Instant::now();
            while running.load(Ordering::Relaxed) {
                for (index, value) in snapshot.latest().iter().enumerate() {
                    trainer.set_channel(index, *value);
                }

                let result = trainer.tick(Instant::now());
                let paired = trainer.paired();
                match result {
                    Ok(sent) => diagnostics.update(|d| {
                        d.trainer.frames_sent += u64::from(sent);
                        d.trainer.paired = paired;
                    }),
                    Err(e) => {
                        warn!("Trainer send failed: {}", e);
                        diagnostics.update(|d| d.trainer.send_errors += 1);
                    }
                }

                next += interval;
                match next.checked_duration_since(Instant::now()) {
                    Some(wait) => thread::sleep(wait),
                    None => next = Instant::now(),
                }
            }
            info!("Trainer stopped");
        })
}

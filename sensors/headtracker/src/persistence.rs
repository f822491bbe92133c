//! Rate-limited settings writer
//!
//! Flash writes are slow and wear the page, so they happen on their own
//! thread. Offsets are written only once calibration is stable, only after
//! they drifted past a threshold and at most once per interval. Name and
//! routing changes are written as soon as they arrive.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use orientation_engine::AxisMapping;

use crate::config::PersistenceConfig;
use crate::diagnostics::DiagnosticsState;
use crate::flash_storage::Flash;
use crate::settings::{CalibrationBlob, SettingsStore, StorageError, MAX_NAME_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistRequest {
    Offsets { offsets: [i32; 3], stable: bool },
    DeviceName(String),
    AxisMapping([AxisMapping; 3]),
    /// Replace everything with defaults
    FactoryReset,
    Shutdown,
}

/// When offsets are worth a flash write
#[derive(Debug, Clone, Copy)]
pub struct PersistPolicy {
    pub min_interval: Duration,
    pub drift_threshold: i32,
}

impl PersistPolicy {
    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self {
            min_interval: Duration::from_secs(config.min_interval_s),
            drift_threshold: config.drift_threshold,
        }
    }

    pub fn should_store(
        &self,
        now: Instant,
        last_write: Option<Instant>,
        stored: [i32; 3],
        offsets: [i32; 3],
        stable: bool,
    ) -> bool {
        if !stable {
            return false;
        }
        let interval_elapsed =
            last_write.map_or(true, |t| now.duration_since(t) >= self.min_interval);
        let drift = stored
            .iter()
            .zip(offsets)
            .map(|(&a, b)| a.abs_diff(b))
            .max()
            .unwrap_or(0);
        interval_elapsed && drift > self.drift_threshold.unsigned_abs()
    }
}

/// Sending side, cheap to clone
#[derive(Clone)]
pub struct PersistHandle {
    tx: Sender<PersistRequest>,
}

impl PersistHandle {
    pub fn channel() -> (Self, Receiver<PersistRequest>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    fn send(&self, request: PersistRequest) {
        if self.tx.send(request).is_err() {
            warn!("Persister stopped, settings request dropped");
        }
    }

    pub fn offsets(&self, offsets: [i32; 3], stable: bool) {
        self.send(PersistRequest::Offsets { offsets, stable });
    }

    pub fn device_name(&self, name: String) {
        self.send(PersistRequest::DeviceName(name));
    }

    pub fn axis_mapping(&self, mapping: [AxisMapping; 3]) {
        self.send(PersistRequest::AxisMapping(mapping));
    }

    pub fn factory_reset(&self) {
        self.send(PersistRequest::FactoryReset);
    }

    pub fn shutdown(&self) {
        self.send(PersistRequest::Shutdown);
    }
}

/// Owns the settings store and the last written blob
pub struct Persister<F> {
    store: SettingsStore<F>,
    blob: CalibrationBlob,
    policy: PersistPolicy,
    last_write: Option<Instant>,
    diagnostics: Arc<DiagnosticsState>,
}

impl<F: Flash + Send + 'static> Persister<F> {
    /// `blob` is what the flash currently holds (or the defaults)
    pub fn new(
        store: SettingsStore<F>,
        blob: CalibrationBlob,
        policy: PersistPolicy,
        diagnostics: Arc<DiagnosticsState>,
    ) -> Self {
        Self {
            store,
            blob,
            policy,
            last_write: None,
            diagnostics,
        }
    }

    #[cfg(test)]
    pub fn blob(&self) -> &CalibrationBlob {
        &self.blob
    }

    /// Start the writer thread
    pub fn spawn(self) -> std::io::Result<(PersistHandle, JoinHandle<()>)> {
        let (handle, rx) = PersistHandle::channel();
        let thread = thread::Builder::new()
            .name("persister".into())
            .spawn(move || self.run(rx))?;
        Ok((handle, thread))
    }

    /// Process requests until shutdown or all senders are gone
    pub fn run(mut self, rx: Receiver<PersistRequest>) {
        while let Ok(request) = rx.recv() {
            if !self.handle(request, Instant::now()) {
                break;
            }
        }
        info!("Persister stopped");
    }

    /// Returns false on shutdown
    pub fn handle(&mut self, request: PersistRequest, now: Instant) -> bool {
        match request {
            PersistRequest::Offsets { offsets, stable } => {
                if self.policy.should_store(
                    now,
                    self.last_write,
                    self.blob.offsets,
                    offsets,
                    stable,
                ) {
                    debug!(
                        "Offsets drifted {:?} -> {:?}, storing",
                        self.blob.offsets, offsets
                    );
                    // A failed write waits for the next window
                    self.last_write = Some(now);
                    let next = CalibrationBlob {
                        offsets,
                        ..self.blob.clone()
                    };
                    self.write(next);
                }
            }
            PersistRequest::DeviceName(name) => {
                if name == self.blob.device_name {
                    debug!("Device name unchanged, not storing");
                } else if name.len() > MAX_NAME_LEN {
                    warn!("Device name \"{}\" too long, ignored", name);
                } else {
                    let next = CalibrationBlob {
                        device_name: name,
                        ..self.blob.clone()
                    };
                    self.write(next);
                }
            }
            PersistRequest::AxisMapping(axis_mapping) => {
                let next = CalibrationBlob {
                    axis_mapping,
                    ..self.blob.clone()
                };
                self.write(next);
            }
            PersistRequest::FactoryReset => {
                info!("Factory reset: storing defaults");
                self.write(CalibrationBlob::default());
            }
            PersistRequest::Shutdown => return false,
        }
        true
    }

    fn write(&mut self, next: CalibrationBlob) {
        match self.store.store(&next) {
            Ok(()) => self.blob = next,
            Err(e) => self.report(e),
        }
    }

    fn report(&self, e: StorageError) {
        warn!("Settings write failed: {}", e);
        self.diagnostics.update(|d| d.storage_errors += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash_storage::MemoryFlash;

    fn persister(flash: &MemoryFlash) -> Persister<MemoryFlash> {
        Persister::new(
            SettingsStore::new(flash.clone()),
            CalibrationBlob::default(),
            PersistPolicy::from_config(&PersistenceConfig::default()),
            DiagnosticsState::new(),
        )
    }

    fn stored(flash: &MemoryFlash) -> CalibrationBlob {
        CalibrationBlob::from_bytes(&flash.data().unwrap()).unwrap()
    }

    #[test]
    fn test_policy_gates() {
        let policy = PersistPolicy::from_config(&PersistenceConfig::default());
        let now = Instant::now();
        let moved = [30_000, 0, 0];

        assert!(policy.should_store(now, None, [0; 3], moved, true));
        assert!(!policy.should_store(now, None, [0; 3], moved, false));
        assert!(!policy.should_store(now, None, [0; 3], [25_000, 0, 0], true));
        let recent = now - Duration::from_secs(5);
        assert!(!policy.should_store(now, Some(recent), [0; 3], moved, true));
        let old = now - Duration::from_secs(30);
        assert!(policy.should_store(now, Some(old), [0; 3], moved, true));
    }

    #[test]
    fn test_offsets_rate_limited() {
        let flash = MemoryFlash::new();
        let mut p = persister(&flash);
        let t0 = Instant::now();

        // Not yet stable
        p.handle(PersistRequest::Offsets { offsets: [400_000, 0, 0], stable: false }, t0);
        assert_eq!(flash.writes(), 0);

        p.handle(PersistRequest::Offsets { offsets: [400_000, 0, 0], stable: true }, t0);
        assert_eq!(flash.writes(), 1);
        assert_eq!(stored(&flash).offsets, [400_000, 0, 0]);

        // Drifted, but inside the interval
        let t1 = t0 + Duration::from_secs(10);
        p.handle(PersistRequest::Offsets { offsets: [500_000, 0, 0], stable: true }, t1);
        assert_eq!(flash.writes(), 1);

        // Interval passed, small drift
        let t2 = t0 + Duration::from_secs(40);
        p.handle(PersistRequest::Offsets { offsets: [410_000, 0, 0], stable: true }, t2);
        assert_eq!(flash.writes(), 1);

        p.handle(PersistRequest::Offsets { offsets: [500_000, 0, 0], stable: true }, t2);
        assert_eq!(flash.writes(), 2);
        assert_eq!(p.blob().offsets, [500_000, 0, 0]);
    }

    #[test]
    fn test_name_stored_only_when_changed() {
        let flash = MemoryFlash::new();
        let mut p = persister(&flash);
        let now = Instant::now();

        p.handle(PersistRequest::DeviceName("HT".into()), now);
        assert_eq!(flash.writes(), 0);

        p.handle(PersistRequest::DeviceName("Goggles".into()), now);
        p.handle(PersistRequest::DeviceName("Goggles".into()), now);
        assert_eq!(flash.writes(), 1);
        assert_eq!(stored(&flash).device_name, "Goggles");

        p.handle(PersistRequest::DeviceName("x".repeat(21)), now);
        assert_eq!(flash.writes(), 1);
    }

    #[test]
    fn test_mapping_and_factory_reset() {
        let flash = MemoryFlash::new();
        let mut p = persister(&flash);
        let now = Instant::now();
        let mapping = [AxisMapping(0x12), AxisMapping(0x31), AxisMapping(0x00)];

        p.handle(PersistRequest::DeviceName("Goggles".into()), now);
        p.handle(PersistRequest::AxisMapping(mapping), now);
        let blob = stored(&flash);
        assert_eq!(blob.axis_mapping, mapping);
        assert_eq!(blob.device_name, "Goggles");

        p.handle(PersistRequest::FactoryReset, now);
        assert_eq!(stored(&flash), CalibrationBlob::default());
        assert!(!p.handle(PersistRequest::Shutdown, now));
    }

    #[test]
    fn test_thread_drains_then_stops() {
        let flash = MemoryFlash::new();
        let (handle, thread) = persister(&flash).spawn().unwrap();
        handle.device_name("Bench".into());
        handle.shutdown();
        thread.join().unwrap();

        assert_eq!(stored(&flash).device_name, "Bench");
        // Requests after shutdown are dropped, not panics
        handle.factory_reset();
    }
}

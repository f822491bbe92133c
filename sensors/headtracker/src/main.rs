mod commands;
mod config;
mod diagnostics;
mod flash_storage;
mod para_link;
mod persistence;
mod ppm;
mod settings;
mod system;
mod trainer;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use commands::{command_channel, CommandSender, RemoteCommand};
use config::{SystemConfig, TrainerKind};
use diagnostics::DiagnosticsState;
use flash_storage::FileFlash;
use log::{info, warn};
use orientation_engine::{OrientationEstimator, SimulatedImu};
use para_link::{LogSink, ParaTrainer};
use persistence::{PersistPolicy, Persister};
use ppm::{LogPulseOutput, PpmTrainer};
use settings::SettingsStore;
use system::{TickOutcome, Tracker};
use trainer::{spawn_transport, ChannelSnapshot};

#[derive(Parser, Debug)]
#[command(author, version, about = "Head tracker: IMU fusion to PARA / PPM trainer output")]
struct Args {
    /// JSON config file (built-in defaults and HT_* build overrides when omitted)
    config: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(args.config.as_deref());

    info!("=== Head Tracker ===");
    info!(
        "Board: {}, Rate: {}Hz, Trainer: {}, Channels: {}, Range: ±{}°",
        config.imu.board.name(),
        config.tick_rate_hz(),
        config.trainer.kind.name(),
        config.channels.channel_count,
        config.channels.max_angle_deg
    );

    let diagnostics = DiagnosticsState::new();

    // Stored settings; a corrupt page means starting from zero offsets
    let mut store = SettingsStore::new(FileFlash::new(&config.persistence.path));
    let blob = match store.load() {
        Ok(Some(blob)) => blob,
        Ok(None) => {
            info!("No stored settings, using defaults");
            Default::default()
        }
        Err(e) => {
            warn!("Stored settings unusable ({}), using defaults", e);
            Default::default()
        }
    };

    let persister = Persister::new(
        store,
        blob.clone(),
        PersistPolicy::from_config(&config.persistence),
        diagnostics.clone(),
    );
    let (persist, persister_thread) = persister.spawn().expect("Failed to start persister");

    // Trainer link on its own thread
    let snapshot = ChannelSnapshot::new(config.channels.channel_count);
    let running = Arc::new(AtomicBool::new(true));
    // No BLE stack on the host: a central is subscribed from boot and the
    // console connects or disconnects it
    let subscribed = Arc::new(AtomicBool::new(true));
    let transport_thread = match config.trainer.kind {
        TrainerKind::Para => {
            let trainer = ParaTrainer::new(
                LogSink::new(subscribed.clone()),
                &config.trainer,
                config.channels.channel_count,
            );
            spawn_transport(
                trainer,
                snapshot.clone(),
                Duration::from_millis(config.trainer.send_interval_ms),
                running.clone(),
                diagnostics.clone(),
            )
        }
        TrainerKind::Ppm => spawn_transport(
            PpmTrainer::new(LogPulseOutput::default(), &config.trainer),
            snapshot.clone(),
            Duration::from_micros(u64::from(config.trainer.ppm_frame_us)),
            running.clone(),
            diagnostics.clone(),
        ),
    }
    .expect("Failed to start trainer");

    // Remote commands: stdin stands in for the BLE configuration service
    let (commands_tx, commands) = command_channel();
    spawn_console(commands_tx, subscribed);

    let imu = SimulatedImu::new(
        config.imu.period_ms as f64 / 1000.0,
        config.imu.simulated_bias,
    )
    .with_board(config.imu.board);
    let estimator = OrientationEstimator::new(
        imu,
        config.imu.board,
        config.fusion_config(),
        config.calibration,
    );

    let mut tracker = Tracker::new(
        estimator,
        snapshot,
        commands,
        persist.clone(),
        diagnostics.clone(),
        &config,
        Instant::now(),
    );
    tracker.restore(&blob);
    info!(
        "Device \"{}\", warming up gyro calibration",
        tracker.device_name()
    );

    // Fixed-period loop; an overrun restarts the schedule instead of bursting
    let period = Duration::from_millis(config.imu.period_ms);
    let mut next = Instant::now();
    loop {
        if tracker.tick(Instant::now()) == TickOutcome::Reboot {
            break;
        }
        next += period;
        match next.checked_duration_since(Instant::now()) {
            Some(wait) => thread::sleep(wait),
            None => {
                diagnostics.update(|d| d.sensor.overruns += 1);
                next = Instant::now();
            }
        }
    }

    info!("Reboot requested, shutting down");
    running.store(false, Ordering::Relaxed);
    persist.shutdown();
    if transport_thread.join().is_err() {
        warn!("Trainer thread panicked");
    }
    if persister_thread.join().is_err() {
        warn!("Persister thread panicked");
    }
    info!(
        "Final offsets {:?}, status {}",
        tracker.estimator().calibrator().offsets(),
        diagnostics.snapshot().to_json()
    );
}

/// Built-in defaults and compile-time overrides, or a JSON file
fn load_config(path: Option<&Path>) -> SystemConfig {
    let Some(path) = path else {
        let config = SystemConfig::from_env();
        return match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!("Build-time overrides rejected ({}), using defaults", e);
                SystemConfig::default()
            }
        };
    };

    match SystemConfig::from_file(&path) {
        Ok(config) => {
            info!("Config loaded from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Config {} not used ({}), using defaults", path.display(), e);
            SystemConfig::default()
        }
    }
}

/// Read commands line by line from stdin until EOF
///
/// `connect` and `disconnect` play the BLE central; everything else goes to
/// the tracker.
fn spawn_console(tx: CommandSender, subscribed: Arc<AtomicBool>) {
    let spawned = thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match line.trim() {
                    "" => continue,
                    "connect" => {
                        subscribed.store(true, Ordering::Relaxed);
                        continue;
                    }
                    "disconnect" => {
                        subscribed.store(false, Ordering::Relaxed);
                        continue;
                    }
                    _ => {}
                }
                match RemoteCommand::parse(&line) {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    None => warn!(
                        "Unknown command \"{}\" (reset, reboot, factory, name <n>, \
                         map <r> <p> <y>, layout <offset> <order> <mask>, \
                         connect, disconnect)",
                        line.trim()
                    ),
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Console unavailable: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_argument() {
        let args = Args::try_parse_from(["headtracker", "bench.json"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("bench.json")));

        let args = Args::try_parse_from(["headtracker"]).unwrap();
        assert_eq!(args.config, None);
        assert!(Args::try_parse_from(["headtracker", "a.json", "b.json"]).is_err());
    }

    #[test]
    fn test_unreadable_config_falls_back_to_defaults() {
        let missing = std::env::temp_dir().join("ht-missing-config.json");
        let config = load_config(Some(&missing));
        assert!(config.validate().is_ok());
        assert_eq!(config.channels.channel_count, 8);
    }
}

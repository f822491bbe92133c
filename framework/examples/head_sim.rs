//! Simulates a head-tracking session to verify calibration, centering and
//! channel output end to end
//!
//! The simulated IMU has a sizeable gyro bias that the calibrator has to
//! learn without a hold-still phase, then the head looks around and the
//! resulting channels are printed.
//!
//! **Key test**: after warm-up the yaw channel must stay near 1500 while the
//! head is still. Uncorrected bias would walk it off center.
//!
//! Run with: cargo run -p orientation-engine --example head_sim

use orientation_engine::{
    BoardProfile, ChannelMapper, FusionConfig, GyroCalConfig, InertialSensor,
    OrientationEstimator, SimulatedImu,
};

const DT: f64 = 0.02;

fn channels_str(channels: &[u16]) -> String {
    channels[..3]
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `ticks` updates and print a line every second
fn run_phase<S: InertialSensor>(
    estimator: &mut OrientationEstimator<S>,
    mapper: &ChannelMapper,
    channels: &mut [u16; 8],
    ticks: usize,
) {
    for i in 0..ticks {
        if estimator.update().is_ok() {
            mapper.apply(&estimator.angles(), channels);
        }
        if i % 50 == 49 {
            let [roll, pitch, yaw] = estimator.angles().degrees();
            println!(
                "  t={:.1}s: roll={:6.1}° pitch={:6.1}° yaw={:6.1}°  ch={}",
                (i + 1) as f64 * DT,
                roll,
                pitch,
                yaw,
                channels_str(channels)
            );
        }
    }
}

fn main() {
    let bias = [850_000, -600_000, 1_200_000];
    let imu = SimulatedImu::new(DT, bias).with_attitude(12.0, -8.0, 0.0);
    let mut estimator = OrientationEstimator::new(
        imu,
        BoardProfile::Identity,
        FusionConfig::default(),
        GyroCalConfig::default(),
    );
    let mapper = ChannelMapper::default();
    let mut channels = [1500u16; 8];

    println!("=== Head Tracker Simulation ===\n");
    println!(
        "Gyro bias: {:?} µdeg/s, head tilted 12° roll / -8° pitch\n",
        bias
    );

    // Phase 1: warm-up calibration, no fusion
    println!("Phase 1: CALIBRATION WARM-UP");
    let mut batches = 0;
    while !estimator.is_stable() && batches < 40 {
        let mut last = [0; 3];
        for _ in 0..=estimator.calibrator().config().batch_size {
            if let Ok(correction) = estimator.calibrate() {
                last = correction;
            }
        }
        batches += 1;
        println!("  batch {:2}: last correction {:?}", batches, last);
    }
    println!(
        "  Stable: {}, offsets {:?} (true bias {:?})\n",
        estimator.is_stable(),
        estimator.calibrator().offsets(),
        bias
    );

    // Phase 2: center on the tilted pose
    println!("Phase 2: CENTER");
    match estimator.reset() {
        Ok(()) => println!("  Current pose is now zero\n"),
        Err(e) => println!("  Reset failed: {}\n", e),
    }

    // Phase 3: hold still
    println!("Phase 3: HOLD STILL (3s)");
    run_phase(&mut estimator, &mapper, &mut channels, 150);
    println!();

    // Phase 4: look left
    println!("Phase 4: LOOK LEFT (1s at 30°/s)");
    estimator.sensor_mut().set_rate(0.0, 0.0, 30.0);
    run_phase(&mut estimator, &mapper, &mut channels, 50);
    estimator.sensor_mut().set_rate(0.0, 0.0, 0.0);
    run_phase(&mut estimator, &mapper, &mut channels, 50);
    println!();

    // Phase 5: nod down
    println!("Phase 5: NOD (0.5s at 40°/s)");
    estimator.sensor_mut().set_rate(0.0, 40.0, 0.0);
    run_phase(&mut estimator, &mapper, &mut channels, 25);
    estimator.sensor_mut().set_rate(0.0, 0.0, 0.0);
    run_phase(&mut estimator, &mapper, &mut channels, 100);
    println!();

    // Phase 6: recenter via tap
    println!("Phase 6: DOUBLE-TAP RECENTER");
    estimator.sensor_mut().tap();
    if estimator.tapped() {
        estimator.reset().ok();
    }
    run_phase(&mut estimator, &mapper, &mut channels, 50);

    let [roll, pitch, yaw] = estimator.angles().degrees();
    println!("\n  FINAL: roll={:.2}° pitch={:.2}° yaw={:.2}°", roll, pitch, yaw);
    if roll.abs() < 1.0 && pitch.abs() < 1.0 && yaw.abs() < 1.0 {
        println!("  ✓ PASS: centered after recenter");
    } else {
        println!("  ⚠️  WARNING: not centered after recenter");
    }
}

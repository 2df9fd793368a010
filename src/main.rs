use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

use motion_capture_rs::export::CaptureExport;
use motion_capture_rs::logger::init_logger;
use motion_capture_rs::sensors::{Channel, Replay, SimulatedDeviceMotion, SimulatedStream, TermuxSensor};
use motion_capture_rs::{
    AppConfig, CaptureSession, HttpCollector, MeasurementMetrics, Permission, SensorKind,
    SensorSource, SessionReport, UploadCoordinator,
};

#[derive(Parser, Debug)]
#[command(name = "motion_capture")]
#[command(about = "Fixed-duration motion capture with upload to a measurement collector", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Capture length in ticks
    #[arg(long)]
    duration: Option<u32>,

    /// Tick length in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Collector base URL
    #[arg(long)]
    collector: Option<String>,

    /// User UUID sent with every payload
    #[arg(long)]
    user_id: Option<String>,

    /// Also start the motion-only and rotation-only streams
    #[arg(long)]
    secondary: bool,

    /// Read real sensors via termux-sensor
    #[arg(long)]
    termux: bool,

    /// Replay a recorded JSON event script instead of live sensors
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Directory for the capture export
    #[arg(long, default_value = "motion_capture_sessions")]
    output_dir: PathBuf,

    /// Simulate the user declining motion access
    #[arg(long)]
    deny_permission: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(ticks) = self.duration {
            config.session.duration_ticks = ticks;
        }
        if let Some(ms) = self.tick_ms {
            config.session.tick_interval_ms = ms;
        }
        if let Some(url) = &self.collector {
            config.upload.collector_base_url = url.clone();
        }
        if let Some(user) = &self.user_id {
            config.upload.user_id = user.clone();
        }
        if self.secondary {
            config.sensors.motion_only = true;
            config.sensors.rotation_only = true;
        }
        if self.termux {
            config.sensors.termux = true;
        }
        if self.deny_permission {
            config.sensors.permission_granted = false;
        }
    }
}

fn build_source(config: &AppConfig, replay: Option<&PathBuf>) -> Result<SensorSource> {
    let permission = if config.sensors.permission_granted {
        Permission::Granted
    } else {
        Permission::Denied
    };
    let mut source = SensorSource::new(permission);
    let interval = config.sample_interval();

    if let Some(path) = replay {
        let replay = Replay::load(path).with_context(|| format!("Failed to load replay {:?}", path))?;
        info!("Replaying {} recorded events from {:?}", replay.len(), path);
        source.push_mechanism(Box::new(replay));
        return Ok(source);
    }

    if config.sensors.termux {
        source.push_mechanism(Box::new(TermuxSensor::new(Channel::Accelerometer, interval)));
        source.push_mechanism(Box::new(TermuxSensor::new(Channel::Gyroscope, interval)));
    } else {
        if config.sensors.combined {
            source.push_mechanism(Box::new(SimulatedDeviceMotion::new(interval)));
        }
        if config.sensors.motion_only {
            source.push_mechanism(Box::new(SimulatedStream::accelerometer(interval)));
        }
        if config.sensors.rotation_only {
            source.push_mechanism(Box::new(SimulatedStream::gyroscope(interval)));
        }
    }

    if source.mechanism_count() == 0 {
        warn!("No sensor mechanism enabled; the capture will be empty");
    }
    Ok(source)
}

fn print_metrics(kind: SensorKind, metrics: &MeasurementMetrics) {
    println!("{} metrics:", kind);
    println!("{}", metrics);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => AppConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let session_config = config.session_config();
    println!("=== Motion Capture ===");
    println!(
        "  Duration:   {} x {} ms",
        session_config.duration_ticks, config.session.tick_interval_ms
    );
    println!(
        "  Collector:  {}{}",
        config.upload.collector_base_url, config.upload.endpoint
    );
    println!("  Output Dir: {:?}", args.output_dir);

    let source = build_source(&config, args.replay.as_ref())?;
    let collector = HttpCollector::new(
        &config.upload.collector_base_url,
        &config.upload.endpoint,
        config.request_timeout(),
    )?;
    let coordinator = UploadCoordinator::new(collector, config.user_id()?);
    let (session, handle) = CaptureSession::new(session_config, source, coordinator);

    // Countdown display
    let mut remaining = handle.watch_remaining();
    tokio::spawn(async move {
        while remaining.changed().await.is_ok() {
            let left = *remaining.borrow_and_update();
            println!("  {} remaining", left);
        }
    });

    let cancel = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling capture");
            cancel.cancel();
        }
    });

    let report = session.run().await?;
    let (capture, upload) = match report {
        SessionReport::Finished { capture, upload } => (capture, upload),
        SessionReport::Cancelled => {
            println!("Capture cancelled, nothing uploaded");
            return Ok(());
        }
    };

    println!("\n=== Capture Finished ===");
    println!(
        "Motion readings: {}, rotation readings: {}",
        capture.motion().len(),
        capture.rotation().len()
    );
    println!("Upload: {}", upload);

    let export = CaptureExport::new(&capture, Some(&upload));
    print_metrics(SensorKind::Accel, &export.summary.motion_metrics);
    print_metrics(SensorKind::Gyro, &export.summary.rotation_metrics);

    let path = export
        .write_to(&args.output_dir)
        .with_context(|| format!("Failed to write export to {:?}", args.output_dir))?;
    println!("Saved capture to {}", path.display());

    if !upload.all_delivered() {
        warn!("Some payloads were not delivered; data kept in {}", path.display());
    }
    Ok(())
}

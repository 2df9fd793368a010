use crate::error::{CaptureError, CaptureResult};
use crate::readings::{DeviceMotionEvent, RotationRate, Vector3};
use crate::source::{ReadingSink, SensorMechanism};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};

/// Combined accel + rotation stream (the primary ingestion path).
///
/// Produces a gently swaying handheld signal with gravity on z.
pub struct SimulatedDeviceMotion {
    interval: Duration,
    /// Emit an event without rotation data every Nth event
    drop_rotation_every: Option<u64>,
}

impl SimulatedDeviceMotion {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            drop_rotation_every: None,
        }
    }

    pub fn dropping_rotation_every(mut self, n: u64) -> Self {
        self.drop_rotation_every = Some(n.max(1));
        self
    }
}

impl SensorMechanism for SimulatedDeviceMotion {
    fn name(&self) -> &'static str {
        "devicemotion"
    }

    fn start(self: Box<Self>, sink: ReadingSink) -> CaptureResult<JoinHandle<()>> {
        Ok(tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut seq = 0u64;

            loop {
                ticker.tick().await;
                seq += 1;

                let t = seq as f64 * self.interval.as_secs_f64();
                let rotation = match self.drop_rotation_every {
                    Some(n) if seq % n == 0 => None,
                    _ => Some(mock_rotation(t)),
                };
                let event = DeviceMotionEvent::new(mock_accel(t), rotation);

                if !sink.combined(event).await {
                    debug!("[devicemotion] Sink closed after {} events", seq);
                    break;
                }
            }
        }))
    }
}

/// Which axis set a secondary stream reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Accelerometer,
    Gyroscope,
}

impl Channel {
    fn termux_name(&self) -> &'static str {
        match self {
            Channel::Accelerometer => "accelerometer",
            Channel::Gyroscope => "gyroscope",
        }
    }
}

/// Independent motion-only or rotation-only stream (secondary path).
pub struct SimulatedStream {
    channel: Channel,
    interval: Duration,
}

impl SimulatedStream {
    pub fn accelerometer(interval: Duration) -> Self {
        Self {
            channel: Channel::Accelerometer,
            interval,
        }
    }

    pub fn gyroscope(interval: Duration) -> Self {
        Self {
            channel: Channel::Gyroscope,
            interval,
        }
    }
}

impl SensorMechanism for SimulatedStream {
    fn name(&self) -> &'static str {
        match self.channel {
            Channel::Accelerometer => "accelerometer",
            Channel::Gyroscope => "gyroscope",
        }
    }

    fn start(self: Box<Self>, sink: ReadingSink) -> CaptureResult<JoinHandle<()>> {
        Ok(tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut seq = 0u64;

            loop {
                ticker.tick().await;
                seq += 1;

                let t = seq as f64 * self.interval.as_secs_f64();
                let delivered = match self.channel {
                    Channel::Accelerometer => sink.motion(mock_accel(t)).await,
                    Channel::Gyroscope => sink.rotation(mock_rotation(t)).await,
                };
                if !delivered {
                    debug!("[{}] Sink closed after {} samples", self.channel.termux_name(), seq);
                    break;
                }
            }
        }))
    }
}

/// Reads single samples from the Termux:API `termux-sensor` tool on Android.
pub struct TermuxSensor {
    channel: Channel,
    interval: Duration,
    executable: String,
}

impl TermuxSensor {
    pub fn new(channel: Channel, interval: Duration) -> Self {
        Self {
            channel,
            interval,
            executable: "termux-sensor".to_string(),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }
}

impl SensorMechanism for TermuxSensor {
    fn name(&self) -> &'static str {
        match self.channel {
            Channel::Accelerometer => "termux-accelerometer",
            Channel::Gyroscope => "termux-gyroscope",
        }
    }

    fn start(self: Box<Self>, sink: ReadingSink) -> CaptureResult<JoinHandle<()>> {
        // Resolved without spawning; start runs on a runtime thread
        let Some(executable) = find_executable(&self.executable) else {
            return Err(CaptureError::SensorUnavailable(format!(
                "{} not found on PATH",
                self.executable
            )));
        };
        debug!("[termux] Using {:?}", executable);

        Ok(tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut misses = 0u64;

            loop {
                ticker.tick().await;
                if sink.is_closed() {
                    break;
                }

                let executable = executable.clone();
                let channel = self.channel;
                let sample = tokio::task::spawn_blocking(move || read_termux(&executable, channel))
                    .await
                    .ok()
                    .flatten();

                let Some(vector) = sample else {
                    misses += 1;
                    if misses % 50 == 1 {
                        warn!("[termux] No {} reading ({} misses)", channel.termux_name(), misses);
                    }
                    continue;
                };

                let delivered = match channel {
                    Channel::Accelerometer => sink.motion(vector).await,
                    Channel::Gyroscope => {
                        sink.rotation(RotationRate::new(vector.x, vector.y, vector.z)).await
                    }
                };
                if !delivered {
                    break;
                }
            }
        }))
    }
}

/// Locate `name` the way a shell would: as given when it contains a path
/// separator, otherwise in each `PATH` entry.
fn find_executable(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|full| full.is_file())
}

fn read_termux(executable: &Path, channel: Channel) -> Option<Vector3> {
    let output = Command::new(executable)
        .arg("-n")
        .arg("1")
        .arg("-s")
        .arg(channel.termux_name())
        .output()
        .ok()?;
    parse_termux_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse one `termux-sensor` sample.
///
/// Accepts the JSON form (`{"<sensor>": {"values": [x, y, z]}}`) and the
/// older `x=.., y=.., z=..` text form.
pub fn parse_termux_output(output: &str) -> Option<Vector3> {
    if let Ok(json) = serde_json::from_str::<Value>(output) {
        let values = json
            .as_object()?
            .values()
            .find_map(|sensor| sensor.get("values"))?
            .as_array()?;
        if values.len() < 3 {
            return None;
        }
        return Some(Vector3::new(
            values[0].as_f64()?,
            values[1].as_f64()?,
            values[2].as_f64()?,
        ));
    }

    let mut axes = [None; 3];
    for part in output.split(',') {
        let part = part.trim();
        let (slot, value) = if let Some(v) = part.strip_prefix("x=") {
            (0, v)
        } else if let Some(v) = part.strip_prefix("y=") {
            (1, v)
        } else if let Some(v) = part.strip_prefix("z=") {
            (2, v)
        } else {
            continue;
        };
        axes[slot] = Some(value.trim().parse::<f64>().ok()?);
    }

    Some(Vector3::new(axes[0]?, axes[1]?, axes[2]?))
}

/// One step of a recorded capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedEvent {
    /// Offset from the moment the mechanism starts
    pub after_ms: u64,
    pub event: RecordedEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordedEvent {
    Combined(DeviceMotionEvent),
    Motion(Vector3),
    Rotation(RotationRate),
}

/// Replays a recorded event script on its original timing.
pub struct Replay {
    script: Vec<ScriptedEvent>,
}

impl Replay {
    pub fn new(mut script: Vec<ScriptedEvent>) -> Self {
        script.sort_by_key(|step| step.after_ms);
        Self { script }
    }

    pub fn from_json(text: &str) -> CaptureResult<Self> {
        let script: Vec<ScriptedEvent> = serde_json::from_str(text)
            .map_err(|e| CaptureError::Config(format!("Invalid replay script: {}", e)))?;
        Ok(Self::new(script))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> CaptureResult<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CaptureError::Config(format!("Cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

impl SensorMechanism for Replay {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn start(self: Box<Self>, sink: ReadingSink) -> CaptureResult<JoinHandle<()>> {
        Ok(tokio::spawn(async move {
            let started = Instant::now();
            for step in self.script {
                sleep_until(started + Duration::from_millis(step.after_ms)).await;
                let delivered = match step.event {
                    RecordedEvent::Combined(event) => sink.combined(event).await,
                    RecordedEvent::Motion(accel) => sink.motion(accel).await,
                    RecordedEvent::Rotation(rate) => sink.rotation(rate).await,
                };
                if !delivered {
                    break;
                }
            }
        }))
    }
}

fn mock_accel(t: f64) -> Vector3 {
    Vector3::new(
        (t * 2.0 * PI).sin() * 0.5,
        (t * 2.0 * PI).cos() * 0.3,
        9.81 + (t * PI).sin() * 0.1,
    )
}

fn mock_rotation(t: f64) -> RotationRate {
    RotationRate::new(
        (t * 0.5).sin() * 5.0,
        (t * 0.3).cos() * 3.0,
        (t * 1.0).sin() * 10.0,
    )
}

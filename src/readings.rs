use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Which of the two captured channels a payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Acceleration including gravity
    Accel,
    /// Rotation rate
    Gyro,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Accel => "accel",
            SensorKind::Gyro => "gyro",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accelerometer sample (acceleration including gravity, m/s²)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionReading {
    /// Epoch milliseconds
    pub ts: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl MotionReading {
    pub fn new(ts: i64, x: f64, y: f64, z: f64) -> Self {
        Self { ts, x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Rotation-rate sample (deg/s around the device axes)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationReading {
    /// Epoch milliseconds
    pub ts: i64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl RotationReading {
    pub fn new(ts: i64, alpha: f64, beta: f64, gamma: f64) -> Self {
        Self {
            ts,
            alpha,
            beta,
            gamma,
        }
    }

    pub fn magnitude(&self) -> f64 {
        (self.alpha * self.alpha + self.beta * self.beta + self.gamma * self.gamma).sqrt()
    }
}

/// Raw 3-axis vector as delivered by a platform sensor.
///
/// Missing axes deserialize to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Raw rotation rate; any axis may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationRate {
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
}

impl RotationRate {
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self {
            alpha: Some(alpha),
            beta: Some(beta),
            gamma: Some(gamma),
        }
    }
}

/// Combined device-motion event: one acceleration vector and one rotation
/// rate sharing the same capture instant. Either part may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMotionEvent {
    pub acceleration_including_gravity: Option<Vector3>,
    pub rotation_rate: Option<RotationRate>,
}

impl DeviceMotionEvent {
    pub fn new(accel: Vector3, rotation: Option<RotationRate>) -> Self {
        Self {
            acceleration_including_gravity: Some(accel),
            rotation_rate: rotation,
        }
    }

    /// Split into one motion and one rotation reading stamped with `ts`.
    ///
    /// Absent data resolves to zero here so nothing optional reaches the buffer.
    pub fn decompose(&self, ts: i64) -> (MotionReading, RotationReading) {
        let accel = self.acceleration_including_gravity.unwrap_or_default();
        let rate = self.rotation_rate.unwrap_or_default();
        (motion_reading(ts, accel), rotation_reading(ts, rate))
    }
}

pub fn motion_reading(ts: i64, accel: Vector3) -> MotionReading {
    MotionReading::new(ts, accel.x, accel.y, accel.z)
}

pub fn rotation_reading(ts: i64, rate: RotationRate) -> RotationReading {
    RotationReading::new(
        ts,
        rate.alpha.unwrap_or(0.0),
        rate.beta.unwrap_or(0.0),
        rate.gamma.unwrap_or(0.0),
    )
}

/// Session-wide time reference.
///
/// Every reading of a session is stamped through the same `Timebase`, so all
/// timestamps are epoch milliseconds that never run backwards even if the
/// wall clock is adjusted mid-capture.
#[derive(Debug, Clone, Copy)]
pub struct Timebase {
    epoch_ms: i64,
    origin: Instant,
}

impl Timebase {
    pub fn start() -> Self {
        Self::starting_at(Utc::now().timestamp_millis())
    }

    pub fn starting_at(epoch_ms: i64) -> Self {
        Self {
            epoch_ms,
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as i64
    }
}

//! In-memory capture storage and the relative time axis.
//!
//! Timestamps are epoch milliseconds for the whole session, stamped through
//! one [`Timebase`](crate::readings::Timebase); relative time is
//! `(ts - session_start) / 1000` seconds.

use crate::readings::{MotionReading, RotationReading};
use crate::source::SensorEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Append-only motion and rotation sequences of one live session.
///
/// Owned and mutated only by the session control loop. Call
/// [`CaptureBuffer::freeze`] to obtain the read-only [`FrozenCapture`].
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    session_start: i64,
    motion: Vec<MotionReading>,
    rotation: Vec<RotationReading>,
}

impl CaptureBuffer {
    pub fn new(session_start: i64) -> Self {
        Self {
            session_start,
            // ~60 Hz for the reference ten-second window
            motion: Vec::with_capacity(600),
            rotation: Vec::with_capacity(600),
        }
    }

    /// Append one sensor event in arrival order.
    pub fn record(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::Combined(motion, rotation) => {
                self.motion.push(motion);
                self.rotation.push(rotation);
            }
            SensorEvent::Motion(motion) => self.motion.push(motion),
            SensorEvent::Rotation(rotation) => self.rotation.push(rotation),
        }
    }

    pub fn session_start(&self) -> i64 {
        self.session_start
    }

    pub fn len(&self) -> (usize, usize) {
        (self.motion.len(), self.rotation.len())
    }

    pub fn is_empty(&self) -> bool {
        self.motion.is_empty() && self.rotation.is_empty()
    }

    /// Seal the buffer. `finished_at` is the epoch-ms instant capture stopped.
    pub fn freeze(self, finished_at: i64) -> FrozenCapture {
        FrozenCapture {
            inner: Arc::new(FrozenInner {
                buffer: self,
                finished_at,
            }),
        }
    }
}

#[derive(Debug)]
struct FrozenInner {
    buffer: CaptureBuffer,
    finished_at: i64,
}

/// Read-only dataset of a finished session.
///
/// Cheap to clone; the uploader and any presentation layer share it without
/// locking since there is no writer left.
#[derive(Debug, Clone)]
pub struct FrozenCapture {
    inner: Arc<FrozenInner>,
}

impl FrozenCapture {
    pub fn motion(&self) -> &[MotionReading] {
        &self.inner.buffer.motion
    }

    pub fn rotation(&self) -> &[RotationReading] {
        &self.inner.buffer.rotation
    }

    pub fn session_start(&self) -> i64 {
        self.inner.buffer.session_start
    }

    pub fn finished_at(&self) -> i64 {
        self.inner.finished_at
    }

    pub fn is_empty(&self) -> bool {
        self.inner.buffer.is_empty()
    }

    /// Seconds between session start and `ts`.
    pub fn relative_seconds(&self, ts: i64) -> f64 {
        relative_seconds(self.session_start(), ts)
    }

    pub fn motion_times(&self) -> Vec<f64> {
        self.motion().iter().map(|r| self.relative_seconds(r.ts)).collect()
    }

    pub fn rotation_times(&self) -> Vec<f64> {
        self.rotation().iter().map(|r| self.relative_seconds(r.ts)).collect()
    }

    /// Instant shared by both upload payloads: the first motion reading, or
    /// the stop instant when no motion was captured.
    pub fn measured_at(&self) -> DateTime<Utc> {
        let ms = self.motion().first().map(|r| r.ts).unwrap_or(self.finished_at());
        DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }

    /// Rows for a paired accel/gyro chart.
    ///
    /// Rotation reading `i` is paired with motion reading `i` by position, not
    /// by timestamp. This only lines up when both came from the combined
    /// stream at the same cadence; with secondary streams active the pairing
    /// is approximate. Rows follow the motion sequence; missing rotation
    /// entries are `None`.
    pub fn plot_rows(&self) -> Vec<PlotRow> {
        self.motion()
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let g = self.rotation().get(i);
                PlotRow {
                    t: format_seconds(self.relative_seconds(a.ts)),
                    ax: a.x,
                    ay: a.y,
                    az: a.z,
                    gx: g.map(|g| g.alpha),
                    gy: g.map(|g| g.beta),
                    gz: g.map(|g| g.gamma),
                }
            })
            .collect()
    }
}

/// One point of the paired chart handed to the plotting side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotRow {
    /// Relative seconds, one decimal place
    pub t: String,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub gx: Option<f64>,
    pub gy: Option<f64>,
    pub gz: Option<f64>,
}

pub fn relative_seconds(session_start: i64, ts: i64) -> f64 {
    (ts - session_start) as f64 / 1000.0
}

/// Display form of a relative time
pub fn format_seconds(seconds: f64) -> String {
    format!("{:.1}", seconds)
}

//! Per-axis biomarkers over one sensor's reading sequence.
//!
//! Timestamps are converted from epoch milliseconds to seconds before any
//! derivative is taken, so rates are per second.

use crate::readings::{MotionReading, RotationReading, SensorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Axes = [f64; 3];

/// Anything with a timestamp and three axis values
pub trait AxisSample {
    fn ts(&self) -> i64;
    fn axes(&self) -> Axes;
}

impl AxisSample for MotionReading {
    fn ts(&self) -> i64 {
        self.ts
    }

    fn axes(&self) -> Axes {
        [self.x, self.y, self.z]
    }
}

impl AxisSample for RotationReading {
    fn ts(&self) -> i64 {
        self.ts
    }

    fn axes(&self) -> Axes {
        [self.alpha, self.beta, self.gamma]
    }
}

/// Biomarkers for one measurement, each ordered x/y/z or alpha/beta/gamma
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MeasurementMetrics {
    pub stddev: Axes,
    pub range: Axes,
    pub max_rate_of_change: Axes,
    pub max_jerk: Axes,
    pub cadence_hz: Axes,
}

impl MeasurementMetrics {
    pub fn compute<S: AxisSample>(kind: SensorKind, samples: &[S]) -> Self {
        MeasurementMetrics {
            stddev: stddev(samples),
            range: range(samples),
            max_rate_of_change: max_rate_of_change(samples),
            max_jerk: max_jerk(kind, samples),
            cadence_hz: cadence_hz(samples),
        }
    }
}

impl fmt::Display for MeasurementMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |a: &Axes| format!("[{:.3}, {:.3}, {:.3}]", a[0], a[1], a[2]);
        writeln!(f, "  stddev:             {}", show(&self.stddev))?;
        writeln!(f, "  range:              {}", show(&self.range))?;
        writeln!(f, "  max rate of change: {}", show(&self.max_rate_of_change))?;
        writeln!(f, "  max jerk:           {}", show(&self.max_jerk))?;
        write!(f, "  cadence (Hz):       {}", show(&self.cadence_hz))
    }
}

fn seconds(ts: i64) -> f64 {
    ts as f64 / 1000.0
}

/// Population standard deviation per axis
pub fn stddev<S: AxisSample>(samples: &[S]) -> Axes {
    if samples.is_empty() {
        return [0.0; 3];
    }
    let n = samples.len() as f64;

    let mut mean = [0.0; 3];
    for s in samples {
        for (m, v) in mean.iter_mut().zip(s.axes()) {
            *m += v / n;
        }
    }

    let mut variance = [0.0; 3];
    for s in samples {
        for axis in 0..3 {
            let d = s.axes()[axis] - mean[axis];
            variance[axis] += d * d / n;
        }
    }
    variance.map(f64::sqrt)
}

/// max - min per axis
pub fn range<S: AxisSample>(samples: &[S]) -> Axes {
    if samples.is_empty() {
        return [0.0; 3];
    }
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for s in samples {
        for (axis, v) in s.axes().into_iter().enumerate() {
            min[axis] = min[axis].min(v);
            max[axis] = max[axis].max(v);
        }
    }
    [max[0] - min[0], max[1] - min[1], max[2] - min[2]]
}

/// Largest |dv/dt| between consecutive readings, in arrival order.
/// Pairs with a non-positive time step are skipped.
pub fn max_rate_of_change<S: AxisSample>(samples: &[S]) -> Axes {
    let mut max = [0.0f64; 3];
    for pair in samples.windows(2) {
        let dt = seconds(pair[1].ts()) - seconds(pair[0].ts());
        if dt <= 0.0 {
            continue;
        }
        let (v0, v1) = (pair[0].axes(), pair[1].axes());
        for axis in 0..3 {
            max[axis] = max[axis].max(((v1[axis] - v0[axis]) / dt).abs());
        }
    }
    max
}

/// Time-sorted samples with duplicate timestamps collapsed (first kept)
fn sorted_unique<S: AxisSample>(samples: &[S]) -> Vec<(f64, Axes)> {
    let mut sorted: Vec<(i64, Axes)> = samples.iter().map(|s| (s.ts(), s.axes())).collect();
    sorted.sort_by_key(|(ts, _)| *ts);
    sorted.dedup_by_key(|(ts, _)| *ts);
    sorted.into_iter().map(|(ts, axes)| (seconds(ts), axes)).collect()
}

fn derivative(series: &[(f64, Axes)]) -> Vec<(f64, Axes)> {
    series
        .windows(2)
        .map(|w| {
            let dt = w[1].0 - w[0].0;
            let (a, b) = (w[0].1, w[1].1);
            (w[1].0, [(b[0] - a[0]) / dt, (b[1] - a[1]) / dt, (b[2] - a[2]) / dt])
        })
        .collect()
}

/// Maximum absolute jerk per axis.
///
/// Motion: first derivative of acceleration. Rotation: second derivative of
/// angular rate. Fewer than three readings yields zeros.
pub fn max_jerk<S: AxisSample>(kind: SensorKind, samples: &[S]) -> Axes {
    if samples.len() < 3 {
        return [0.0; 3];
    }
    let series = sorted_unique(samples);
    let jerk = match kind {
        SensorKind::Accel => derivative(&series),
        SensorKind::Gyro => derivative(&derivative(&series)),
    };

    let mut max = [0.0f64; 3];
    for (_, values) in jerk {
        for axis in 0..3 {
            max[axis] = max[axis].max(values[axis].abs());
        }
    }
    max
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

/// Zero crossings per second: sign changes (including to and from exactly
/// zero) over the time-sorted sequence divided by its duration.
pub fn cadence_hz<S: AxisSample>(samples: &[S]) -> Axes {
    if samples.len() < 2 {
        return [0.0; 3];
    }
    let series = sorted_unique(samples);
    let duration = match (series.first(), series.last()) {
        (Some(first), Some(last)) => last.0 - first.0,
        _ => 0.0,
    };
    if duration <= 0.0 {
        return [0.0; 3];
    }

    let mut crossings = [0u32; 3];
    for w in series.windows(2) {
        for axis in 0..3 {
            if sign(w[0].1[axis]) != sign(w[1].1[axis]) {
                crossings[axis] += 1;
            }
        }
    }
    crossings.map(|c| c as f64 / duration)
}

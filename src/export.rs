use crate::buffer::{FrozenCapture, PlotRow};
use crate::metrics::MeasurementMetrics;
use crate::readings::{MotionReading, RotationReading, SensorKind};
use crate::upload::UploadReport;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Session summary written alongside the raw sequences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub session_id: String,
    pub session_start: String,
    pub finished_at: String,
    pub duration_secs: f64,
    pub measured_at: String,
    pub motion_count: usize,
    pub rotation_count: usize,
    pub motion_metrics: MeasurementMetrics,
    pub rotation_metrics: MeasurementMetrics,
    /// Absent when the session was not uploaded
    pub upload: Option<UploadReport>,
}

/// Complete capture export (JSON-serializable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureExport {
    pub summary: CaptureSummary,
    pub motion: Vec<MotionReading>,
    pub rotation: Vec<RotationReading>,
    pub plot_rows: Vec<PlotRow>,
}

fn rfc3339(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl CaptureExport {
    pub fn new(capture: &FrozenCapture, upload: Option<&UploadReport>) -> Self {
        let summary = CaptureSummary {
            session_id: format!("capture_{}", capture.session_start()),
            session_start: rfc3339(capture.session_start()),
            finished_at: rfc3339(capture.finished_at()),
            duration_secs: capture.relative_seconds(capture.finished_at()),
            measured_at: capture
                .measured_at()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            motion_count: capture.motion().len(),
            rotation_count: capture.rotation().len(),
            motion_metrics: MeasurementMetrics::compute(SensorKind::Accel, capture.motion()),
            rotation_metrics: MeasurementMetrics::compute(SensorKind::Gyro, capture.rotation()),
            upload: upload.cloned(),
        };

        CaptureExport {
            summary,
            motion: capture.motion().to_vec(),
            rotation: capture.rotation().to_vec(),
            plot_rows: capture.plot_rows(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// `capture_<YYYYmmdd_HHMMSS>.json`, stamped with the session start
    pub fn file_name(&self) -> String {
        let stamp = DateTime::parse_from_rfc3339(&self.summary.session_start)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        format!("capture_{}.json", stamp.format("%Y%m%d_%H%M%S"))
    }

    /// Write into `dir`, creating it if needed. Returns the file path.
    pub fn write_to<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(&dir)?;
        let path = dir.as_ref().join(self.file_name());
        std::fs::write(&path, self.to_json_bytes()?)?;
        Ok(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// Motion Capture Library
// Fixed-duration accelerometer/gyroscope capture, normalization and upload

pub mod buffer;
pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod export;
pub mod logger;
pub mod metrics;
pub mod readings;
pub mod sensors;
pub mod session;
pub mod source;
pub mod upload;

pub use buffer::{CaptureBuffer, FrozenCapture, PlotRow};
pub use config::{AppConfig, ConfigError};
pub use error::{CaptureError, CaptureResult, UploadError};
pub use metrics::MeasurementMetrics;
pub use readings::{MotionReading, RotationReading, SensorKind, Timebase};
pub use session::{CaptureSession, SessionConfig, SessionHandle, SessionReport, SessionState};
pub use source::{Permission, SensorSource};
pub use upload::{Collector, HttpCollector, UploadCoordinator, UploadReport};

use thiserror::Error;

/// Capture pipeline error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Motion permission not granted")]
    PermissionDenied,

    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CaptureError {
    /// Whether the session must be abandoned when this error is raised.
    ///
    /// Only permission denial ends a session; a missing mechanism just
    /// narrows the set of active inputs.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CaptureError::SensorUnavailable(_))
    }
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Failure of a single outbound payload send
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

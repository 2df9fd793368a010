//! Best-effort delivery of a finished capture to the remote collector.

use crate::buffer::FrozenCapture;
use crate::error::UploadError;
use crate::readings::{MotionReading, RotationReading, SensorKind};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{info, warn};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Readings carried by one payload
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum PayloadData<'a> {
    Motion(&'a [MotionReading]),
    Rotation(&'a [RotationReading]),
}

impl PayloadData<'_> {
    pub fn len(&self) -> usize {
        match self {
            PayloadData::Motion(r) => r.len(),
            PayloadData::Rotation(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wire body for `POST /api/measurements`, one per sensor type per session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload<'a> {
    pub user_id: Uuid,
    #[serde(serialize_with = "iso8601_millis")]
    pub measured_at: DateTime<Utc>,
    pub sensor: SensorKind,
    pub data: PayloadData<'a>,
}

fn iso8601_millis<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Terminal result of one payload send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum UploadOutcome {
    Delivered,
    Failed(String),
}

impl UploadOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, UploadOutcome::Delivered)
    }
}

impl From<Result<(), UploadError>> for UploadOutcome {
    fn from(result: Result<(), UploadError>) -> Self {
        match result {
            Ok(()) => UploadOutcome::Delivered,
            Err(e) => UploadOutcome::Failed(e.to_string()),
        }
    }
}

/// Per-sensor outcomes of one delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub accel: UploadOutcome,
    pub gyro: UploadOutcome,
}

impl UploadReport {
    pub fn all_delivered(&self) -> bool {
        self.accel.is_delivered() && self.gyro.is_delivered()
    }

    pub fn failures(&self) -> Vec<(SensorKind, &str)> {
        [(SensorKind::Accel, &self.accel), (SensorKind::Gyro, &self.gyro)]
            .into_iter()
            .filter_map(|(kind, outcome)| match outcome {
                UploadOutcome::Failed(reason) => Some((kind, reason.as_str())),
                UploadOutcome::Delivered => None,
            })
            .collect()
    }
}

impl fmt::Display for UploadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |o: &UploadOutcome| match o {
            UploadOutcome::Delivered => "delivered".to_string(),
            UploadOutcome::Failed(reason) => format!("failed ({})", reason),
        };
        write!(f, "accel: {}, gyro: {}", show(&self.accel), show(&self.gyro))
    }
}

/// Outbound seam to the external collector.
pub trait Collector: Send + Sync {
    fn send<'a>(&'a self, payload: &'a UploadPayload<'a>) -> BoxFuture<'a, Result<(), UploadError>>;
}

/// Collector reached over HTTP with a JSON body
pub struct HttpCollector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCollector {
    /// `base_url` like `http://localhost:4000`, `path` like `/api/measurements`
    pub fn new(base_url: &str, path: &str, timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("motion_capture_rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UploadError::Client(e.to_string()))?;

        Ok(HttpCollector {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), path),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, payload: &UploadPayload<'_>) -> Result<(), UploadError> {
        let body = serde_json::to_vec(payload).map_err(|e| UploadError::Encode(e.to_string()))?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UploadError::Network("request timed out".to_string())
                } else {
                    UploadError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(UploadError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

impl Collector for HttpCollector {
    fn send<'a>(&'a self, payload: &'a UploadPayload<'a>) -> BoxFuture<'a, Result<(), UploadError>> {
        self.post(payload).boxed()
    }
}

/// Turns a finished capture into payloads and sends them.
pub struct UploadCoordinator<C> {
    collector: C,
    user_id: Uuid,
}

impl<C: Collector> UploadCoordinator<C> {
    pub fn new(collector: C, user_id: Uuid) -> Self {
        Self { collector, user_id }
    }

    pub fn collector(&self) -> &C {
        &self.collector
    }

    /// Exactly one payload per sensor type, sharing `measuredAt`.
    pub fn payloads<'a>(&self, capture: &'a FrozenCapture) -> [UploadPayload<'a>; 2] {
        let measured_at = capture.measured_at();
        [
            UploadPayload {
                user_id: self.user_id,
                measured_at,
                sensor: SensorKind::Accel,
                data: PayloadData::Motion(capture.motion()),
            },
            UploadPayload {
                user_id: self.user_id,
                measured_at,
                sensor: SensorKind::Gyro,
                data: PayloadData::Rotation(capture.rotation()),
            },
        ]
    }

    /// Send both payloads concurrently. Each send is attempted regardless of
    /// the other's fate and is never retried.
    pub async fn deliver(&self, capture: &FrozenCapture) -> UploadReport {
        let [accel, gyro] = self.payloads(capture);

        let (accel_result, gyro_result) =
            tokio::join!(self.send_one(&accel), self.send_one(&gyro));

        UploadReport {
            accel: accel_result,
            gyro: gyro_result,
        }
    }

    async fn send_one(&self, payload: &UploadPayload<'_>) -> UploadOutcome {
        let outcome = UploadOutcome::from(self.collector.send(payload).await);
        match &outcome {
            UploadOutcome::Delivered => info!(
                "Uploaded {} payload ({} readings)",
                payload.sensor,
                payload.data.len()
            ),
            UploadOutcome::Failed(reason) => {
                warn!("Upload of {} payload failed: {}", payload.sensor, reason)
            }
        }
        outcome
    }
}

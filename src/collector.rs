//! Reference measurement collector.
//!
//! In-memory stand-in for the remote service the uploader talks to:
//! - `POST /api/measurements` stores one payload and computes its metrics
//! - `GET /api/measurements` lists the most recent rows, newest first
//! - `GET /api/measurements/metrics` lists only their metrics

use crate::config::CollectorSettings;
use crate::metrics::MeasurementMetrics;
use crate::readings::{MotionReading, RotationReading, SensorKind};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};
use uuid::Uuid;

/// Inbound body; accepts the uploader's `sensor` and the legacy
/// `sensor_type` / `sensorType` spellings.
#[derive(Debug, Deserialize)]
pub struct MeasurementIn {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "measuredAt")]
    pub measured_at: DateTime<Utc>,
    #[serde(alias = "sensor_type", alias = "sensorType")]
    pub sensor: SensorKind,
    pub data: serde_json::Value,
}

/// Readings of one stored row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredData {
    Motion(Vec<MotionReading>),
    Rotation(Vec<RotationReading>),
}

impl StoredData {
    pub fn len(&self) -> usize {
        match self {
            StoredData::Motion(r) => r.len(),
            StoredData::Rotation(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub id: u64,
    pub user_id: Uuid,
    pub measured_at: DateTime<Utc>,
    pub sensor_type: SensorKind,
    pub data: StoredData,
    pub metrics: MeasurementMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub id: u64,
    pub sensor_type: SensorKind,
    pub metrics: MeasurementMetrics,
}

impl MeasurementIn {
    /// Check the user id and decode `data` for the declared sensor type.
    pub fn into_record(self, id: u64) -> Result<MeasurementRecord, CollectorError> {
        let user_id = Uuid::parse_str(&self.user_id)
            .map_err(|e| CollectorError::Unprocessable(format!("userId is not a UUID: {}", e)))?;

        let sensor = self.sensor;
        let bad_data = |e: serde_json::Error| {
            CollectorError::Unprocessable(format!("data is not a list of {} readings: {}", sensor, e))
        };
        let (data, metrics) = match sensor {
            SensorKind::Accel => {
                let readings: Vec<MotionReading> = serde_json::from_value(self.data).map_err(bad_data)?;
                let metrics = MeasurementMetrics::compute(SensorKind::Accel, &readings);
                (StoredData::Motion(readings), metrics)
            }
            SensorKind::Gyro => {
                let readings: Vec<RotationReading> = serde_json::from_value(self.data).map_err(bad_data)?;
                let metrics = MeasurementMetrics::compute(SensorKind::Gyro, &readings);
                (StoredData::Rotation(readings), metrics)
            }
        };

        Ok(MeasurementRecord {
            id,
            user_id,
            measured_at: self.measured_at,
            sensor_type: sensor,
            data,
            metrics,
        })
    }
}

#[derive(Debug)]
struct MeasurementStore {
    rows: Vec<MeasurementRecord>,
    next_id: u64,
}

/// Shared collector state
#[derive(Clone)]
pub struct CollectorState {
    store: Arc<RwLock<MeasurementStore>>,
    recent_limit: usize,
}

impl CollectorState {
    pub fn new(recent_limit: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(MeasurementStore {
                rows: Vec::new(),
                next_id: 1,
            })),
            recent_limit,
        }
    }

    pub async fn insert(&self, measurement: MeasurementIn) -> Result<MeasurementRecord, CollectorError> {
        let mut store = self.store.write().await;
        let record = measurement.into_record(store.next_id)?;
        store.next_id += 1;
        store.rows.push(record.clone());
        Ok(record)
    }

    /// Newest first, at most `recent_limit` rows.
    pub async fn recent(&self) -> Vec<MeasurementRecord> {
        let store = self.store.read().await;
        store.rows.iter().rev().take(self.recent_limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("{0}")]
    Unprocessable(String),
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("Collector server error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for CollectorError {
    fn into_response(self) -> Response {
        let status = match self {
            CollectorError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn router(state: CollectorState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/api/measurements", get(list_measurements).post(post_measurement))
        .route("/api/measurements/metrics", get(list_metrics))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

/// Serve on an already-bound listener until the task is dropped.
pub async fn serve_on(listener: TcpListener, app: Router) -> Result<(), CollectorError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Collector listening on http://{}", addr);
    }
    axum::serve(listener, app).await?;
    Ok(())
}

/// Bind `settings.bind` and serve a fresh in-memory store.
pub async fn serve(settings: &CollectorSettings) -> Result<(), CollectorError> {
    let addr: SocketAddr = settings.bind.parse().map_err(|e| CollectorError::Bind {
        addr: settings.bind.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
    })?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| CollectorError::Bind {
            addr: settings.bind.clone(),
            source,
        })?;

    let app = router(CollectorState::new(settings.recent_limit), &settings.allowed_origins);
    serve_on(listener, app).await
}

/// POST /api/measurements
async fn post_measurement(
    State(state): State<CollectorState>,
    Json(measurement): Json<MeasurementIn>,
) -> Result<(StatusCode, Json<serde_json::Value>), CollectorError> {
    let record = state.insert(measurement).await.map_err(|e| {
        warn!("Rejected measurement: {}", e);
        e
    })?;
    info!(
        "Stored measurement #{} ({}, {} readings)",
        record.id,
        record.sensor_type,
        record.data.len()
    );
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "success": true }))))
}

/// GET /api/measurements
async fn list_measurements(State(state): State<CollectorState>) -> Json<Vec<MeasurementRecord>> {
    Json(state.recent().await)
}

/// GET /api/measurements/metrics
async fn list_metrics(State(state): State<CollectorState>) -> Json<Vec<MetricsRow>> {
    let rows = state
        .recent()
        .await
        .into_iter()
        .map(|r| MetricsRow {
            id: r.id,
            sensor_type: r.sensor_type,
            metrics: r.metrics,
        })
        .collect();
    Json(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    const USER: &str = "123e4567-e89b-12d3-a456-426614174000";

    fn app(state: &CollectorState) -> Router {
        router(state.clone(), &[])
    }

    fn post(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/measurements")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn accel_body(x: f64) -> serde_json::Value {
        json!({
            "userId": USER,
            "measuredAt": "2023-11-14T22:13:20.020Z",
            "sensor": "accel",
            "data": [
                { "ts": 1_700_000_000_020_i64, "x": x, "y": 0.0, "z": 9.8 },
                { "ts": 1_700_000_000_520_i64, "x": -x, "y": 0.0, "z": 9.8 }
            ]
        })
    }

    #[tokio::test]
    async fn test_post_stores_row_with_metrics() {
        let state = CollectorState::new(8);
        let response = app(&state).oneshot(post(accel_body(1.0))).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await, json!({ "success": true }));

        let rows = state.recent().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].data.len(), 2);
        assert_eq!(rows[0].metrics.range[0], 2.0);
    }

    #[tokio::test]
    async fn test_legacy_sensor_type_field() {
        let state = CollectorState::new(8);
        let body = json!({
            "userId": USER,
            "measuredAt": "2023-11-14T22:13:20Z",
            "sensor_type": "gyro",
            "data": [{ "ts": 1, "alpha": 1.0, "beta": 2.0, "gamma": 3.0 }]
        });

        let response = app(&state).oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(state.recent().await[0].sensor_type, SensorKind::Gyro);
    }

    #[tokio::test]
    async fn test_rejects_bad_user_id_and_mismatched_data() {
        let state = CollectorState::new(8);

        let mut body = accel_body(1.0);
        body["userId"] = json!("user-42");
        let response = app(&state).oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_json(response).await["detail"]
            .as_str()
            .unwrap()
            .contains("UUID"));

        // Rotation readings posted as accel
        let mut body = accel_body(1.0);
        body["data"] = json!([{ "ts": 1, "alpha": 1.0, "beta": 2.0, "gamma": 3.0 }]);
        let response = app(&state).oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        assert!(state.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_data_is_accepted() {
        let state = CollectorState::new(8);
        let mut body = accel_body(1.0);
        body["data"] = json!([]);

        let response = app(&state).oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(state.recent().await[0].metrics, MeasurementMetrics::default());
    }

    #[tokio::test]
    async fn test_list_is_recent_first_and_limited() {
        let state = CollectorState::new(8);
        let response = app(&state).oneshot(get_req("/api/measurements")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));

        for i in 0..10 {
            let response = app(&state).oneshot(post(accel_body(i as f64))).await.unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app(&state).oneshot(get_req("/api/measurements")).await.unwrap();
        let rows = body_json(response).await;
        let ids: Vec<u64> = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![10, 9, 8, 7, 6, 5, 4, 3]);
        assert_eq!(rows[0]["sensor_type"], "accel");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = CollectorState::new(8);
        app(&state).oneshot(post(accel_body(3.0))).await.unwrap();

        let response = app(&state)
            .oneshot(get_req("/api/measurements/metrics"))
            .await
            .unwrap();
        let rows = body_json(response).await;

        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[0]["sensor_type"], "accel");
        assert_eq!(rows[0]["metrics"]["range"][0], 6.0);
        assert!(rows[0].get("data").is_none());
    }

    #[test]
    fn test_cors_layer_accepts_configured_origins() {
        // Falls back to permissive on garbage; must not panic either way
        let _ = cors_layer(&["http://localhost:3000".to_string()]);
        let _ = cors_layer(&["bad\norigin".to_string()]);
    }
}

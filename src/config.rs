//! Application configuration.
//!
//! Loaded from TOML, every section falls back to the reference defaults, and
//! command-line flags are applied on top by the binaries.

use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionSettings,
    pub sensors: SensorSettings,
    pub upload: UploadSettings,
    pub collector: CollectorSettings,
}

/// Capture window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub duration_ticks: u32,
    pub tick_interval_ms: u64,
    pub event_channel_capacity: usize,
}

/// Which sensor mechanisms to start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Combined device-motion stream
    pub combined: bool,
    pub motion_only: bool,
    pub rotation_only: bool,
    /// Read real sensors through `termux-sensor`
    pub termux: bool,
    pub sample_interval_ms: u64,
    pub permission_granted: bool,
}

/// Remote collector endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub collector_base_url: String,
    pub endpoint: String,
    pub user_id: String,
    pub request_timeout_secs: u64,
}

/// Reference collector service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub bind: String,
    pub allowed_origins: Vec<String>,
    pub recent_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            duration_ticks: 10,
            tick_interval_ms: 1000,
            event_channel_capacity: 500,
        }
    }
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            combined: true,
            motion_only: false,
            rotation_only: false,
            termux: false,
            sample_interval_ms: 16,
            permission_granted: true,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            collector_base_url: "http://localhost:4000".to_string(),
            endpoint: "/api/measurements".to_string(),
            user_id: "123e4567-e89b-12d3-a456-426614174000".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:4000".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            recent_limit: 8,
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.duration_ticks == 0 {
            return Err(ConfigError::Validation("Session duration must be at least one tick".to_string()));
        }
        if self.session.tick_interval_ms == 0 {
            return Err(ConfigError::Validation("Tick interval must be positive".to_string()));
        }
        if self.session.event_channel_capacity == 0 {
            return Err(ConfigError::Validation("Event channel capacity must be positive".to_string()));
        }
        if self.sensors.sample_interval_ms == 0 {
            return Err(ConfigError::Validation("Sample interval must be positive".to_string()));
        }

        let url = &self.upload.collector_base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "Collector URL must start with http:// or https://, got '{}'",
                url
            )));
        }
        self.user_id()?;

        if self.collector.recent_limit == 0 {
            return Err(ConfigError::Validation("Collector recent limit must be positive".to_string()));
        }
        Ok(())
    }

    pub fn user_id(&self) -> Result<Uuid, ConfigError> {
        Uuid::parse_str(&self.upload.user_id)
            .map_err(|e| ConfigError::Validation(format!("Invalid user id '{}': {}", self.upload.user_id, e)))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            duration_ticks: self.session.duration_ticks,
            tick_interval: Duration::from_millis(self.session.tick_interval_ms),
            event_channel_capacity: self.session.event_channel_capacity,
        }
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sensors.sample_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.request_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::RidewatchError;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_DIR_NAME: &str = "ridewatch";

pub const BACKEND_URL_ENV: &str = "SUPABASE_URL";
pub const BACKEND_KEY_ENV: &str = "SUPABASE_ANON_KEY";

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_STOP_REDIRECT_DELAY_MS: u64 = 2000;

/// Names of the backend tables the dashboard reads and writes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TableNames {
    pub uploads: String,
    pub telemetry: String,
    pub potholes: String,
    pub ride_events: String,
    pub commands: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            uploads: "sensor_uploads".to_string(),
            telemetry: "sensor_data".to_string(),
            potholes: "pothole_detections".to_string(),
            ride_events: "ride_events".to_string(),
            commands: "device_commands".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct WindowPosition {
    pub x: f32,
    pub y: f32,
}

impl From<WindowPosition> for egui::Pos2 {
    fn from(value: WindowPosition) -> Self {
        egui::Pos2::new(value.x, value.y)
    }
}

impl From<egui::Pos2> for WindowPosition {
    fn from(value: egui::Pos2) -> Self {
        Self {
            x: value.x,
            y: value.y,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub backend_url: Option<String>,
    pub backend_key: Option<String>,
    /// Change feed polling period for backends that cannot push
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    /// Time the device gets to react to a stop before the view closes
    pub stop_redirect_delay_ms: u64,
    /// When set, snapshots only hold this many rows and a sort change refetches
    pub snapshot_limit: Option<usize>,
    pub tables: TableNames,
    pub window_position: WindowPosition,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            backend_key: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            stop_redirect_delay_ms: DEFAULT_STOP_REDIRECT_DELAY_MS,
            snapshot_limit: None,
            tables: TableNames::default(),
            window_position: WindowPosition::default(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf, RidewatchError> {
        Ok(dirs::config_dir()
            .ok_or(RidewatchError::NoConfigDir)?
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    }

    /// Loads the config from the user's config directory, falling back to
    /// defaults when there is no file yet.
    pub fn load() -> Result<Self, RidewatchError> {
        let path = Self::default_path()?;
        Ok(Self::from_file(&path)?.unwrap_or_default())
    }

    /// Copy of the stored config with the environment and then `url`/`key`
    /// applied on top. Only the stored config is ever saved, so credentials
    /// from the environment stay out of the file.
    pub fn effective(&self, url: Option<String>, key: Option<String>) -> Self {
        let mut config = self.clone();
        config.apply_env();
        config.apply_overrides(url, key);
        config
    }

    pub fn from_file(path: &Path) -> Result<Option<Self>, RidewatchError> {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(None);
        }
        let file =
            std::fs::File::open(path).map_err(|e| RidewatchError::ConfigIOError { source: e })?;
        serde_json::from_reader(file)
            .map(Some)
            .map_err(|e| RidewatchError::ConfigSerializeError { source: e })
    }

    pub fn save(&self) -> Result<(), RidewatchError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), RidewatchError> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| RidewatchError::ConfigIOError { source: e })?;
        }

        let file =
            std::fs::File::create(path).map_err(|e| RidewatchError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| RidewatchError::ConfigSerializeError { source: e })
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(BACKEND_URL_ENV).ok(),
            std::env::var(BACKEND_KEY_ENV).ok(),
        );
    }

    pub fn apply_overrides(&mut self, url: Option<String>, key: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.backend_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.backend_key = Some(key);
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stop_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.stop_redirect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_none() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = AppConfig::from_file(&temp_dir.path().join("config.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        let config = AppConfig {
            backend_url: Some("https://example.supabase.co".to_string()),
            snapshot_limit: Some(50),
            stop_redirect_delay_ms: 500,
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = AppConfig::from_file(&path).unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"poll_interval_ms": 250, "tables": {"potholes": "bumps"}}"#)
            .unwrap();

        let loaded = AppConfig::from_file(&path).unwrap().unwrap();
        assert_eq!(loaded.poll_interval_ms, 250);
        assert_eq!(loaded.tables.potholes, "bumps");
        assert_eq!(loaded.tables.ride_events, "ride_events");
        assert_eq!(
            loaded.stop_redirect_delay_ms,
            DEFAULT_STOP_REDIRECT_DELAY_MS
        );
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            AppConfig::from_file(&path),
            Err(RidewatchError::ConfigSerializeError { .. })
        ));
    }

    #[test]
    fn test_effective_leaves_stored_config_alone() {
        let stored = AppConfig::default();
        let effective = stored.effective(Some("https://cli.example".to_string()), None);
        assert_eq!(effective.backend_url.as_deref(), Some("https://cli.example"));
        assert_eq!(stored.backend_url, None);
    }

    #[test]
    fn test_overrides_trim_trailing_slash() {
        let mut config = AppConfig::default();
        config.apply_overrides(
            Some("https://example.supabase.co/".to_string()),
            Some("anon".to_string()),
        );
        assert_eq!(
            config.backend_url.as_deref(),
            Some("https://example.supabase.co")
        );
        assert_eq!(config.backend_key.as_deref(), Some("anon"));

        config.apply_overrides(Some("  ".to_string()), None);
        assert_eq!(
            config.backend_url.as_deref(),
            Some("https://example.supabase.co")
        );
    }
}

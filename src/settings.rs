use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

const DEFAULT_HOME: &str = ".photo-courier";
const DEFAULT_CYCLE_DELAY_MS: u64 = 5_000;
const DEBUG_CYCLE_DELAY_MS: u64 = 1_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PRESENCE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_UPLOAD_ENDPOINT: &str = "/api/files/upload";

/// Daemon configuration. Every field is optional in the JSON file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub data_dir: Option<PathBuf>,
    pub pictures_dir: Option<PathBuf>,
    pub database_file: Option<PathBuf>,
    pub preferences_file: Option<PathBuf>,
    pub cycle_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub presence_timeout_secs: u64,
    pub upload_endpoint: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: None,
            pictures_dir: None,
            database_file: None,
            preferences_file: None,
            cycle_delay_ms: DEFAULT_CYCLE_DELAY_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            presence_timeout_secs: DEFAULT_PRESENCE_TIMEOUT_SECS,
            upload_endpoint: DEFAULT_UPLOAD_ENDPOINT.into(),
        }
    }
}

impl Settings {
    /// Resolves the configuration from `PHOTO_COURIER_HOME`,
    /// `PHOTO_COURIER_CONFIG` and `PHOTO_COURIER_DEBUG`.
    pub fn from_env() -> Result<Self> {
        let home = std::env::var_os("PHOTO_COURIER_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME));
        let config_path = std::env::var_os("PHOTO_COURIER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("config.json"));

        let mut settings = Self::load(&config_path)?;
        if settings.data_dir.is_none() {
            settings.data_dir = Some(home);
        }

        let debug_mode = std::env::var("PHOTO_COURIER_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            settings.cycle_delay_ms = DEBUG_CYCLE_DELAY_MS;
        }

        Ok(settings)
    }

    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME))
    }

    pub fn pictures_dir(&self) -> PathBuf {
        self.pictures_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("Pictures"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_file
            .clone()
            .unwrap_or_else(|| self.data_dir().join("courier.sqlite3"))
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.preferences_file
            .clone()
            .unwrap_or_else(|| self.data_dir().join("preferences.json"))
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_secs)
    }
}

//! AppConfig - operator-tunable timing and storage values
//!
//! Each struct implements `Default` with the values in [`super::defaults`],
//! so a missing file or a missing key changes nothing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `AppConfig::load()` which searches:
/// 1. `$SCOREAPP_CONFIG` env var
/// 2. `./scoreapp.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Barrier link keep-alive
    #[serde(default)]
    pub barrier: BarrierConfig,

    /// Viewer link keep-alive and queueing
    #[serde(default)]
    pub viewer: ViewerConfig,

    /// Race defaults and crossing classification
    #[serde(default)]
    pub races: RacesConfig,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
    #[error("config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

impl AppConfig {
    /// Load configuration using the standard search order
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("SCOREAPP_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from SCOREAPP_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from SCOREAPP_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "SCOREAPP_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("scoreapp.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./scoreapp.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./scoreapp.toml, using defaults");
                }
            }
        }

        info!("No scoreapp.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate TOML text. Unknown keys are reported as warnings only.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = contents.parse::<toml::Value>() {
            for key in unknown_keys(&raw) {
                warn!(key = %key, "Unknown config key ignored");
            }
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break keep-alive or queueing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.barrier.ping_period_ms == 0 {
            errors.push("barrier.ping_period_ms must be greater than 0".to_string());
        }
        if self.barrier.pong_wait_ms <= self.barrier.ping_period_ms {
            errors.push(format!(
                "barrier.pong_wait_ms ({}) must be greater than barrier.ping_period_ms ({})",
                self.barrier.pong_wait_ms, self.barrier.ping_period_ms
            ));
        }
        if self.barrier.write_wait_ms == 0 {
            errors.push("barrier.write_wait_ms must be greater than 0".to_string());
        }
        if self.barrier.max_message_size == 0 {
            errors.push("barrier.max_message_size must be greater than 0".to_string());
        }
        if self.viewer.queue_capacity == 0 {
            errors.push("viewer.queue_capacity must be greater than 0".to_string());
        }
        if self.viewer.ping_period_ms == 0 {
            errors.push("viewer.ping_period_ms must be greater than 0".to_string());
        }
        if self.viewer.write_wait_ms == 0 {
            errors.push("viewer.write_wait_ms must be greater than 0".to_string());
        }
        if self.races.default_laps == 0 {
            errors.push("races.default_laps must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Dotted paths in `raw` that no config struct knows about
fn unknown_keys(raw: &toml::Value) -> Vec<String> {
    const KNOWN: &[(&str, &[&str])] = &[
        ("server", &["addr"]),
        ("storage", &["path"]),
        (
            "barrier",
            &["ping_period_ms", "pong_wait_ms", "write_wait_ms", "max_message_size"],
        ),
        ("viewer", &["queue_capacity", "ping_period_ms", "write_wait_ms"]),
        (
            "races",
            &["debounce_ms", "default_time_duration_ms", "default_laps"],
        ),
    ];

    let mut unknown = Vec::new();
    let Some(table) = raw.as_table() else {
        return unknown;
    };
    for (section, value) in table {
        match KNOWN.iter().find(|(name, _)| name == section) {
            None => unknown.push(section.clone()),
            Some((_, fields)) => {
                if let Some(inner) = value.as_table() {
                    for key in inner.keys() {
                        if !fields.contains(&key.as_str()) {
                            unknown.push(format!("{section}.{key}"));
                        }
                    }
                }
            }
        }
    }
    unknown
}

// ============================================================================
// Sections
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Can be overridden by `SCOREAPP_SERVER_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

/// Record store location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(defaults::STORAGE_PATH)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BarrierConfig {
    pub ping_period_ms: u64,
    /// Read deadline, extended on every pong
    pub pong_wait_ms: u64,
    pub write_wait_ms: u64,
    pub max_message_size: usize,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            ping_period_ms: defaults::BARRIER_PING_PERIOD_MS,
            pong_wait_ms: defaults::BARRIER_PONG_WAIT_MS,
            write_wait_ms: defaults::WRITE_WAIT_MS,
            max_message_size: defaults::BARRIER_MAX_MESSAGE_SIZE,
        }
    }
}

impl BarrierConfig {
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ViewerConfig {
    pub queue_capacity: usize,
    pub ping_period_ms: u64,
    pub write_wait_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::VIEWER_QUEUE_CAPACITY,
            ping_period_ms: defaults::VIEWER_PING_PERIOD_MS,
            write_wait_ms: defaults::WRITE_WAIT_MS,
        }
    }
}

impl ViewerConfig {
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RacesConfig {
    pub debounce_ms: u64,
    pub default_time_duration_ms: u64,
    pub default_laps: u32,
}

impl Default for RacesConfig {
    fn default() -> Self {
        Self {
            debounce_ms: defaults::DEBOUNCE_WINDOW_MS,
            default_time_duration_ms: defaults::DEFAULT_TIME_DURATION_MS,
            default_laps: defaults::DEFAULT_LAPS,
        }
    }
}

impl RacesConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `ingest.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ListenerConfig: where devices connect, session limits.
//!     - StoreConfig: sqlite file, in-memory sqlite, or no persistence.
//!     - StatisticsConfig: history window for the minute view.
//!     - ApiConfig: the read api web server.
//!     - LoggingConfig: log level and per-reading output.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestConfig {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ListenerConfig {
    /// ip to bind, or "auto" for the outward-facing interface
    pub host: String,
    pub port: u16,
    /// sessions beyond this are rejected at accept (unbounded when absent)
    pub max_sessions: Option<usize>,
    /// silent sessions are closed after this long (never when absent)
    pub idle_timeout_seconds: Option<u64>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "auto".to_string(),
            port: 5500,
            max_sessions: None,
            idle_timeout_seconds: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
    None,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("data").join("readings.db"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StatisticsConfig {
    pub history_minutes: usize,
    pub lookback_buffer_minutes: i64,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self { history_minutes: 60, lookback_buffer_minutes: 10 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: true, bind: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl IngestConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: IngestConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before the log subscriber exists, so outcomes go to stdout.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let paths = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => vec![
                PathBuf::from("config").join("ingest.toml"),
                PathBuf::from("..").join("config").join("ingest.toml"),
            ],
        };

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let limit = self
            .listener
            .max_sessions
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unbounded".to_string());
        let idle = self
            .listener
            .idle_timeout_seconds
            .map(|s| format!("{}s", s))
            .unwrap_or_else(|| "never".to_string());

        println!("┌─────────────────────────────────────────┐");
        println!("│          INGEST CONFIGURATION           │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Listener: {}:{}", self.listener.host, self.listener.port);
        println!("│ Max Sessions: {}", limit);
        println!("│ Idle Timeout: {}", idle);
        println!("│ Store: {:?} ({})", self.store.backend, self.store.path.display());
        println!("│ History: {} min", self.statistics.history_minutes);
        println!("│ API: {} (enabled: {})", self.api.bind, self.api.enabled);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `bridge.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - SerialConfig: which UART the mesh root is on and how to read it.
//!     - ServerConfig: where viewers connect, allowed dashboard origins.
//!     - HubSettings: per-viewer queue depth and rssi history length.
//!     - RoutesConfig: quiet period that ends a topology refresh.
//!     - ReconnectConfig: backoff bounds for a lost serial link.
//!     - LoggingConfig: log level and raw line echo.
//!
//! defaults:
//!     every section and field is optional; missing ones take defaults.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::hub::HubConfig;
use crate::link::Backoff;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub server: ServerConfig,
    pub hub: HubSettings,
    pub routes: RoutesConfig,
    pub reconnect: ReconnectConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// empty = any origin
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HubSettings {
    pub viewer_queue_capacity: usize,
    pub history_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RoutesConfig {
    pub quiet_period_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_serial_data: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 100,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            viewer_queue_capacity: 256,
            history_capacity: 60,
        }
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 1500,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_serial_data: true,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: BridgeConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    ///
    /// an explicit path must load; the well-known locations are best effort.
    pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            let config = Self::load(path)?;
            println!("[CONFIG] Loaded from {}", path.display());
            return Ok(config);
        }

        let paths = [
            PathBuf::from("config").join("bridge.toml"),
            PathBuf::from("..").join("config").join("bridge.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Ok(Self::default())
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            viewer_queue_capacity: self.hub.viewer_queue_capacity,
            history_capacity: self.hub.history_capacity,
            quiet_period: Duration::from_millis(self.routes.quiet_period_ms),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect.initial_backoff_ms),
            Duration::from_millis(self.reconnect.max_backoff_ms),
        )
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.read_timeout_ms)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│          BRIDGE CONFIGURATION           │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Serial: {} @ {}", self.serial.port, self.serial.baud_rate);
        println!("│ Listen: {}", self.listen_addr());
        println!("│ Viewer Queue: {} messages", self.hub.viewer_queue_capacity);
        println!("│ RSSI History: {} samples", self.hub.history_capacity);
        println!("│ Route Quiet Period: {}ms", self.routes.quiet_period_ms);
        println!(
            "│ Reconnect Backoff: {}ms..{}ms",
            self.reconnect.initial_backoff_ms, self.reconnect.max_backoff_ms
        );
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[serial]
port = "/dev/ttyUSB1"

[routes]
quiet_period_ms = 250
"#
        )
        .unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB1");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.routes.quiet_period_ms, 250);
        assert_eq!(config.hub.history_capacity, 60);
        assert_eq!(config.hub_config().quiet_period, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = \"not a number\"").unwrap();
        assert!(BridgeConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let missing = Path::new("/definitely/not/here/bridge.toml");
        assert!(BridgeConfig::load_or_default(Some(missing)).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.show_serial_data);
    }
}

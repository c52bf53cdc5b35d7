//! Configuration for vmview
//!
//! Loads configuration from TOML file at `~/.config/vmview/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use vmview_frame::Capabilities;

/// Environment variable overriding `connection.bus_address`
pub const BUS_ADDRESS_ENV: &str = "VMVIEW_DBUS_ADDRESS";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub capabilities: CapabilitiesConfig,
    pub sink: SinkConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            // Auto-generate default config file
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .context("Failed to read config file")?;

        let config = Self::parse(&content)?;

        info!("Configuration loaded from {:?}", config_path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("vmview");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string)
            .context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// Where the VM's display export lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// D-Bus address of the bus QEMU exports on; session bus when unset
    pub bus_address: Option<String>,
    /// Index into the VM's console list
    pub console: u32,
    /// Upper bound for the listener registration handshake
    pub registration_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bus_address: None,
            console: 0,
            registration_timeout_ms: 5000,
        }
    }
}

impl ConnectionConfig {
    /// Bus address to use, with the environment taking precedence.
    pub fn resolve_bus_address(&self, env_value: Option<String>) -> Option<String> {
        env_value
            .filter(|value| !value.is_empty())
            .or_else(|| self.bus_address.clone())
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }
}

/// Optional listener extensions to advertise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesConfig {
    /// Accept shared-memory scanouts (`ScanoutMap`)
    pub shared_memory_map: bool,
    /// Accept multi-plane dmabuf scanouts (`ScanoutDMABUF2`)
    pub multi_plane: bool,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            shared_memory_map: true,
            multi_plane: true,
        }
    }
}

impl CapabilitiesConfig {
    pub fn to_capabilities(&self) -> Capabilities {
        Capabilities::from_flags(self.shared_memory_map, self.multi_plane)
    }
}

/// Frame sink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// How often the frame rate is reported
    pub stats_interval_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            stats_interval_ms: 1000,
        }
    }
}

impl SinkConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_roundtrip() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed = Config::parse(&text).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let parsed = Config::parse(
            r#"
            [connection]
            console = 2

            [capabilities]
            multi_plane = false
            "#,
        )
        .unwrap();

        assert_eq!(parsed.connection.console, 2);
        assert_eq!(parsed.connection.registration_timeout(), Duration::from_secs(5));
        assert_eq!(
            parsed.capabilities.to_capabilities(),
            Capabilities::SHARED_MEMORY_MAP
        );
        assert_eq!(parsed.sink, SinkConfig::default());
    }

    #[test]
    fn test_env_overrides_bus_address() {
        let conn = ConnectionConfig {
            bus_address: Some("unix:path=/run/qemu/dbus.sock".into()),
            ..Default::default()
        };

        assert_eq!(
            conn.resolve_bus_address(Some("unix:path=/tmp/other".into())),
            Some("unix:path=/tmp/other".into())
        );
        assert_eq!(
            conn.resolve_bus_address(Some(String::new())),
            Some("unix:path=/run/qemu/dbus.sock".into())
        );
        assert_eq!(ConnectionConfig::default().resolve_bus_address(None), None);
    }
}

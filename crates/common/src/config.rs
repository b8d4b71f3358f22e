// Configuration structures for SSH Connector

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{TunnelSpec, REMOTE_PORT_MIN};

/// Fixed SSH endpoint
pub const SSH_HOST: &str = "we3d.com.cn";
pub const SSH_PORT: u16 = 22;
pub const SSH_USER: &str = "tunneluser";

/// File name of the private key searched for in each key location
pub const KEY_FILE_NAME: &str = "tunnel_key";

/// Upper bound for TCP connect + SSH handshake
pub const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Name of the JSON configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

const APP_DIR_NAME: &str = "ssh-connector";

/// Get the platform configuration directory for the connector
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| Error::InvalidPath("Could not determine config directory".to_string()))?;
    Ok(base.join(APP_DIR_NAME))
}

/// Port forwarding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Local service port (on 127.0.0.1)
    #[serde(default = "default_local_port")]
    pub local_port: u32,
    /// Port the endpoint listens on
    #[serde(default = "default_remote_port")]
    pub remote_port: u32,
    /// Start the tunnel automatically after connecting
    #[serde(default)]
    pub enabled: bool,
}

/// Application configuration
///
/// The reconnect fields are read by the connection monitor only; the
/// connection manager and the relay never look at them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub tunnel: TunnelConfig,
    /// Enable automatic reconnection on failure
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    /// Initial delay between reconnection attempts in seconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: f64,
    /// Upper bound for the backoff delay in seconds
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay: f64,
}

// Default value functions
fn default_local_port() -> u32 {
    80
}

fn default_remote_port() -> u32 {
    REMOTE_PORT_MIN as u32
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay() -> f64 {
    5.0
}

fn default_max_reconnect_delay() -> f64 {
    300.0
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            local_port: default_local_port(),
            remote_port: default_remote_port(),
            enabled: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tunnel: TunnelConfig::default(),
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay: default_reconnect_delay(),
            max_reconnect_delay: default_max_reconnect_delay(),
        }
    }
}

impl TunnelConfig {
    /// Validate the ports and produce the `TunnelSpec` used by the relay
    pub fn to_spec(&self) -> Result<TunnelSpec> {
        TunnelSpec::new(self.local_port, self.remote_port, self.enabled)
    }
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.tunnel.to_spec()?;

        if !self.reconnect_delay.is_finite() || self.reconnect_delay <= 0.0 {
            return Err(Error::Config(format!(
                "reconnect_delay must be a positive number of seconds, got {}",
                self.reconnect_delay
            )));
        }
        if !self.max_reconnect_delay.is_finite() || self.max_reconnect_delay < self.reconnect_delay {
            return Err(Error::Config(format!(
                "max_reconnect_delay ({}) must not be smaller than reconnect_delay ({})",
                self.max_reconnect_delay, self.reconnect_delay
            )));
        }

        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_delay)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_reconnect_delay)
    }

    /// Path of the configuration file inside `dir`
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE_NAME)
    }

    /// Load configuration from a file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;

        debug!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Load configuration, writing the defaults first if the file is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No configuration found, using defaults");
            info!("Configuration will be saved to: {}", path.display());
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        Self::load_from(path)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;

        info!("Saved configuration to: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.tunnel.local_port, 80);
        assert_eq!(config.tunnel.remote_port, 12000);
        assert!(!config.tunnel.enabled);
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.max_reconnect_delay(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "tunnel": { "local_port": 3000, "enabled": true } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tunnel.local_port, 3000);
        assert_eq!(config.tunnel.remote_port, 12000);
        assert!(config.tunnel.enabled);
        assert_eq!(config.reconnect_delay, 5.0);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = AppConfig::path_in(&temp_dir.path().join("nested"));

        let config = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = AppConfig::path_in(temp_dir.path());

        let mut config = AppConfig::default();
        config.tunnel.local_port = 8080;
        config.tunnel.remote_port = 12345;
        config.tunnel.enabled = true;
        config.reconnect_delay = 2.5;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        let spec = loaded.tunnel.to_spec().unwrap();
        assert_eq!(spec.local_port(), 8080);
        assert_eq!(spec.remote_port(), 12345);
    }

    #[test]
    fn test_load_rejects_out_of_range_remote_port() {
        let temp_dir = TempDir::new().unwrap();
        let path = AppConfig::path_in(temp_dir.path());
        fs::write(&path, r#"{ "tunnel": { "remote_port": 22 } }"#).unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidRemotePort { port: 22, .. }));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = AppConfig::path_in(temp_dir.path());
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            AppConfig::load_from(&path),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_validate_reconnect_delays() {
        let config = AppConfig {
            reconnect_delay: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            reconnect_delay: 10.0,
            max_reconnect_delay: 5.0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_reconnect_delay"));
    }
}

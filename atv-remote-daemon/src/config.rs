//! Daemon Configuration
//!
//! Configuration management for the Android TV remote daemon.

use anyhow::{bail, Context, Result};
use atv_remote_protocol::{
    BridgeConfig, DeviceIdentity, DeviceInfo, PairingConfig, ReconnectConfig, SessionConfig,
    SimulatedDevice,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file inside the config directory
const CONFIG_FILE: &str = "daemon.toml";

/// Name of the config-entry store inside the data directory
const ENTRIES_FILE: &str = "entries.json";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bridge transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Pairing configuration
    #[serde(default)]
    pub pairing: PairingSettings,

    /// Control session configuration
    #[serde(default)]
    pub session: SessionSettings,

    /// Simulated device used with `--simulate`
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Storage paths
    pub paths: PathConfig,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Bridge port for pairing
    #[serde(default = "default_pairing_port")]
    pub pairing_port: u16,

    /// Bridge port for the control connection
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Pairing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingSettings {
    /// Timeout for each pairing call in seconds
    #[serde(default = "default_pairing_timeout")]
    pub timeout_secs: u64,
}

/// Control session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Delay before the first reconnect attempt in seconds
    #[serde(default = "default_reconnect_initial_delay")]
    pub reconnect_initial_delay_secs: u64,

    /// Upper bound for the delay between reconnect attempts in seconds
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_secs: u64,

    /// Give up after this many reconnect attempts (unset = never give up)
    #[serde(default)]
    pub reconnect_max_attempts: Option<u32>,
}

/// Simulated device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Address the simulated TV answers on
    #[serde(default = "default_simulator_address")]
    pub address: String,

    /// Unique id advertised by the simulated TV
    #[serde(default = "default_simulator_unique_id")]
    pub unique_id: String,

    /// Pairing code accepted by the simulated TV
    #[serde(default = "default_simulator_code")]
    pub code: String,

    /// Vendor advertised by the simulated TV
    #[serde(default = "default_simulator_vendor")]
    pub vendor: String,

    /// Model advertised by the simulated TV
    #[serde(default = "default_simulator_model")]
    pub model: String,
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Configuration directory
    pub config_dir: PathBuf,

    /// Data directory (config entries)
    pub data_dir: PathBuf,
}

fn default_pairing_port() -> u16 {
    atv_remote_protocol::transport::DEFAULT_PAIRING_PORT
}

fn default_control_port() -> u16 {
    atv_remote_protocol::transport::DEFAULT_CONTROL_PORT
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_pairing_timeout() -> u64 {
    30
}

fn default_reconnect_initial_delay() -> u64 {
    2
}

fn default_reconnect_max_delay() -> u64 {
    60
}

fn default_simulator_address() -> String {
    "127.0.0.1".to_string()
}

fn default_simulator_unique_id() -> String {
    "SIM-ATV-0001".to_string()
}

fn default_simulator_code() -> String {
    "123456".to_string()
}

fn default_simulator_vendor() -> String {
    "Simulated".to_string()
}

fn default_simulator_model() -> String {
    "Android TV".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pairing_port: default_pairing_port(),
            control_port: default_control_port(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_pairing_timeout(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reconnect_initial_delay_secs: default_reconnect_initial_delay(),
            reconnect_max_delay_secs: default_reconnect_max_delay(),
            reconnect_max_attempts: None,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            address: default_simulator_address(),
            unique_id: default_simulator_unique_id(),
            code: default_simulator_code(),
            vendor: default_simulator_vendor(),
            model: default_simulator_model(),
        }
    }
}

impl SimulatorConfig {
    /// Build the simulated device
    pub fn device(&self) -> SimulatedDevice {
        SimulatedDevice::new(
            self.address.clone(),
            DeviceIdentity::new(
                self.unique_id.clone(),
                DeviceInfo::new(self.vendor.clone(), self.model.clone(), env!("CARGO_PKG_VERSION")),
            ),
            self.code.clone(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("atv-remote");

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("atv-remote");

        Self {
            transport: TransportConfig::default(),
            pairing: PairingSettings::default(),
            session: SessionSettings::default(),
            simulator: SimulatorConfig::default(),
            paths: PathConfig {
                config_dir,
                data_dir,
            },
        }
    }
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("atv-remote")
            .join(CONFIG_FILE)
    }

    /// Load configuration from the default location, creating it if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, creating a default file if not found
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            let config = Config::default();
            config.save_to(path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Reject values the daemon cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.transport.pairing_port == 0 || self.transport.control_port == 0 {
            bail!("Bridge ports must be non-zero");
        }
        if self.transport.connect_timeout_secs == 0 {
            bail!("transport.connect_timeout_secs must be greater than zero");
        }
        if self.pairing.timeout_secs == 0 {
            bail!("pairing.timeout_secs must be greater than zero");
        }
        if self.session.reconnect_initial_delay_secs == 0 {
            bail!("session.reconnect_initial_delay_secs must be greater than zero");
        }
        if self.session.reconnect_max_delay_secs < self.session.reconnect_initial_delay_secs {
            bail!("session.reconnect_max_delay_secs must not be below the initial delay");
        }
        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;
        fs::create_dir_all(&self.paths.data_dir).context("Failed to create data directory")?;
        Ok(())
    }

    /// Path of the config-entry store
    pub fn entries_path(&self) -> PathBuf {
        self.paths.data_dir.join(ENTRIES_FILE)
    }

    /// Connect timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.connect_timeout_secs)
    }

    /// Bridge transport settings
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            pairing_port: self.transport.pairing_port,
            control_port: self.transport.control_port,
            connect_timeout: self.connect_timeout(),
        }
    }

    /// Pairing flow settings
    pub fn pairing_config(&self) -> PairingConfig {
        PairingConfig {
            timeout: Duration::from_secs(self.pairing.timeout_secs),
        }
    }

    /// Control session settings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: self.connect_timeout(),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_secs(self.session.reconnect_initial_delay_secs),
                max_delay: Duration::from_secs(self.session.reconnect_max_delay_secs),
                max_attempts: self.session.reconnect_max_attempts,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.pairing_port, 6467);
        assert_eq!(config.transport.control_port, 6466);
        assert_eq!(config.pairing.timeout_secs, 30);
        assert!(config.session.reconnect_max_attempts.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.transport.control_port, config.transport.control_port);
        assert_eq!(parsed.paths.data_dir, config.paths.data_dir);
    }

    #[test]
    fn test_load_creates_default_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("daemon.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.pairing.timeout_secs, 30);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("daemon.toml");
        fs::write(
            &path,
            r#"
[transport]
control_port = 7000

[session]
reconnect_max_attempts = 5

[paths]
config_dir = "/tmp/atv/config"
data_dir = "/tmp/atv/data"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.transport.control_port, 7000);
        assert_eq!(config.transport.pairing_port, 6467);
        assert_eq!(config.entries_path(), PathBuf::from("/tmp/atv/data/entries.json"));

        let session = config.session_config();
        assert_eq!(session.reconnect.max_attempts, Some(5));
        assert_eq!(session.reconnect.initial_delay, Duration::from_secs(2));
        assert_eq!(session.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.session.reconnect_max_delay_secs = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.control_port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.reconnect_initial_delay_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect_initial_delay_secs"));
    }
}

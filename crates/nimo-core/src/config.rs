//! Runtime configuration shared by the registry and nodes.
//!
//! Resolution order: built-in defaults, then `nimo.toml` from the user's
//! config directory (if present), then environment variables. Binaries apply
//! their command-line flags last.
//!
//! ```toml
//! [registry]
//! address = "127.0.0.1"
//! port = 1954
//!
//! [status]
//! multicast_address = "239.17.12.1"
//! port = 1955
//!
//! [discovery]
//! timeout_secs = 5
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// `host:port` of the registry command port.
pub const ENV_REGISTRY: &str = "NIMO_REGISTRY";
/// `group:port` for status notifications.
pub const ENV_STATUS: &str = "NIMO_STATUS";
/// Registry discovery timeout in seconds.
pub const ENV_DISCOVERY_TIMEOUT: &str = "NIMO_DISCOVERY_TIMEOUT";

pub const DEFAULT_REGISTRY_PORT: u16 = 1954;
pub const DEFAULT_STATUS_GROUP: Ipv4Addr = Ipv4Addr::new(239, 17, 12, 1);
pub const DEFAULT_STATUS_PORT: u16 = 1955;
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::LOCALHOST,
            port: DEFAULT_REGISTRY_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    pub enabled: bool,
    pub multicast_address: Ipv4Addr,
    pub port: u16,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            multicast_address: DEFAULT_STATUS_GROUP,
            port: DEFAULT_STATUS_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub timeout_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_DISCOVERY_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Address nodes bind their command ports and channels to.
    pub address: Ipv4Addr,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::LOCALHOST,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NimoConfig {
    pub registry: RegistrySettings,
    pub status: StatusSettings,
    pub discovery: DiscoverySettings,
    pub node: NodeSettings,
}

impl NimoConfig {
    /// `$XDG_CONFIG_HOME/nimo/nimo.toml` (or the platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nimo").join("nimo.toml"))
    }

    /// Loads the default file (if any) and applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies `NIMO_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_REGISTRY) {
            let addr = parse_socket_addr(ENV_REGISTRY, &raw)?;
            self.registry.address = *addr.ip();
            self.registry.port = addr.port();
        }
        if let Some(raw) = lookup(ENV_STATUS) {
            let addr = parse_socket_addr(ENV_STATUS, &raw)?;
            self.status.multicast_address = *addr.ip();
            self.status.port = addr.port();
        }
        if let Some(raw) = lookup(ENV_DISCOVERY_TIMEOUT) {
            self.discovery.timeout_secs =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidOverride {
                        var: ENV_DISCOVERY_TIMEOUT.to_string(),
                        value: raw.clone(),
                    })?;
        }
        Ok(())
    }

    pub fn registry_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.registry.address, self.registry.port)
    }

    pub fn status_group(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.status.multicast_address, self.status.port)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.timeout_secs)
    }
}

fn parse_socket_addr(var: &str, raw: &str) -> Result<SocketAddrV4, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            var: var.to_string(),
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = NimoConfig::default();
        assert_eq!(config.registry_addr(), "127.0.0.1:1954".parse().unwrap());
        assert_eq!(config.status_group(), "239.17.12.1:1955".parse().unwrap());
        assert_eq!(config.discovery_timeout(), Duration::from_secs(5));
        assert!(config.status.enabled);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = NimoConfig::from_toml_str("[registry]\nport = 7000\n").unwrap();
        assert_eq!(config.registry.port, 7000);
        assert_eq!(config.registry.address, Ipv4Addr::LOCALHOST);
        assert_eq!(config.status, StatusSettings::default());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[discovery]\ntimeout_secs = 12\n[status]\nenabled = false").unwrap();
        let config = NimoConfig::from_file(file.path()).unwrap();
        assert_eq!(config.discovery.timeout_secs, 12);
        assert!(!config.status.enabled);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = NimoConfig::from_file(Path::new("/nonexistent/nimo.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = NimoConfig::from_toml_str("[registry\nport = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_REGISTRY, "10.0.0.5:4000"),
            (ENV_STATUS, "239.1.1.1:5000"),
            (ENV_DISCOVERY_TIMEOUT, "1"),
        ]
        .into_iter()
        .collect();

        let mut config = NimoConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.registry_addr(), "10.0.0.5:4000".parse().unwrap());
        assert_eq!(config.status_group(), "239.1.1.1:5000".parse().unwrap());
        assert_eq!(config.discovery.timeout_secs, 1);
    }

    #[test]
    fn test_invalid_override() {
        let mut config = NimoConfig::default();
        let err = config
            .apply_overrides(|k| (k == ENV_REGISTRY).then(|| "not-an-address".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_REGISTRY));
    }
}

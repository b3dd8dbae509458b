//! Configuration handling for vpnconnect

use crate::profile::{TunnelProtocol, VpnProfile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub profile: ProfileConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address the VPN service listens on.
    pub address: String,
    /// How long a status check waits for its binding, in milliseconds.
    pub status_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub name: String,
    pub server: String,
    pub protocol: TunnelProtocol,
}

impl ProfileConfig {
    pub fn to_profile(&self) -> VpnProfile {
        VpnProfile::new(&self.name, &self.server, self.protocol)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// Page to load once the tunnel comes up.
    pub homepage: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                address: "127.0.0.1:7909".to_string(),
                status_timeout_ms: crate::controller::DEFAULT_STATUS_TIMEOUT.as_millis() as u64,
            },
            profile: ProfileConfig {
                name: "home".to_string(),
                server: "vpn.example.com".to_string(),
                protocol: TunnelProtocol::Pptp,
            },
            ui: UiConfig {
                homepage: "http://www.google.co.jp/".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).expect("Failed to serialize config");
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Per-user config location, e.g. `~/.config/vpnconnect/vpnconnect.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vpnconnect").join("vpnconnect.toml"))
    }
}

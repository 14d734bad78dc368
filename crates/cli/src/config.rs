//! Application configuration.
//!
//! Layers, lowest to highest: built-in defaults, an optional TOML file, then
//! flags and environment variables (a `.env` file is read before parsing).

use clap::Args;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tvbridge_brokers_metatrader::{MetaTraderConfig, TradingConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("default_volume must be positive, got {0}")]
    InvalidVolume(Decimal),

    #[error("MT5_ACCOUNT is required unless running in paper mode")]
    MissingAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API binds to.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Used when neither `RUST_LOG` nor `--log-level` is set.
    pub log_level: String,
    pub server: ServerConfig,
    pub metatrader: MetaTraderConfig,
    pub trading: TradingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            metatrader: MetaTraderConfig::default(),
            trading: TradingConfig::default(),
        }
    }
}

/// Settings that can come from flags or the environment.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigOverrides {
    /// MT5 account number
    #[arg(long, env = "MT5_ACCOUNT", global = true)]
    pub account: Option<u64>,

    /// MT5 account password
    #[arg(long, env = "MT5_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// MT5 trade server name
    #[arg(long, env = "MT5_SERVER", global = true)]
    pub server: Option<String>,

    /// Path to the terminal executable
    #[arg(long = "terminal-path", env = "MT5_PATH", global = true)]
    pub path: Option<String>,

    /// Broker symbol suffix (e.g. ".r")
    #[arg(long = "suffix", env = "MT5_DEFAULT_SUFFIX", global = true)]
    pub symbol_suffix: Option<String>,

    /// Lots traded when an alert does not specify a volume
    #[arg(long, env = "DEFAULT_VOLUME", global = true)]
    pub default_volume: Option<Decimal>,

    /// Host of the terminal bridge
    #[arg(long, env = "MT5_BRIDGE_HOST", global = true)]
    pub bridge_host: Option<String>,

    /// Port of the terminal bridge
    #[arg(long, env = "MT5_BRIDGE_PORT", global = true)]
    pub bridge_port: Option<u16>,
}

impl AppConfig {
    /// Defaults, then `path` (if given), then `overrides`.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        let mt = &mut self.metatrader;
        if let Some(account) = overrides.account {
            mt.account = account;
        }
        if let Some(password) = &overrides.password {
            mt.password = password.clone();
        }
        if let Some(server) = &overrides.server {
            mt.server = server.clone();
        }
        if let Some(path) = &overrides.path {
            mt.path = Some(path.clone()).filter(|p| !p.is_empty());
        }
        if let Some(suffix) = &overrides.symbol_suffix {
            mt.symbol_suffix = suffix.clone();
        }
        if let Some(host) = &overrides.bridge_host {
            mt.bridge.host = host.clone();
        }
        if let Some(port) = overrides.bridge_port {
            mt.bridge.port = port;
        }
        if let Some(volume) = overrides.default_volume {
            self.trading.default_volume = volume;
        }
    }

    /// Paper mode trades against a simulated terminal and needs no account.
    pub fn validate(&self, paper: bool) -> Result<(), ConfigError> {
        if self.trading.default_volume <= Decimal::ZERO {
            return Err(ConfigError::InvalidVolume(self.trading.default_volume));
        }
        if !paper && self.metatrader.account == 0 {
            return Err(ConfigError::MissingAccount);
        }
        Ok(())
    }
}
